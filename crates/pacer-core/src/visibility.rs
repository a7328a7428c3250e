//! Foreground/background tracking and elapsed-time catch-up.
//!
//! Time spent hidden is treated as time that would have been spent
//! animating: on return, the units that would have been shown in that window
//! are flushed at once instead of being animated one batch at a time.

use std::time::Duration;

use tokio::time::Instant;

/// Host visibility of the consuming surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Visibility {
    Foreground,
    Background,
}

/// A visibility transition stamped with the moment the host reported it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VisibilityChange {
    pub visibility: Visibility,
    pub at: Instant,
}

/// How many queued units a hidden interval of `elapsed` is worth.
///
/// `floor(elapsed / base_delay)`, capped by the current queue depth.
pub fn catch_up_units(elapsed: Duration, base_delay: Duration, depth: usize) -> usize {
    if base_delay.is_zero() {
        return depth;
    }
    let owed = elapsed.as_nanos() / base_delay.as_nanos();
    usize::try_from(owed).unwrap_or(usize::MAX).min(depth)
}

#[derive(Debug, Default)]
pub struct VisibilityMonitor {
    backgrounded_at: Option<Instant>,
}

impl VisibilityMonitor {
    /// Records the start of a hidden interval. A repeated background signal
    /// restarts it at the newer timestamp.
    pub fn on_background(&mut self, at: Instant) {
        self.backgrounded_at = Some(at);
    }

    /// Ends the hidden interval and returns its length, or `None` if the
    /// surface was not backgrounded.
    pub fn on_foreground(&mut self, at: Instant) -> Option<Duration> {
        self.backgrounded_at
            .take()
            .map(|since| at.saturating_duration_since(since))
    }

    pub fn is_backgrounded(&self) -> bool {
        self.backgrounded_at.is_some()
    }

    pub fn backgrounded_at(&self) -> Option<Instant> {
        self.backgrounded_at
    }
}
