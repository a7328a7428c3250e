//! Per-request stream session: the state machine tying queue, pacing,
//! visibility and completion together.
//!
//! The session performs no I/O and owns no timers. The driver feeds it
//! upstream signals, timer expiries and visibility changes, and schedules the
//! next tick from what it returns. Every method runs to completion before the
//! next one starts, so each is atomic with respect to observers.
//!
//! ```text
//! Idle ──start──▶ Streaming ──done──▶ Draining ──barrier──▶ Completed
//!   │                │  │                 │
//!   │                │  └──error──▶ Failed ◀──error
//!   └────────────────┴──────cancel──────────┴──▶ Cancelled
//! ```
//!
//! Invariant outside any method call:
//! `produced_len == rendered_len + queue.len() + dropped_len`, where
//! `dropped_len` is non-zero only after a failure or cancellation cleared the
//! queue.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::completion::CompletionBarrier;
use crate::config::RenderConfig;
use crate::errors::RenderError;
use crate::pacing::{Jitter, PacingPolicy, batch_size};
use crate::queue::UnitQueue;
use crate::unit::{Unit, split_units};
use crate::visibility::{VisibilityMonitor, catch_up_units};

/// Lifecycle state of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum SessionState {
    Idle,
    Streaming,
    Draining,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Streaming)
                | (Streaming, Draining)
                | (Idle | Streaming | Draining, Failed)
                | (Draining, Completed)
                | (Idle | Streaming | Draining, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Streaming => "streaming",
            Self::Draining => "draining",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a session's counters.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub produced_len: usize,
    pub rendered_len: usize,
    pub queued_len: usize,
    pub dropped_len: usize,
    pub upstream_done: bool,
    pub pacing_active: bool,
    pub backgrounded: bool,
}

/// Output of one pacing batch or catch-up flush.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderBatch {
    /// Full rendered text after the batch.
    pub text: String,
    /// Units appended by this batch.
    pub appended: usize,
    /// Total units rendered so far.
    pub rendered_len: usize,
}

pub struct StreamSession {
    id: uuid::Uuid,
    state: SessionState,
    produced_len: usize,
    rendered_len: usize,
    dropped_len: usize,
    queue: UnitQueue,
    rendered: String,
    barrier: CompletionBarrier,
    last_unit: Option<Unit>,
    visibility: VisibilityMonitor,
    pacing_active: bool,
    policy: PacingPolicy,
    suspend_in_background: bool,
}

impl StreamSession {
    pub fn new(id: uuid::Uuid, config: &RenderConfig) -> Self {
        Self {
            id,
            state: SessionState::Idle,
            produced_len: 0,
            rendered_len: 0,
            dropped_len: 0,
            queue: UnitQueue::new(),
            rendered: String::new(),
            barrier: CompletionBarrier::default(),
            last_unit: None,
            visibility: VisibilityMonitor::default(),
            pacing_active: false,
            policy: config.pacing_policy(),
            suspend_in_background: config.suspend_in_background,
        }
    }

    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Text rendered so far (the authoritative text once completed).
    pub fn rendered_text(&self) -> &str {
        &self.rendered
    }

    pub fn pacing_active(&self) -> bool {
        self.pacing_active
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            produced_len: self.produced_len,
            rendered_len: self.rendered_len,
            queued_len: self.queue.len(),
            dropped_len: self.dropped_len,
            upstream_done: self.barrier.upstream_done(),
            pacing_active: self.pacing_active,
            backgrounded: self.visibility.is_backgrounded(),
        }
    }

    pub fn invariant_holds(&self) -> bool {
        self.produced_len == self.rendered_len + self.queue.len() + self.dropped_len
    }

    fn transition(&mut self, next: SessionState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        debug!(session_id = %self.id, from = %self.state, to = %next, "session transition");
        self.state = next;
        true
    }

    /// `Idle -> Streaming` once the upstream channel is open.
    pub fn start(&mut self) -> bool {
        self.transition(SessionState::Streaming)
    }

    /// Queues the units of an upstream chunk. Returns how many were queued.
    ///
    /// Chunks outside `Streaming` (after done, or after a terminal state) are
    /// dropped.
    pub fn on_chunk(&mut self, text: &str) -> usize {
        if self.state != SessionState::Streaming {
            if self.state == SessionState::Draining {
                warn!(session_id = %self.id, bytes = text.len(), "dropping chunk received after upstream done");
            }
            return 0;
        }
        let pushed = self.queue.push(split_units(text));
        self.produced_len += pushed;
        debug!(session_id = %self.id, units = pushed, queued = self.queue.len(), "chunk queued");
        pushed
    }

    /// Records the authoritative text and moves to `Draining`.
    pub fn on_done(&mut self, full_text: String) -> bool {
        if self.state != SessionState::Streaming {
            return false;
        }
        self.barrier.record_upstream_done(full_text);
        self.transition(SessionState::Draining)
    }

    /// Fails the session and discards anything still queued. Rendered text
    /// stays as is. Returns `false` if the session was already terminal.
    pub fn on_error(&mut self, error: &RenderError) -> bool {
        if !self.transition(SessionState::Failed) {
            return false;
        }
        warn!(session_id = %self.id, %error, rendered = self.rendered_len, "session failed");
        self.halt();
        true
    }

    /// Cancels the session. Idempotent: returns `false` if already terminal.
    pub fn cancel(&mut self) -> bool {
        if !self.transition(SessionState::Cancelled) {
            return false;
        }
        self.halt();
        true
    }

    fn halt(&mut self) {
        self.dropped_len += self.queue.clear();
        self.pacing_active = false;
    }

    /// Whether the pacing loop is parked while there is work it could do.
    pub fn needs_pacing(&self) -> bool {
        matches!(self.state, SessionState::Streaming | SessionState::Draining)
            && !self.pacing_active
            && !self.queue.is_empty()
            && !(self.suspend_in_background && self.visibility.is_backgrounded())
    }

    /// Marks the pacing loop as scheduled.
    pub fn begin_pacing(&mut self) {
        self.pacing_active = true;
    }

    /// One pacing-loop step. Renders a batch sized by queue depth, or stops
    /// the loop when there is nothing left (or the session is terminal).
    pub fn tick(&mut self) -> Option<RenderBatch> {
        if self.is_terminal() || self.queue.is_empty() {
            self.pacing_active = false;
            return None;
        }
        let batch = batch_size(self.queue.len());
        Some(self.render_units(batch))
    }

    /// Delay until the next tick after the batch just rendered.
    pub fn next_delay(&self, jitter: &mut dyn Jitter) -> Duration {
        self.policy.delay_after(self.last_unit.as_ref(), jitter)
    }

    fn render_units(&mut self, n: usize) -> RenderBatch {
        let units = self.queue.pop_up_to(n);
        for unit in &units {
            self.rendered.push_str(unit.as_str());
        }
        self.rendered_len += units.len();
        if let Some(last) = units.last() {
            self.last_unit = Some(last.clone());
        }
        RenderBatch {
            text: self.rendered.clone(),
            appended: units.len(),
            rendered_len: self.rendered_len,
        }
    }

    pub fn on_background(&mut self, at: Instant) {
        if self.is_terminal() {
            return;
        }
        self.visibility.on_background(at);
        if self.suspend_in_background {
            self.pacing_active = false;
        }
    }

    /// Ends a hidden interval and flushes the units it was worth, if any.
    pub fn on_foreground(&mut self, at: Instant) -> Option<RenderBatch> {
        let elapsed = self.visibility.on_foreground(at)?;
        if self.is_terminal() {
            return None;
        }
        let owed = catch_up_units(elapsed, self.policy.base_delay(), self.queue.len());
        debug!(session_id = %self.id, elapsed_ms = elapsed.as_millis() as u64, owed, queued = self.queue.len(), "foreground catch-up");
        (owed > 0).then(|| self.render_units(owed))
    }

    /// Completes the session when the barrier holds: the rendered text is
    /// replaced by the authoritative text, which is returned exactly once.
    pub fn try_complete(&mut self) -> Option<String> {
        if self.state != SessionState::Draining {
            return None;
        }
        let text = self
            .barrier
            .release(self.queue.len(), self.pacing_active)?;
        self.transition(SessionState::Completed);
        self.rendered = text.clone();
        Some(text)
    }
}
