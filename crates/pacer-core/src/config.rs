//! Renderer configuration.
//!
//! Environment variables (all optional):
//! - `PACER_BASE_DELAY_MS`: per-batch base delay (default 20).
//! - `PACER_MIN_DELAY_MS`: lower bound on any pacing delay (default 1).
//! - `PACER_JITTER`: enable the ±5% delay jitter (default on).
//! - `PACER_SUSPEND_IN_BACKGROUND`: park the pacing loop while hidden (default on).
//! - `PACER_IDLE_TIMEOUT_MS`: fail a streaming session after this long without upstream events.
//! - `PACER_EVENT_BUFFER`: render event channel capacity (default 256).

use std::str::FromStr;
use std::time::Duration;

use crate::errors::RenderError;
use crate::pacing::PacingPolicy;

/// Tunables for every session started by a `Renderer`.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RenderConfig {
    /// Base time per rendered batch before unit-class scaling and jitter.
    pub base_delay: Duration,
    /// Floor applied to every computed delay.
    pub min_delay: Duration,
    /// Randomize delays by a uniform factor in `[0.95, 1.05]`.
    pub jitter: bool,
    /// Stop the pacing loop while the consumer is backgrounded and catch up
    /// on return, the way hosts suspend timers for hidden surfaces.
    pub suspend_in_background: bool,
    /// Fail a streaming session when upstream is silent for this long.
    pub idle_timeout: Option<Duration>,
    /// Capacity of the render event channel.
    pub event_buffer_capacity: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(20),
            min_delay: Duration::from_millis(1),
            jitter: true,
            suspend_in_background: true,
            idle_timeout: None,
            event_buffer_capacity: 256,
        }
    }
}

impl RenderConfig {
    /// Reads overrides from `PACER_*` environment variables on top of the
    /// defaults.
    pub fn from_env() -> Result<Self, RenderError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, RenderError> {
        let mut config = Self::default();
        if let Some(ms) = parse_env::<u64>(&lookup, "PACER_BASE_DELAY_MS")? {
            config.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_env::<u64>(&lookup, "PACER_MIN_DELAY_MS")? {
            config.min_delay = Duration::from_millis(ms);
        }
        if let Some(raw) = lookup("PACER_JITTER") {
            config.jitter = bool_env("PACER_JITTER", &raw)?;
        }
        if let Some(raw) = lookup("PACER_SUSPEND_IN_BACKGROUND") {
            config.suspend_in_background = bool_env("PACER_SUSPEND_IN_BACKGROUND", &raw)?;
        }
        if let Some(ms) = parse_env::<u64>(&lookup, "PACER_IDLE_TIMEOUT_MS")? {
            config.idle_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(capacity) = parse_env::<usize>(&lookup, "PACER_EVENT_BUFFER")? {
            config.event_buffer_capacity = capacity;
        }
        config.validate()?;
        Ok(config)
    }

    /// Sets the base delay.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the minimum delay.
    pub fn min_delay(mut self, delay: Duration) -> Self {
        self.min_delay = delay;
        self
    }

    /// Enables or disables jitter.
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Chooses whether pacing stops while backgrounded.
    pub fn suspend_in_background(mut self, suspend: bool) -> Self {
        self.suspend_in_background = suspend;
        self
    }

    /// Sets the upstream idle timeout.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Sets the render event channel capacity.
    pub fn event_buffer_capacity(mut self, capacity: usize) -> Self {
        self.event_buffer_capacity = capacity;
        self
    }

    /// Checks the values a session cannot run with.
    pub fn validate(&self) -> Result<(), RenderError> {
        if self.base_delay.is_zero() {
            return Err(RenderError::Config(
                "base_delay must be greater than 0".into(),
            ));
        }
        if self.min_delay.is_zero() {
            return Err(RenderError::Config("min_delay must be greater than 0".into()));
        }
        if self.event_buffer_capacity == 0 {
            return Err(RenderError::Config(
                "event_buffer_capacity must be greater than 0".into(),
            ));
        }
        if self.idle_timeout.is_some_and(|t| t.is_zero()) {
            return Err(RenderError::Config("idle_timeout must be greater than 0".into()));
        }
        Ok(())
    }

    pub(crate) fn pacing_policy(&self) -> PacingPolicy {
        PacingPolicy::new(self.base_delay, self.min_delay)
    }
}

pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

fn bool_env(key: &str, raw: &str) -> Result<bool, RenderError> {
    parse_bool(raw).ok_or_else(|| RenderError::Config(format!("invalid boolean for {key}: {raw}")))
}

fn parse_env<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, RenderError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| RenderError::Config(format!("invalid value for {key}: {raw}"))),
    }
}
