//! Batch sizing and inter-batch delay for the pacing loop.
//!
//! Batch size grows with backlog so a burst from the producer (or a pile-up
//! after a stall) drains proportionally faster. Delay follows the last unit
//! shown: a pause after line breaks and sentence ends, a slight random wobble
//! otherwise.

use std::time::Duration;

use rand::Rng as _;

use crate::unit::{Unit, UnitClass};

// Class scaling as exact ratios: newline x1.5, sentence end x1.3.
const NEWLINE_RATIO: (u32, u32) = (3, 2);
const SENTENCE_END_RATIO: (u32, u32) = (13, 10);

/// Jitter bounds applied to every delay.
pub const JITTER_MIN: f64 = 0.95;
pub const JITTER_MAX: f64 = 1.05;

/// Number of units to pop for a queue of the given depth.
pub fn batch_size(depth: usize) -> usize {
    match depth {
        d if d > 2000 => 20,
        d if d > 1000 => 15,
        d if d > 500 => 10,
        d if d > 100 => 5,
        _ => 3,
    }
}

/// Source of the multiplicative delay jitter.
pub trait Jitter: Send {
    fn factor(&mut self) -> f64;
}

/// Uniform jitter in `[JITTER_MIN, JITTER_MAX]`.
#[derive(Debug, Default, Clone, Copy)]
pub struct UniformJitter;

impl Jitter for UniformJitter {
    fn factor(&mut self) -> f64 {
        rand::rng().random_range(JITTER_MIN..=JITTER_MAX)
    }
}

/// No jitter; delays are exact.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoJitter;

impl Jitter for NoJitter {
    fn factor(&mut self) -> f64 {
        1.0
    }
}

/// Delay policy for the pacing loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingPolicy {
    base_delay: Duration,
    min_delay: Duration,
}

impl PacingPolicy {
    pub fn new(base_delay: Duration, min_delay: Duration) -> Self {
        Self {
            base_delay,
            min_delay,
        }
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Delay before the next batch, given the last unit rendered.
    pub fn delay_after(&self, last: Option<&Unit>, jitter: &mut dyn Jitter) -> Duration {
        let (num, den) = match last.map(Unit::class) {
            Some(UnitClass::Newline) => NEWLINE_RATIO,
            Some(UnitClass::SentenceEnd) => SENTENCE_END_RATIO,
            Some(UnitClass::Other) | None => (1, 1),
        };
        let scaled = self.base_delay * num / den;
        let factor = jitter.factor().clamp(JITTER_MIN, JITTER_MAX);
        let jittered = if (factor - 1.0).abs() < f64::EPSILON {
            scaled
        } else {
            scaled.mul_f64(factor)
        };
        jittered.max(self.min_delay)
    }
}
