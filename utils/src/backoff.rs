//! Exponential backoff for bounded polling loops.
//!
//! # Default policy
//!
//! - Initial delay: 10ms
//! - Growth: doubles per step
//! - Max delay: 200ms
//! - Jitter: none (worst-case wall clock stays deterministic)

use std::time::Duration;

/// Backoff curve shared by reachability polling and census grace polling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Ceiling applied after growth.
    pub max_delay: Duration,
    /// Down-jitter factor (0.25 = up to 25% reduction). Clamped to `[0, 1]`;
    /// a non-finite factor means no jitter.
    pub jitter_factor: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(200),
            jitter_factor: 0.0,
        }
    }
}

impl Backoff {
    /// A zero-delay curve, for callers that only want the attempt bound.
    #[must_use]
    pub const fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_factor: 0.0,
        }
    }

    /// Delay to sleep after attempt `step` (0-based) failed.
    #[must_use]
    pub fn delay(&self, step: u32) -> Duration {
        // initial_delay * 2^step, saturating well before f64 overflow
        let exponent = step.min(30) as i32;
        let base = self.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        let jitter_factor = if self.jitter_factor.is_finite() {
            self.jitter_factor.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if jitter_factor == 0.0 {
            return Duration::from_secs_f64(capped);
        }
        let jitter = 1.0 - rand::random::<f64>() * jitter_factor;
        Duration::from_secs_f64(capped * jitter)
    }

    /// Upper bound on total sleep across `attempts` attempts.
    ///
    /// No sleep follows the final attempt, so this sums `attempts - 1` delays.
    #[must_use]
    pub fn worst_case(&self, attempts: u32) -> Duration {
        let undithered = Self {
            jitter_factor: 0.0,
            ..*self
        };
        (0..attempts.saturating_sub(1))
            .map(|step| undithered.delay(step))
            .sum()
    }
}
