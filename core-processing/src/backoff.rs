//! BackOff policies governing retry of a single stuck event (spec §4.8):
//! `NONE`, `FIXED(interval, maxAttempts)`, `EXPONENTIAL(initial, max,
//! maxElapsed, multiplier, maxAttempts)`.
//!
//! Reshaped from the teacher's single `RetryPolicy`/`delay_for_attempt` into
//! three named policies because the processing loop needs to distinguish
//! "no backoff configured at all" (`NONE`) from "exhausted" (`next == -1`
//! in the origin's vocabulary, `None` here) to decide whether to skip the
//! event and reset.

use std::time::{Duration, Instant};

/// A configured backoff policy, queried once per retry attempt for the next
/// delay.
#[derive(Clone, Debug)]
pub enum BackOff {
    /// No delay, no retries: the first failure is immediately exhaustion.
    None,
    /// A fixed delay between attempts, up to `max_attempts`.
    Fixed {
        /// Delay between every attempt.
        interval: Duration,
        /// Attempts allowed before exhaustion.
        max_attempts: usize,
    },
    /// Exponential delay growth, capped both per-attempt and by total elapsed
    /// time, up to `max_attempts`.
    Exponential {
        /// Delay before the first retry.
        initial: Duration,
        /// Per-attempt delay cap.
        max: Duration,
        /// Total elapsed time cap across all attempts of one execution.
        max_elapsed: Duration,
        /// Growth factor applied to the delay each attempt.
        multiplier: f64,
        /// Attempts allowed before exhaustion.
        max_attempts: usize,
    },
}

/// Tracks in-progress retry state for a single stuck event across repeated
/// [`BackOffExecution::next_delay`] calls, reset once the event is either
/// handled successfully or skipped after exhaustion.
pub struct BackOffExecution<'a> {
    policy: &'a BackOff,
    attempt: usize,
    started_at: Instant,
}

impl<'a> BackOffExecution<'a> {
    /// Begin a fresh execution against `policy`.
    #[must_use]
    pub fn start(policy: &'a BackOff) -> Self {
        Self {
            policy,
            attempt: 0,
            started_at: Instant::now(),
        }
    }

    /// The delay before the next retry, or `None` if this policy is
    /// exhausted (the processing loop must skip the event and reset).
    ///
    /// Advances internal attempt state as a side effect, matching the
    /// origin's stateful `next()` call on a backoff execution object.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let delay = match self.policy {
            BackOff::None => None,
            BackOff::Fixed {
                interval,
                max_attempts,
            } => (self.attempt < *max_attempts).then_some(*interval),
            BackOff::Exponential {
                initial,
                max,
                max_elapsed,
                multiplier,
                max_attempts,
            } => {
                if self.attempt >= *max_attempts || self.started_at.elapsed() >= *max_elapsed {
                    None
                } else {
                    let scaled = initial.as_millis() as f64 * multiplier.powi(self.attempt as i32);
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    let capped = Duration::from_millis(scaled as u64).min(*max);
                    Some(capped)
                }
            }
        };
        if delay.is_some() {
            self.attempt += 1;
        }
        delay
    }
}
