//! Token bucket rate state and the admission gate.
//!
//! Tokens accrue at `rate` per second up to `capacity`; each admission spends
//! the request's size. The gate is pure arithmetic over an explicit `now`, so
//! it is scheduling-model agnostic: the [`Governor`](crate::Governor) decides
//! whether a `Wait` parks a thread or suspends a task.
//!
//! Invariants:
//! - `0 <= tokens <= capacity` after every operation.
//! - A request larger than `capacity` is always rejected, never partially
//!   admitted, and leaves the state untouched.
//! - Sleeping for a returned `Wait(d)` and retrying at `now + d` admits, absent
//!   other consumers.

use crate::{GovernorConfig, GovernorError};
use std::time::Duration;

/// Slack for float rounding when comparing tokens against a request.
const EPSILON: f64 = 1e-6;

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// The whole request was admitted and its tokens spent.
    Admit,
    /// Only this many units were admitted; the caller owns the remainder.
    AdmitPartial(u64),
    /// Nothing was spent; retry after this long.
    Wait(Duration),
}

impl AdmissionDecision {
    /// Helper to check if anything was admitted.
    pub fn is_admitted(&self) -> bool {
        !matches!(self, AdmissionDecision::Wait(_))
    }

    /// Units granted for a request of `requested` units.
    pub fn granted(&self, requested: u64) -> u64 {
        match self {
            AdmissionDecision::Admit => requested,
            AdmissionDecision::AdmitPartial(n) => *n,
            AdmissionDecision::Wait(_) => 0,
        }
    }
}

/// Token bucket state: capacity, current tokens, refill rate, last refill.
#[derive(Debug, Clone)]
pub struct RateState {
    capacity: u64,
    tokens: f64,
    rate: f64,
    partial: bool,
    last_refill: Duration,
}

impl RateState {
    /// A full bucket as of `now`.
    pub fn new(config: &GovernorConfig, now: Duration) -> Self {
        Self {
            capacity: config.burst_capacity(),
            tokens: config.burst_capacity() as f64,
            rate: config.target_rate(),
            partial: config.partial_admission(),
            last_refill: now,
        }
    }

    /// Tokens currently held. Does not refill; call [`RateState::refill`] first.
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Units added per second.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn last_refill(&self) -> Duration {
        self.last_refill
    }

    /// Accrue tokens for the time elapsed since the last refill.
    ///
    /// A `now` earlier than the last refill is ignored.
    pub fn refill(&mut self, now: Duration) {
        if now <= self.last_refill {
            return;
        }
        let elapsed = (now - self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + self.rate * elapsed).min(self.capacity as f64);
        self.last_refill = now;
    }

    /// Refill, then admit `size` units, admit part of them, or say how long to wait.
    ///
    /// # Errors
    ///
    /// Returns [`GovernorError::RequestExceedsCapacity`] when `size > capacity`.
    pub fn try_admit(&mut self, size: u64, now: Duration) -> Result<AdmissionDecision, GovernorError> {
        if size > self.capacity {
            return Err(GovernorError::RequestExceedsCapacity {
                requested: size,
                capacity: self.capacity,
            });
        }
        if size == 0 {
            return Ok(AdmissionDecision::Admit);
        }
        self.refill(now);

        let wanted = size as f64;
        if self.tokens + EPSILON >= wanted {
            self.tokens = (self.tokens - wanted).max(0.0);
            return Ok(AdmissionDecision::Admit);
        }
        if self.partial {
            let whole = (self.tokens + EPSILON).floor();
            if whole >= 1.0 {
                self.tokens = (self.tokens - whole).max(0.0);
                return Ok(AdmissionDecision::AdmitPartial(whole as u64));
            }
            return Ok(AdmissionDecision::Wait(self.wait_for(1)));
        }
        Ok(AdmissionDecision::Wait(self.wait_for(size)))
    }

    /// Time until `units` tokens are available, assuming no other consumer.
    ///
    /// Does not refill and ignores capacity, so it also serves as an estimate
    /// for demand that spans several requests.
    pub fn wait_for(&self, units: u64) -> Duration {
        let deficit = units as f64 - self.tokens;
        if deficit <= EPSILON {
            return Duration::ZERO;
        }
        secs_to_duration_ceil(deficit / self.rate)
    }

    /// Apply a new configuration as of `now`.
    ///
    /// Tokens accrued under the old rate are kept, clamped to the new capacity.
    pub fn retune(&mut self, config: &GovernorConfig, now: Duration) {
        self.refill(now);
        self.capacity = config.burst_capacity();
        self.rate = config.target_rate();
        self.partial = config.partial_admission();
        self.tokens = self.tokens.clamp(0.0, self.capacity as f64);
    }
}

/// Convert seconds to a `Duration`, rounding up to the next nanosecond so a
/// wait is never short.
fn secs_to_duration_ceil(secs: f64) -> Duration {
    let nanos = (secs * 1e9).ceil();
    if nanos >= u64::MAX as f64 {
        Duration::from_nanos(u64::MAX)
    } else {
        Duration::from_nanos(nanos as u64)
    }
}
