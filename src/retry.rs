// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Retry Policies
//!
//! A retry policy maps a 0-based attempt index to how long to wait before the
//! next try and whether to give up. Policies hold no mutable state, so one
//! instance can be shared by any number of dialers and subscribers.

use std::time::Duration;

/// Maps an attempt index to `(wait, stop)`.
pub trait RetryPolicy: Send + Sync {
    /// Returns the wait before the next try and whether retrying should stop.
    fn try_num(&self, attempt: u32) -> (Duration, bool);
}

/// Waits the same interval forever, never gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantRetry {
    interval: Duration,
}

impl ConstantRetry {
    /// # Panics
    /// If `interval` is zero.
    pub fn new(interval: Duration) -> Self {
        assert!(!interval.is_zero(), "constant retry interval must be non-zero");
        ConstantRetry { interval }
    }
}

impl RetryPolicy for ConstantRetry {
    fn try_num(&self, _attempt: u32) -> (Duration, bool) {
        (self.interval, false)
    }
}

/// Grows the wait linearly with the attempt index, scaled by a multiplier,
/// and stops once the wait would exceed `max`.
///
/// `wait = base * attempt * multiplier`, so attempt `0` never waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialRetry {
    base: Duration,
    multiplier: u32,
    max: Duration,
}

impl ExponentialRetry {
    /// # Panics
    /// If any of `base`, `multiplier` or `max` is zero. These values come from
    /// code or configuration, never from the network.
    pub fn new(base: Duration, multiplier: u32, max: Duration) -> Self {
        assert!(!base.is_zero(), "exponential retry base interval must be non-zero");
        assert!(multiplier != 0, "exponential retry multiplier must be non-zero");
        assert!(!max.is_zero(), "exponential retry max interval must be non-zero");

        ExponentialRetry {
            base,
            multiplier,
            max,
        }
    }
}

impl RetryPolicy for ExponentialRetry {
    fn try_num(&self, attempt: u32) -> (Duration, bool) {
        let wait = self
            .base
            .saturating_mul(attempt)
            .saturating_mul(self.multiplier);

        (wait, wait > self.max)
    }
}
