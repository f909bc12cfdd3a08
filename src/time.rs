//! Stopwatch and bounded polling.
//!
//! Every wait in the driver is a poll of some condition at a fixed interval,
//! abandoned once a millisecond budget has elapsed.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use crate::io::Clock;
use crate::{Error, Result};

/// A deadline measured against a [`Clock`].
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    start_us: u64,
    expire_us: u64,
}

impl Stopwatch {
    /// Start a stopwatch which expires after `timeout_ms`.
    pub fn start<C: Clock>(clock: &mut C, timeout_ms: u32) -> Self {
        let start_us = clock.now_us();
        Self {
            start_us,
            expire_us: start_us.saturating_add(timeout_ms as u64 * 1000),
        }
    }

    /// Whether the timeout has elapsed.
    pub fn expired<C: Clock>(&self, clock: &mut C) -> bool {
        clock.now_us() >= self.expire_us
    }

    /// Milliseconds since the stopwatch was started.
    pub fn elapsed_ms<C: Clock>(&self, clock: &mut C) -> u64 {
        clock.now_us().saturating_sub(self.start_us) / 1000
    }
}

/// Poll `done` every `interval_us` until it returns `true`, or until
/// `timeout_ms` has elapsed.
///
/// The condition is always checked at least once, before any delay.
///
/// Returns:
/// - `Ok(elapsed_ms)`: the condition was met
/// - `Err(Error::Timeout)`: the budget ran out
/// - `Err(e)`: `done` itself failed
pub fn poll_until<C, F>(
    clock: &mut C,
    timeout_ms: u32,
    interval_us: u32,
    mut done: F,
) -> Result<u64>
where
    C: Clock,
    F: FnMut() -> Result<bool>,
{
    let sw = Stopwatch::start(clock, timeout_ms);
    while !done()? {
        clock.delay_us(interval_us);
        if sw.expired(clock) {
            return Err(Error::Timeout);
        }
    }
    Ok(sw.elapsed_ms(clock))
}
