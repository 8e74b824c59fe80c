//! Time-remaining derivation from the shared session epoch.
//!
//! Local tickers only smooth the display between re-derivations; every
//! authoritative read resynchronises them.

use std::time::{SystemTime, UNIX_EPOCH};

/// Fixed length of the pre-start countdown window.
pub const DEFAULT_COUNTDOWN_SECS: u32 = 10;

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

/// `limit - floor((now - start) / 1000)`, clamped to zero.
///
/// A start time in the future counts as zero elapsed seconds.
pub fn remaining_secs(limit_secs: u32, start_ms: i64, now_ms: i64) -> u32 {
    let elapsed_secs = (now_ms.saturating_sub(start_ms)).max(0) / 1000;
    let remaining = i64::from(limit_secs) - elapsed_secs;
    remaining.clamp(0, i64::from(limit_secs)) as u32
}

/// Locally ticking copy of a derived remaining time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncedCountdown {
    remaining: Option<u32>,
}

impl SyncedCountdown {
    /// Re-derive from the authoritative epoch. A missing epoch clears the
    /// countdown.
    pub fn resync(&mut self, limit_secs: u32, start_ms: Option<i64>, now_ms: i64) -> Option<u32> {
        self.remaining = start_ms.map(|start| remaining_secs(limit_secs, start, now_ms));
        self.remaining
    }

    /// Advance one local second without going below zero.
    pub fn tick(&mut self) -> Option<u32> {
        self.remaining = self.remaining.map(|value| value.saturating_sub(1));
        self.remaining
    }

    /// Cached remaining seconds.
    pub fn remaining(&self) -> Option<u32> {
        self.remaining
    }

    /// Forget the cached value.
    pub fn clear(&mut self) {
        self.remaining = None;
    }
}

/// One-shot latch firing the first time a countdown is observed at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpiryLatch {
    fired: bool,
}

impl ExpiryLatch {
    /// Returns true exactly once, on the first observation of zero.
    pub fn observe(&mut self, remaining: Option<u32>) -> bool {
        if self.fired || remaining != Some(0) {
            return false;
        }
        self.fired = true;
        true
    }

    /// Whether the latch already fired.
    pub fn fired(&self) -> bool {
        self.fired
    }

    /// Allow the latch to fire again, after the action it triggered failed.
    pub fn rearm(&mut self) {
        self.fired = false;
    }
}
