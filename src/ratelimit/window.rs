//! Fixed-window counting.

use serde::Serialize;
use tracing::trace;

use super::headers::{add_rate_limit_headers, HeaderSink};
use super::store::{CounterStore, RateLimitEntry};
use crate::error::{FloodgateError, Result};

/// A fixed window of `window_ms` milliseconds admitting at most `max` requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWindow {
    pub window_ms: u64,
    pub max: u64,
}

/// Outcome of counting one request against a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowDecision {
    /// Whether the request is within the limit
    pub allowed: bool,
    /// Requests counted in the window, this one included
    pub count: u64,
    /// The window's maximum
    pub limit: u64,
    /// Requests left before the limit is hit, never negative
    pub remaining: u64,
    /// Epoch milliseconds at which the window ends
    pub reset_time: u64,
    /// Seconds until the window ends, rounded up
    pub retry_after_secs: u64,
}

/// Snapshot of a key's standing, suitable for response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitInfo {
    pub limit: u64,
    pub remaining: u64,
    /// Epoch milliseconds at which the window ends
    pub reset_time: u64,
    /// Seconds to wait before retrying; 0 when not limited
    pub retry_after: u64,
}

impl FixedWindow {
    /// Create a window policy.
    ///
    /// # Panics
    ///
    /// Panics if `window_ms` or `max` is zero.
    pub fn new(window_ms: u64, max: u64) -> Self {
        assert!(window_ms > 0, "rate limit window must be positive");
        assert!(max > 0, "rate limit max must be positive");
        Self { window_ms, max }
    }

    /// Create a window policy, rejecting a zero window or a zero max.
    pub fn try_new(window_ms: u64, max: u64) -> Result<Self> {
        if window_ms == 0 {
            return Err(FloodgateError::InvalidPolicy(
                "window_ms must be positive".to_string(),
            ));
        }
        if max == 0 {
            return Err(FloodgateError::InvalidPolicy("max must be positive".to_string()));
        }
        Ok(Self { window_ms, max })
    }

    /// Count a request for `key` and decide whether it is allowed.
    ///
    /// The request is counted even when it is denied.
    pub fn check(&self, store: &CounterStore, key: &str) -> WindowDecision {
        let now = store.now();

        let entry = store.update(key, |current| {
            let mut entry = match current {
                Some(entry) if !entry.is_expired(now) => entry,
                _ => {
                    trace!(key, window_ms = self.window_ms, "Starting new rate limit window");
                    RateLimitEntry::fresh(now, self.window_ms)
                }
            };
            entry.count = entry.count.saturating_add(1);
            (entry, entry)
        });

        WindowDecision {
            allowed: entry.count <= self.max,
            count: entry.count,
            limit: self.max,
            remaining: self.max.saturating_sub(entry.count),
            reset_time: entry.reset_time,
            retry_after_secs: retry_after_secs(entry.reset_time, now),
        }
    }

    /// Report the standing of `key` without counting a request.
    ///
    /// `retry_after` is non-zero only once the window is exhausted.
    pub fn info(&self, store: &CounterStore, key: &str) -> RateLimitInfo {
        let now = store.now();

        match store.get(key).filter(|entry| !entry.is_expired(now)) {
            Some(entry) => RateLimitInfo {
                limit: self.max,
                remaining: self.max.saturating_sub(entry.count),
                reset_time: entry.reset_time,
                retry_after: if entry.count >= self.max {
                    retry_after_secs(entry.reset_time, now)
                } else {
                    0
                },
            },
            None => RateLimitInfo {
                limit: self.max,
                remaining: self.max,
                reset_time: now.saturating_add(self.window_ms),
                retry_after: 0,
            },
        }
    }
}

impl WindowDecision {
    /// Header-ready view of this decision. Allowed requests carry no retry hint.
    pub fn info(&self) -> RateLimitInfo {
        RateLimitInfo {
            limit: self.limit,
            remaining: self.remaining,
            reset_time: self.reset_time,
            retry_after: if self.allowed { 0 } else { self.retry_after_secs },
        }
    }
}

impl RateLimitInfo {
    /// Write the standard rate limit headers for this snapshot.
    pub fn write_headers<'a, H: HeaderSink>(&self, headers: &'a mut H) -> &'a mut H {
        add_rate_limit_headers(
            headers,
            self.limit,
            self.remaining,
            self.reset_time,
            Some(self.retry_after),
        )
    }
}

fn retry_after_secs(reset_time: u64, now: u64) -> u64 {
    reset_time.saturating_sub(now).div_ceil(1000)
}
