//! Rate limit policies.

use std::sync::Arc;
use std::time::Duration;

use super::key::{default_key_generator, HeaderSource, KeyGenerator};
use super::window::FixedWindow;
use crate::error::Result;

/// Message used when a policy does not set its own.
pub const DEFAULT_MESSAGE: &str = "Too many requests, please try again later.";

/// Window length, ceiling, violation text and keying for one limiter.
#[derive(Clone)]
pub struct RateLimitPolicy {
    /// Namespace for this policy's counters in a shared store
    pub name: Option<String>,
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Requests allowed per window; the next one is denied
    pub max: u64,
    /// Human-readable violation text
    pub message: String,
    /// Maps a request to the bucket it is counted in
    pub key_generator: KeyGenerator,
}

impl std::fmt::Debug for RateLimitPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitPolicy")
            .field("name", &self.name)
            .field("window_ms", &self.window_ms)
            .field("max", &self.max)
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

impl RateLimitPolicy {
    /// Create a policy keyed by client IP.
    ///
    /// # Panics
    ///
    /// Panics if `window` is shorter than a millisecond or `max` is zero.
    /// Use [`RateLimitPolicy::try_new`] for values that come from configuration.
    pub fn new(window: Duration, max: u64) -> Self {
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        assert!(window_ms > 0, "rate limit window must be positive");
        assert!(max > 0, "rate limit max must be positive");
        Self::build(window_ms, max)
    }

    /// Create a policy, rejecting a zero window or a zero max.
    pub fn try_new(window_ms: u64, max: u64) -> Result<Self> {
        let window = FixedWindow::try_new(window_ms, max)?;
        Ok(Self::build(window.window_ms, window.max))
    }

    fn build(window_ms: u64, max: u64) -> Self {
        Self {
            name: None,
            window_ms,
            max,
            message: DEFAULT_MESSAGE.to_string(),
            key_generator: default_key_generator(),
        }
    }

    /// Namespace this policy's counters.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Replace the default IP-based key with a custom identity.
    pub fn with_key_generator<F>(mut self, key_generator: F) -> Self
    where
        F: Fn(&dyn HeaderSource) -> String + Send + Sync + 'static,
    {
        self.key_generator = Arc::new(key_generator);
        self
    }

    pub fn window(&self) -> FixedWindow {
        FixedWindow::new(self.window_ms, self.max)
    }

    /// The store key a request is counted under.
    pub fn key_for(&self, request: &dyn HeaderSource) -> String {
        self.scoped_key(&(self.key_generator)(request))
    }

    /// Apply this policy's namespace to an already-derived key.
    pub fn scoped_key(&self, key: &str) -> String {
        match &self.name {
            Some(name) => format!("{}:{}", name, key),
            None => key.to_string(),
        }
    }
}
