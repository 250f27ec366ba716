//! Core rate limiter implementation.

use std::sync::Arc;
use tracing::{debug, trace};

use super::key::HeaderSource;
use super::policy::RateLimitPolicy;
use super::store::CounterStore;
use super::window::{FixedWindow, RateLimitInfo};
use crate::error::RateLimitError;

/// Anything that can admit or reject a request.
///
/// Implemented by the plain [`RateLimiter`] and by the composed shapes in
/// [`crate::ratelimit::compose`], so endpoints can hold any of them behind
/// one type.
pub trait Limiter: Send + Sync {
    /// Count the request and admit it, or return the violation.
    fn check(&self, request: &dyn HeaderSource) -> Result<RateLimitInfo, RateLimitError>;

    /// Standing of the bucket `request` falls into, without counting it.
    fn info(&self, request: &dyn HeaderSource) -> RateLimitInfo;
}

/// A single fixed-window policy applied against a shared counter store.
///
/// This struct is thread-safe and can be shared across multiple tasks.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    policy: RateLimitPolicy,
    window: FixedWindow,
    store: Arc<CounterStore>,
}

impl RateLimiter {
    /// Create a limiter for `policy` counting in `store`.
    pub fn new(policy: RateLimitPolicy, store: Arc<CounterStore>) -> Self {
        let window = policy.window();
        Self {
            policy,
            window,
            store,
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<CounterStore> {
        &self.store
    }

    /// Count a request under an explicit key, bypassing the key generator.
    ///
    /// The policy's namespace is still applied.
    pub fn check_key(&self, key: &str) -> Result<RateLimitInfo, RateLimitError> {
        self.check_scoped(&self.policy.scoped_key(key))
    }

    /// Standing of an explicit key, without counting.
    pub fn info_for_key(&self, key: &str) -> RateLimitInfo {
        self.window.info(&self.store, &self.policy.scoped_key(key))
    }

    fn check_scoped(&self, key: &str) -> Result<RateLimitInfo, RateLimitError> {
        let decision = self.window.check(&self.store, key);

        trace!(
            key = %key,
            count = decision.count,
            limit = decision.limit,
            "Checked rate limit"
        );

        if decision.allowed {
            return Ok(decision.info());
        }

        debug!(
            key = %key,
            count = decision.count,
            limit = decision.limit,
            retry_after = decision.retry_after_secs,
            "Rate limit exceeded"
        );

        Err(RateLimitError::limit_exceeded(
            self.policy.message.clone(),
            decision.limit,
            decision.reset_time,
            decision.retry_after_secs,
        ))
    }
}

impl Limiter for RateLimiter {
    fn check(&self, request: &dyn HeaderSource) -> Result<RateLimitInfo, RateLimitError> {
        self.check_scoped(&self.policy.key_for(request))
    }

    fn info(&self, request: &dyn HeaderSource) -> RateLimitInfo {
        self.window.info(&self.store, &self.policy.key_for(request))
    }
}

/// Read-only standing of `key` under a `window_ms` / `max` window.
///
/// Does not count a request. A zero `window_ms` or `max` is reported as
/// [`crate::FloodgateError::InvalidPolicy`] rather than a panic, since the values
/// arrive at request time.
pub fn get_rate_limit_info(
    store: &CounterStore,
    key: &str,
    window_ms: u64,
    max: u64,
) -> crate::Result<RateLimitInfo> {
    Ok(FixedWindow::try_new(window_ms, max)?.info(store, key))
}
