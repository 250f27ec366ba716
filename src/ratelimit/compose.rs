//! Limiters built out of other limiters.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, trace};

use super::key::{client_ip, HeaderSource};
use super::limiter::{Limiter, RateLimiter};
use super::policy::RateLimitPolicy;
use super::store::CounterStore;
use super::window::RateLimitInfo;
use crate::error::RateLimitError;

/// How a request ended, as seen by the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Success,
    Failure,
}

/// Counts a request only after its outcome is known.
///
/// With `skip_successful_requests` set, only failures are counted, which is
/// what a login endpoint wants: correct passwords never lock a client out.
/// Unlike a plain limiter this one is consulted after handling, through
/// [`OutcomeLimiter::check_with_outcome`].
#[derive(Debug, Clone)]
pub struct OutcomeLimiter {
    inner: RateLimiter,
    skip_successful: bool,
    skip_failed: bool,
}

impl OutcomeLimiter {
    pub fn new(inner: RateLimiter) -> Self {
        Self {
            inner,
            skip_successful: false,
            skip_failed: false,
        }
    }

    pub fn skip_successful_requests(mut self, skip: bool) -> Self {
        self.skip_successful = skip;
        self
    }

    pub fn skip_failed_requests(mut self, skip: bool) -> Self {
        self.skip_failed = skip;
        self
    }

    pub fn inner(&self) -> &RateLimiter {
        &self.inner
    }

    /// Count the request unless its outcome is skipped.
    ///
    /// Skipped requests return the bucket's current standing untouched.
    pub fn check_with_outcome(
        &self,
        request: &dyn HeaderSource,
        outcome: RequestOutcome,
    ) -> Result<RateLimitInfo, RateLimitError> {
        let skip = match outcome {
            RequestOutcome::Success => self.skip_successful,
            RequestOutcome::Failure => self.skip_failed,
        };

        if skip {
            trace!(?outcome, "Skipping rate limit for request outcome");
            return Ok(self.inner.info(request));
        }

        self.inner.check(request)
    }
}

/// Several independent windows applied to every request.
///
/// Every tier counts every request, even after an earlier tier has denied
/// it. When any tier denies, the violation with the longest `retry_after`
/// is returned and the rest are dropped.
#[derive(Debug, Clone)]
pub struct TieredLimiter {
    first: RateLimiter,
    rest: Vec<RateLimiter>,
}

impl TieredLimiter {
    /// Build one limiter per policy, all counting in `store`.
    ///
    /// Policies without a name are namespaced `tier{index}` so that tiers
    /// with the same key generator keep separate counters.
    ///
    /// # Panics
    ///
    /// Panics if `policies` is empty or if two tiers share a name, since
    /// such tiers would count into the same buckets.
    pub fn new(policies: Vec<RateLimitPolicy>, store: Arc<CounterStore>) -> Self {
        let mut names = HashSet::new();
        let mut tiers = policies.into_iter().enumerate().map(|(index, policy)| {
            let policy = match policy.name {
                Some(_) => policy,
                None => policy.named(format!("tier{}", index)),
            };
            let name = policy.name.clone().unwrap_or_default();
            assert!(names.insert(name.clone()), "duplicate tier name {:?}", name);
            RateLimiter::new(policy, store.clone())
        });

        match tiers.next() {
            Some(first) => Self {
                first,
                rest: tiers.collect(),
            },
            None => panic!("tiered limiter needs at least one tier"),
        }
    }

    pub fn tiers(&self) -> impl Iterator<Item = &RateLimiter> {
        std::iter::once(&self.first).chain(self.rest.iter())
    }
}

impl Limiter for TieredLimiter {
    fn check(&self, request: &dyn HeaderSource) -> Result<RateLimitInfo, RateLimitError> {
        let outcome = self
            .rest
            .iter()
            .fold(self.first.check(request), |current, tier| {
                match (current, tier.check(request)) {
                    (Err(current), Err(next)) if next.retry_after > current.retry_after => Err(next),
                    (Err(current), _) => Err(current),
                    (Ok(_), Err(next)) => Err(next),
                    (Ok(current), Ok(next)) => Ok(tighter(current, next)),
                }
            });

        if let Err(ref violation) = outcome {
            debug!(
                limit = violation.limit,
                retry_after = violation.retry_after,
                "Tiered rate limit exceeded"
            );
        }

        outcome
    }

    fn info(&self, request: &dyn HeaderSource) -> RateLimitInfo {
        self.rest
            .iter()
            .fold(self.first.info(request), |current, tier| {
                tighter(current, tier.info(request))
            })
    }
}

/// The standing with fewer requests left; the earlier one on a tie.
fn tighter(current: RateLimitInfo, next: RateLimitInfo) -> RateLimitInfo {
    if next.remaining < current.remaining {
        next
    } else {
        current
    }
}

/// Lets listed client IPs through without counting them.
#[derive(Debug, Clone)]
pub struct ExemptLimiter<L> {
    inner: L,
    exempt: HashSet<String>,
}

impl<L: Limiter> ExemptLimiter<L> {
    pub fn new<I, S>(inner: L, exempt_ips: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner,
            exempt: exempt_ips.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_exempt(&self, request: &dyn HeaderSource) -> bool {
        self.exempt.contains(&client_ip(request))
    }
}

impl<L: Limiter> Limiter for ExemptLimiter<L> {
    fn check(&self, request: &dyn HeaderSource) -> Result<RateLimitInfo, RateLimitError> {
        if self.is_exempt(request) {
            trace!("Client is exempt from rate limiting");
            return Ok(self.inner.info(request));
        }
        self.inner.check(request)
    }

    fn info(&self, request: &dyn HeaderSource) -> RateLimitInfo {
        self.inner.info(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    const CLIENT: [(&str, &str); 1] = [("x-forwarded-for", "203.0.113.9")];

    fn test_store() -> (ManualClock, Arc<CounterStore>) {
        let clock = ManualClock::new(0);
        let store = Arc::new(CounterStore::with_clock(
            Arc::new(clock.clone()),
            Duration::from_secs(600),
        ));
        (clock, store)
    }

    fn tiered(store: &Arc<CounterStore>) -> TieredLimiter {
        TieredLimiter::new(
            vec![
                RateLimitPolicy::new(Duration::from_millis(1_000), 2),
                RateLimitPolicy::new(Duration::from_millis(60_000), 5),
            ],
            store.clone(),
        )
    }

    #[test]
    fn test_skip_successful_counts_only_failures() {
        let (_clock, store) = test_store();
        let policy = RateLimitPolicy::new(Duration::from_secs(60), 10);
        let limiter = OutcomeLimiter::new(RateLimiter::new(policy, store.clone()))
            .skip_successful_requests(true);

        for outcome in [
            RequestOutcome::Success,
            RequestOutcome::Failure,
            RequestOutcome::Success,
            RequestOutcome::Failure,
            RequestOutcome::Success,
        ] {
            assert_ok!(limiter.check_with_outcome(&CLIENT, outcome));
        }

        assert_eq!(store.get("rate_limit:203.0.113.9").map(|e| e.count), Some(2));
    }

    #[test]
    fn test_skip_failed_counts_only_successes() {
        let (_clock, store) = test_store();
        let policy = RateLimitPolicy::new(Duration::from_secs(60), 1);
        let limiter = OutcomeLimiter::new(RateLimiter::new(policy, store.clone()))
            .skip_failed_requests(true);

        assert_ok!(limiter.check_with_outcome(&CLIENT, RequestOutcome::Failure));
        assert_ok!(limiter.check_with_outcome(&CLIENT, RequestOutcome::Success));
        assert_err!(limiter.check_with_outcome(&CLIENT, RequestOutcome::Success));

        // Skipped outcomes still report the exhausted standing.
        let info = assert_ok!(limiter.check_with_outcome(&CLIENT, RequestOutcome::Failure));
        assert_eq!(info.remaining, 0);
    }

    #[test]
    fn test_outcome_limiter_without_skips_counts_everything() {
        let (_clock, store) = test_store();
        let policy = RateLimitPolicy::new(Duration::from_secs(60), 1);
        let limiter = OutcomeLimiter::new(RateLimiter::new(policy, store));

        assert_ok!(limiter.check_with_outcome(&CLIENT, RequestOutcome::Success));
        assert_err!(limiter.check_with_outcome(&CLIENT, RequestOutcome::Failure));
    }

    #[test]
    fn test_tiered_short_window_denies_burst() {
        let (_clock, store) = test_store();
        let limiter = tiered(&store);

        assert_ok!(limiter.check(&CLIENT));
        assert_ok!(limiter.check(&CLIENT));
        let err = assert_err!(limiter.check(&CLIENT));

        assert_eq!(err.limit, 2);
        assert_eq!(err.retry_after, 1);
    }

    #[test]
    fn test_tiered_long_window_denies_spread_requests() {
        let (clock, store) = test_store();
        let limiter = tiered(&store);

        // Two per second never trips the short tier.
        for _ in 0..2 {
            assert_ok!(limiter.check(&CLIENT));
            assert_ok!(limiter.check(&CLIENT));
            clock.advance(1_000);
        }
        assert_ok!(limiter.check(&CLIENT));

        let err = assert_err!(limiter.check(&CLIENT));
        assert_eq!(err.limit, 5);
        assert_eq!(err.retry_after, 58);
    }

    #[test]
    fn test_tiered_largest_retry_after_wins() {
        let (clock, store) = test_store();
        let limiter = tiered(&store);

        for _ in 0..2 {
            assert_ok!(limiter.check(&CLIENT));
            assert_ok!(limiter.check(&CLIENT));
            clock.advance(1_000);
        }
        assert_ok!(limiter.check(&CLIENT));
        assert_err!(limiter.check(&CLIENT));
        // Both tiers deny here: the short one resets in 1s, the long one in 58s.
        let err = assert_err!(limiter.check(&CLIENT));

        assert_eq!(err.limit, 5);
        assert_eq!(err.retry_after, 58);
    }

    #[test]
    fn test_tiered_counts_every_tier_even_when_denied() {
        let (_clock, store) = test_store();
        let limiter = tiered(&store);

        for _ in 0..4 {
            let _ = limiter.check(&CLIENT);
        }

        assert_eq!(store.get("tier0:rate_limit:203.0.113.9").map(|e| e.count), Some(4));
        assert_eq!(store.get("tier1:rate_limit:203.0.113.9").map(|e| e.count), Some(4));
    }

    #[test]
    fn test_tiered_reports_tightest_standing() {
        let (_clock, store) = test_store();
        let limiter = tiered(&store);

        let info = assert_ok!(limiter.check(&CLIENT));
        assert_eq!(info.limit, 2);
        assert_eq!(info.remaining, 1);
        assert_eq!(limiter.info(&CLIENT).remaining, 1);
        assert_eq!(limiter.tiers().count(), 2);
    }

    #[test]
    #[should_panic(expected = "at least one tier")]
    fn test_tiered_requires_a_tier() {
        let (_clock, store) = test_store();
        TieredLimiter::new(Vec::new(), store);
    }

    #[test]
    #[should_panic(expected = "duplicate tier name")]
    fn test_tiered_rejects_shared_names() {
        let (_clock, store) = test_store();
        TieredLimiter::new(
            vec![
                RateLimitPolicy::new(Duration::from_secs(1), 2).named("auth"),
                RateLimitPolicy::new(Duration::from_secs(60), 5).named("auth"),
            ],
            store,
        );
    }

    #[test]
    #[should_panic(expected = "duplicate tier name")]
    fn test_tiered_rejects_name_clashing_with_generated_one() {
        let (_clock, store) = test_store();
        TieredLimiter::new(
            vec![
                RateLimitPolicy::new(Duration::from_secs(1), 2),
                RateLimitPolicy::new(Duration::from_secs(60), 5).named("tier0"),
            ],
            store,
        );
    }

    #[test]
    fn test_tiered_keeps_distinct_names() {
        let (_clock, store) = test_store();
        let limiter = TieredLimiter::new(
            vec![
                RateLimitPolicy::new(Duration::from_secs(1), 2).named("burst"),
                RateLimitPolicy::new(Duration::from_secs(60), 5).named("sustained"),
            ],
            store.clone(),
        );

        assert_ok!(limiter.check(&CLIENT));
        assert!(store.get("burst:rate_limit:203.0.113.9").is_some());
        assert!(store.get("sustained:rate_limit:203.0.113.9").is_some());
    }

    #[test]
    fn test_exempt_ip_is_never_counted() {
        let (_clock, store) = test_store();
        let policy = RateLimitPolicy::new(Duration::from_secs(60), 1);
        let limiter = ExemptLimiter::new(RateLimiter::new(policy, store.clone()), ["127.0.0.1"]);
        let local = [("x-real-ip", "127.0.0.1")];

        for _ in 0..5 {
            assert_ok!(limiter.check(&local));
        }
        assert!(store.get("rate_limit:127.0.0.1").is_none());

        assert_ok!(limiter.check(&CLIENT));
        assert_err!(limiter.check(&CLIENT));
    }
}
