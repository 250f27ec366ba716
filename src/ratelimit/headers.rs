//! Standard rate limit response headers.

use std::collections::{BTreeMap, HashMap};

pub const LIMIT_HEADER: &str = "X-RateLimit-Limit";
pub const REMAINING_HEADER: &str = "X-RateLimit-Remaining";
pub const RESET_HEADER: &str = "X-RateLimit-Reset";
pub const RETRY_AFTER_HEADER: &str = "Retry-After";

/// A header collection that can be written to.
pub trait HeaderSink {
    /// Set `name` to `value`, replacing any previous value.
    fn set_header(&mut self, name: &str, value: String);
}

impl HeaderSink for HashMap<String, String> {
    fn set_header(&mut self, name: &str, value: String) {
        self.insert(name.to_string(), value);
    }
}

impl HeaderSink for BTreeMap<String, String> {
    fn set_header(&mut self, name: &str, value: String) {
        self.insert(name.to_string(), value);
    }
}

impl HeaderSink for Vec<(String, String)> {
    fn set_header(&mut self, name: &str, value: String) {
        match self.iter_mut().find(|(key, _)| key.eq_ignore_ascii_case(name)) {
            Some((_, existing)) => *existing = value,
            None => self.push((name.to_string(), value)),
        }
    }
}

/// Write limit, remaining and reset headers, plus `Retry-After` when positive.
///
/// `reset_time` is in epoch milliseconds and is rendered as epoch seconds,
/// rounded up. A missing or zero `retry_after` leaves `Retry-After` unset.
pub fn add_rate_limit_headers<H: HeaderSink>(
    headers: &mut H,
    limit: u64,
    remaining: u64,
    reset_time: u64,
    retry_after: Option<u64>,
) -> &mut H {
    headers.set_header(LIMIT_HEADER, limit.to_string());
    headers.set_header(REMAINING_HEADER, remaining.to_string());
    headers.set_header(RESET_HEADER, reset_time.div_ceil(1000).to_string());

    if let Some(seconds) = retry_after.filter(|&seconds| seconds > 0) {
        headers.set_header(RETRY_AFTER_HEADER, seconds.to_string());
    }

    headers
}
