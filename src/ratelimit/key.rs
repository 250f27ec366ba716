//! Client identity extraction and rate limit key generation.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Header carrying the proxy chain, client first.
pub const FORWARDED_FOR: &str = "x-forwarded-for";
/// Header set by a single fronting proxy.
pub const REAL_IP: &str = "x-real-ip";
/// Bucket shared by every request without a usable identity.
pub const UNKNOWN_CLIENT: &str = "unknown";
/// Namespace for keys produced by [`default_key`].
pub const KEY_PREFIX: &str = "rate_limit:";

/// Anything request-like that can answer header lookups.
///
/// Lookups are case-insensitive, as HTTP header names are.
pub trait HeaderSource {
    fn header(&self, name: &str) -> Option<&str>;
}

/// Derives the bucket a request is counted in.
pub type KeyGenerator = Arc<dyn Fn(&dyn HeaderSource) -> String + Send + Sync>;

/// The client IP as reported by fronting proxies.
///
/// Takes the first entry of `x-forwarded-for`, then `x-real-ip`, and falls
/// back to `"unknown"` so clients without an identity share one bucket.
pub fn client_ip(request: &dyn HeaderSource) -> String {
    let forwarded = request
        .header(FORWARDED_FOR)
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    let ip = forwarded.or_else(|| {
        request
            .header(REAL_IP)
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
    });

    ip.unwrap_or(UNKNOWN_CLIENT).to_string()
}

/// Key by client IP under the `rate_limit:` namespace.
pub fn default_key(request: &dyn HeaderSource) -> String {
    format!("{}{}", KEY_PREFIX, client_ip(request))
}

/// The default IP-based key generator.
pub fn default_key_generator() -> KeyGenerator {
    Arc::new(default_key)
}

fn find_ignore_case<'a, I>(pairs: I, name: &str) -> Option<&'a str>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    pairs
        .into_iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value)
}

impl HeaderSource for HashMap<String, String> {
    fn header(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(value) => Some(value.as_str()),
            None => find_ignore_case(self.iter().map(|(k, v)| (k.as_str(), v.as_str())), name),
        }
    }
}

impl HeaderSource for BTreeMap<String, String> {
    fn header(&self, name: &str) -> Option<&str> {
        find_ignore_case(self.iter().map(|(k, v)| (k.as_str(), v.as_str())), name)
    }
}

impl HeaderSource for Vec<(String, String)> {
    fn header(&self, name: &str) -> Option<&str> {
        find_ignore_case(self.iter().map(|(k, v)| (k.as_str(), v.as_str())), name)
    }
}

impl HeaderSource for [(&str, &str)] {
    fn header(&self, name: &str) -> Option<&str> {
        find_ignore_case(self.iter().copied(), name)
    }
}

impl<const N: usize> HeaderSource for [(&str, &str); N] {
    fn header(&self, name: &str) -> Option<&str> {
        self.as_slice().header(name)
    }
}
