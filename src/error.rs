//! Error types for Floodgate.

use thiserror::Error;

use crate::ratelimit::headers::{add_rate_limit_headers, HeaderSink};

/// Main error type for Floodgate operations.
#[derive(Error, Debug)]
pub enum FloodgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A policy with a zero window or a zero limit
    #[error("Invalid rate limit policy: {0}")]
    InvalidPolicy(String),

    /// Lookup of a named limiter that was never configured
    #[error("Unknown rate limit policy: {0}")]
    UnknownPolicy(String),

    /// Background work requested outside a tokio runtime
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Floodgate operations.
pub type Result<T> = std::result::Result<T, FloodgateError>;

/// Signal raised when a request exceeds its rate limit.
///
/// Carries everything an endpoint needs to build a 429 response without
/// asking the limiter again.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct RateLimitError {
    /// Human-readable violation text from the policy
    pub message: String,
    /// Seconds until the window resets, rounded up
    pub retry_after: u64,
    /// The policy's maximum
    pub limit: u64,
    /// Always 0 at the moment of violation
    pub remaining: u64,
    /// Epoch milliseconds at which the violated window ends
    pub reset_time: u64,
}

impl RateLimitError {
    /// Build the signal for a denied request.
    pub fn limit_exceeded(
        message: impl Into<String>,
        limit: u64,
        reset_time: u64,
        retry_after: u64,
    ) -> Self {
        Self {
            message: message.into(),
            retry_after,
            limit,
            remaining: 0,
            reset_time,
        }
    }

    /// Write the standard rate limit headers for this violation.
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
