//! Floodgate - In-Process Rate Limiting
//!
//! This crate implements fixed-window request counting for the sensitive
//! endpoints of a web application: login, registration, password reset,
//! email sending and chat. Counters live in a process-wide store that
//! reclaims expired windows in the background; limiters derive a key from
//! each request, count it, and hand back either the remaining quota or a
//! [`error::RateLimitError`] ready to be rendered as a 429 response.

pub mod config;
pub mod error;
pub mod ratelimit;

pub use error::{FloodgateError, RateLimitError, Result};
