//! Named policies shared by the sensitive endpoints.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::limiter::RateLimiter;
use super::policy::RateLimitPolicy;
use super::store::CounterStore;
use crate::config::PolicyOverride;
use crate::error::{FloodgateError, Result};

pub const AUTH: &str = "auth";
pub const EMAIL: &str = "email";
pub const API: &str = "api";
pub const CHAT: &str = "chat";

/// Every preset name, in display order.
pub const PRESET_NAMES: [&str; 4] = [AUTH, EMAIL, API, CHAT];

/// Login, registration and password reset: 5 requests per 15 minutes.
pub fn auth_policy() -> RateLimitPolicy {
    RateLimitPolicy::new(Duration::from_secs(15 * 60), 5)
        .named(AUTH)
        .with_message("Too many authentication attempts, please try again later.")
}

/// Outgoing email: 2 requests per minute.
pub fn email_policy() -> RateLimitPolicy {
    RateLimitPolicy::new(Duration::from_secs(60), 2)
        .named(EMAIL)
        .with_message("Too many email requests, please try again later.")
}

/// General API traffic: 60 requests per minute.
pub fn api_policy() -> RateLimitPolicy {
    RateLimitPolicy::new(Duration::from_secs(60), 60)
        .named(API)
        .with_message("Too many requests, please try again later.")
}

/// Chat messages: 20 requests per minute.
pub fn chat_policy() -> RateLimitPolicy {
    RateLimitPolicy::new(Duration::from_secs(60), 20)
        .named(CHAT)
        .with_message("Too many messages, please slow down.")
}

/// The preset policy called `name`.
pub fn preset(name: &str) -> Option<RateLimitPolicy> {
    match name {
        AUTH => Some(auth_policy()),
        EMAIL => Some(email_policy()),
        API => Some(api_policy()),
        CHAT => Some(chat_policy()),
        _ => None,
    }
}

/// The preset limiters, all counting in one store.
#[derive(Debug, Clone)]
pub struct Limiters {
    pub auth: RateLimiter,
    pub email: RateLimiter,
    pub api: RateLimiter,
    pub chat: RateLimiter,
}

impl Limiters {
    /// The presets with their stock values.
    pub fn new(store: Arc<CounterStore>) -> Self {
        Self {
            auth: RateLimiter::new(auth_policy(), store.clone()),
            email: RateLimiter::new(email_policy(), store.clone()),
            api: RateLimiter::new(api_policy(), store.clone()),
            chat: RateLimiter::new(chat_policy(), store),
        }
    }

    /// The presets with configured overrides applied.
    ///
    /// Fails on an override for an unknown preset or one with a zero window
    /// or limit.
    pub fn from_config(
        overrides: &HashMap<String, PolicyOverride>,
        store: Arc<CounterStore>,
    ) -> Result<Self> {
        if let Some(unknown) = overrides.keys().find(|name| preset(name).is_none()) {
            return Err(FloodgateError::UnknownPolicy(unknown.clone()));
        }

        let build = |name: &str| -> Result<RateLimiter> {
            let mut policy = preset(name).ok_or_else(|| FloodgateError::UnknownPolicy(name.to_string()))?;
            if let Some(changes) = overrides.get(name) {
                policy = changes.apply(policy)?;
                info!(
                    policy = name,
                    window_ms = policy.window_ms,
                    max = policy.max,
                    "Applied rate limit override"
                );
            }
            Ok(RateLimiter::new(policy, store.clone()))
        };

        Ok(Self {
            auth: build(AUTH)?,
            email: build(EMAIL)?,
            api: build(API)?,
            chat: build(CHAT)?,
        })
    }

    /// Look a limiter up by preset name.
    pub fn get(&self, name: &str) -> Result<&RateLimiter> {
        match name {
            AUTH => Ok(&self.auth),
            EMAIL => Ok(&self.email),
            API => Ok(&self.api),
            CHAT => Ok(&self.chat),
            other => Err(FloodgateError::UnknownPolicy(other.to_string())),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &RateLimiter> {
        [&self.auth, &self.email, &self.api, &self.chat].into_iter()
    }
}
