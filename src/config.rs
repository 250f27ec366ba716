//! Configuration management for Floodgate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{FloodgateError, Result};
use crate::ratelimit::presets;
use crate::ratelimit::RateLimitPolicy;

/// Prefix for environment overrides, e.g. `FLOODGATE__STORE__SWEEP_INTERVAL_SECS`.
pub const ENV_PREFIX: &str = "FLOODGATE";

/// Main configuration for Floodgate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FloodgateConfig {
    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Overrides for the preset policies, keyed by preset name
    #[serde(default)]
    pub policies: HashMap<String, PolicyOverride>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Counter store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// How often expired entries are swept, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl StoreConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_sweep_interval() -> u64 {
    600
}

/// Partial override of a preset policy. Unset fields keep the preset's value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyOverride {
    /// Window length in milliseconds
    #[serde(default)]
    pub window_ms: Option<u64>,

    /// Requests allowed per window
    #[serde(default)]
    pub max: Option<u64>,

    /// Violation message
    #[serde(default)]
    pub message: Option<String>,
}

impl PolicyOverride {
    /// Apply this override on top of `policy`.
    pub fn apply(&self, policy: RateLimitPolicy) -> Result<RateLimitPolicy> {
        let window_ms = self.window_ms.unwrap_or(policy.window_ms);
        let max = self.max.unwrap_or(policy.max);

        let mut updated = RateLimitPolicy::try_new(window_ms, max)?;
        updated.name = policy.name;
        updated.key_generator = policy.key_generator;
        updated.message = self.message.clone().unwrap_or(policy.message);
        Ok(updated)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl FloodgateConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: FloodgateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| FloodgateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Layer an optional YAML file with `FLOODGATE__*` environment variables.
    ///
    /// Environment values win over the file, which wins over defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Like [`FloodgateConfig::load`], reading overrides from `env` instead of
    /// the process environment when it is given.
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Yaml),
            );
        }

        let config: FloodgateConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| FloodgateError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values that could only fail later at limiter construction.
    pub fn validate(&self) -> Result<()> {
        if self.store.sweep_interval_secs == 0 {
            return Err(FloodgateError::Config(
                "store.sweep_interval_secs must be positive".to_string(),
            ));
        }

        for (name, changes) in &self.policies {
            let policy = presets::preset(name)
                .ok_or_else(|| FloodgateError::UnknownPolicy(name.clone()))?;
            changes.apply(policy)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FloodgateConfig::default();

        assert_eq!(config.store.sweep_interval(), Duration::from_secs(600));
        assert!(config.policies.is_empty());
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
store:
  sweep_interval_secs: 30
policies:
  auth:
    max: 10
  chat:
    window_ms: 30000
    message: "Chat is busy"
logging:
  json: true
"#;
        let config = FloodgateConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.store.sweep_interval_secs, 30);
        assert_eq!(config.policies["auth"].max, Some(10));
        assert_eq!(config.policies["auth"].window_ms, None);
        assert_eq!(config.policies["chat"].window_ms, Some(30_000));
        assert_eq!(config.logging.level, "info");
        assert!(config.logging.json);
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = FloodgateConfig::from_yaml("{}").unwrap();
        assert_eq!(config, FloodgateConfig::default());
    }

    #[test]
    fn test_rejects_unknown_policy() {
        let yaml = r#"
policies:
  search:
    max: 10
"#;
        let err = FloodgateConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, FloodgateError::UnknownPolicy(name) if name == "search"));
    }

    #[test]
    fn test_rejects_zero_values() {
        let err = FloodgateConfig::from_yaml("policies:\n  email:\n    window_ms: 0\n").unwrap_err();
        assert!(matches!(err, FloodgateError::InvalidPolicy(_)));

        let err = FloodgateConfig::from_yaml("store:\n  sweep_interval_secs: 0\n").unwrap_err();
        assert!(matches!(err, FloodgateError::Config(_)));
    }

    #[test]
    fn test_malformed_yaml() {
        let err = FloodgateConfig::from_yaml("store: [").unwrap_err();
        assert!(matches!(err, FloodgateError::Config(_)));
    }

    #[test]
    fn test_override_keeps_unset_fields() {
        let changes = PolicyOverride {
            max: Some(1),
            ..Default::default()
        };
        let policy = changes.apply(presets::email_policy()).unwrap();

        assert_eq!(policy.max, 1);
        assert_eq!(policy.window_ms, 60_000);
        assert_eq!(policy.name.as_deref(), Some("email"));
        assert_eq!(policy.message, presets::email_policy().message);
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("floodgate-config-{}.yaml", std::process::id()));
        std::fs::write(&path, "store:\n  sweep_interval_secs: 45\n").unwrap();

        // An empty environment keeps ambient FLOODGATE__* variables out.
        let config =
            FloodgateConfig::load_with_env(Some(path.as_path()), Some(Default::default())).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.store.sweep_interval_secs, 45);
    }

    #[test]
    fn test_env_overrides_file() {
        let path = std::env::temp_dir().join(format!("floodgate-env-{}.yaml", std::process::id()));
        std::fs::write(&path, "store:\n  sweep_interval_secs: 45\npolicies:\n  auth:\n    max: 3\n").unwrap();

        let env = config::Map::from([
            ("FLOODGATE__POLICIES__AUTH__MAX".to_string(), "9".to_string()),
            ("FLOODGATE__LOGGING__JSON".to_string(), "true".to_string()),
            ("OTHER__STORE__SWEEP_INTERVAL_SECS".to_string(), "1".to_string()),
        ]);
        let config = FloodgateConfig::load_with_env(Some(path.as_path()), Some(env)).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.policies["auth"].max, Some(9));
        assert_eq!(config.store.sweep_interval_secs, 45);
        assert!(config.logging.json);
    }

    #[test]
    fn test_env_overrides_are_validated() {
        let env = config::Map::from([(
            "FLOODGATE__STORE__SWEEP_INTERVAL_SECS".to_string(),
            "0".to_string(),
        )]);
        let err = FloodgateConfig::load_with_env(None, Some(env)).unwrap_err();
        assert!(matches!(err, FloodgateError::Config(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = FloodgateConfig::from_file("/nonexistent/floodgate.yaml").unwrap_err();
        assert!(matches!(err, FloodgateError::Io(_)));
    }
}
