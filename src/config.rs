//! Configuration for the guard core.
//!
//! Every component takes its own section of [`GuardConfig`]. All sections have
//! defaults that match a typical dispatch deployment, so most embedders only
//! override a field or two.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Environment variable that selects the runtime mode.
pub const MODE_ENV_VAR: &str = "DISPATCH_GUARD_ENV";

/// Runtime mode of the hosting process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeMode {
    /// Verbose logging, debug entries retained.
    #[default]
    Development,
    /// Info and above only.
    Production,
}

impl RuntimeMode {
    /// Read the mode from [`MODE_ENV_VAR`]; anything other than `production`
    /// (case-insensitive) is development.
    pub fn from_env() -> Self {
        match std::env::var(MODE_ENV_VAR) {
            Ok(value) if value.eq_ignore_ascii_case("production") => RuntimeMode::Production,
            _ => RuntimeMode::Development,
        }
    }

    /// Returns true in production.
    pub fn is_production(&self) -> bool {
        matches!(self, RuntimeMode::Production)
    }
}

/// Permission engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionConfig {
    /// Role whose holders bypass every check.
    pub bypass_role: String,
    /// Role used when none of an actor's roles is registered.
    pub default_role: String,
    /// Whether decisions are cached.
    pub enable_caching: bool,
    /// Decision cache TTL in seconds.
    pub cache_ttl_seconds: u64,
    /// Maximum depth for role inheritance traversal.
    pub max_inheritance_depth: usize,
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            bypass_role: "super_admin".to_string(),
            default_role: "guest".to_string(),
            enable_caching: true,
            cache_ttl_seconds: 300, // 5 minutes
            max_inheritance_depth: 10,
        }
    }
}

impl PermissionConfig {
    /// The cache TTL as a duration.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

/// Audit trail settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Ring buffer capacity.
    pub capacity: usize,
    /// How often the escalation queue is drained, in milliseconds.
    pub escalation_interval_ms: u64,
    /// Name of the bypass role, used for risk scoring.
    pub bypass_role: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            capacity: 50_000,
            escalation_interval_ms: 5_000,
            bypass_role: "super_admin".to_string(),
        }
    }
}

/// A fixed-window limit for one action class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    /// Window length in milliseconds.
    pub window_ms: u64,
    /// Requests allowed per window.
    pub max_requests: u64,
}

impl RateLimitRule {
    /// Create a rule from a window and a request budget.
    pub fn new(window: Duration, max_requests: u64) -> Self {
        Self {
            window_ms: window.as_millis() as u64,
            max_requests,
        }
    }

    /// The window as a duration.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Rate limiter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Limits by action class. `default` is used for unknown classes.
    pub classes: HashMap<String, RateLimitRule>,
    /// How often expired windows are swept, in milliseconds.
    pub cleanup_interval_ms: u64,
}

/// Action class used when a caller does not name one.
pub const DEFAULT_ACTION_CLASS: &str = "default";

impl Default for RateLimitConfig {
    fn default() -> Self {
        let mut classes = HashMap::new();
        classes.insert(
            DEFAULT_ACTION_CLASS.to_string(),
            RateLimitRule::new(Duration::from_secs(15 * 60), 100),
        );
        classes.insert(
            "api".to_string(),
            RateLimitRule::new(Duration::from_secs(60), 60),
        );
        classes.insert(
            "auth".to_string(),
            RateLimitRule::new(Duration::from_secs(15 * 60), 5),
        );
        classes.insert(
            "upload".to_string(),
            RateLimitRule::new(Duration::from_secs(60 * 60), 10),
        );

        Self {
            classes,
            cleanup_interval_ms: 60_000,
        }
    }
}

impl RateLimitConfig {
    /// Replace or add the rule for an action class.
    pub fn with_class(mut self, class: impl Into<String>, rule: RateLimitRule) -> Self {
        self.classes.insert(class.into(), rule);
        self
    }

    /// Rule for a class, falling back to the default class.
    pub fn rule_for(&self, class: &str) -> Option<RateLimitRule> {
        self.classes
            .get(class)
            .or_else(|| self.classes.get(DEFAULT_ACTION_CLASS))
            .copied()
    }
}

/// Input and upload validation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Longest accepted string, in characters.
    pub max_string_length: usize,
    /// Longest accepted array.
    pub max_array_length: usize,
    /// Largest accepted upload, in bytes (exclusive).
    pub max_file_size: usize,
    /// Accepted upload extensions, lowercase, without the dot.
    pub allowed_extensions: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_string_length: 10_000,
            max_array_length: 1_000,
            max_file_size: 10 * 1024 * 1024,
            allowed_extensions: [
                "jpg", "jpeg", "png", "gif", "webp", "pdf", "doc", "docx", "xls", "xlsx", "csv",
                "txt",
            ]
            .iter()
            .map(|ext| ext.to_string())
            .collect(),
        }
    }
}

/// Structured log sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSinkConfig {
    /// Retained entries.
    pub capacity: usize,
}

impl Default for LogSinkConfig {
    fn default() -> Self {
        Self { capacity: 10_000 }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardConfig {
    pub mode: RuntimeMode,
    pub permissions: PermissionConfig,
    pub audit: AuditConfig,
    pub rate_limits: RateLimitConfig,
    pub validation: ValidationConfig,
    pub log_sink: LogSinkConfig,
    /// Key for the sensitive-data transform.
    pub transform_key: String,
}

impl GuardConfig {
    /// Defaults with the runtime mode taken from the environment.
    pub fn from_env() -> Self {
        Self {
            mode: RuntimeMode::from_env(),
            ..Self::default()
        }
    }

    /// Reject settings that would make a component unusable.
    pub fn validate(&self) -> Result<()> {
        if self.audit.capacity == 0 {
            return Err(Error::InvalidConfiguration(
                "audit capacity must be greater than zero".to_string(),
            ));
        }
        if self.log_sink.capacity == 0 {
            return Err(Error::InvalidConfiguration(
                "log sink capacity must be greater than zero".to_string(),
            ));
        }
        if !self.rate_limits.classes.contains_key(DEFAULT_ACTION_CLASS) {
            return Err(Error::InvalidConfiguration(format!(
                "rate limits must define the '{DEFAULT_ACTION_CLASS}' class"
            )));
        }
        if let Some((class, _)) = self
            .rate_limits
            .classes
            .iter()
            .find(|(_, rule)| rule.window_ms == 0)
        {
            return Err(Error::InvalidConfiguration(format!(
                "rate limit window for '{class}' must be non-zero"
            )));
        }
        if self.permissions.bypass_role == self.permissions.default_role {
            return Err(Error::InvalidConfiguration(
                "bypass role and default role must differ".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(GuardConfig::default().validate().is_ok());
    }

    #[test]
    fn test_unknown_class_falls_back_to_default() {
        let config = RateLimitConfig::default();
        let rule = config.rule_for("no-such-class").unwrap();
        assert_eq!(rule.max_requests, 100);
        assert_eq!(config.rule_for("auth").unwrap().max_requests, 5);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = GuardConfig::default();
        config.audit.capacity = 0;
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_config_serde_round_trip_keeps_mode() {
        let config = GuardConfig {
            mode: RuntimeMode::Production,
            ..GuardConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: GuardConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.mode, RuntimeMode::Production);
        assert_eq!(parsed.permissions.bypass_role, "super_admin");
    }
}
