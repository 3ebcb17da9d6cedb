//! Configuration loading for the Ledgerline client.
//!
//! Every section is optional and falls back to the documented defaults; a
//! missing `[remote]` section means the client runs on local storage only.

use ledgerline_core::{ApiError, DisplayError, Locale};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Env var naming the config file when `--config` is not given.
pub const CONFIG_ENV: &str = "LEDGERLINE_CONFIG";
/// Env var overriding `fallback.enabled`.
pub const FALLBACK_ENABLED_ENV: &str = "LEDGERLINE_FALLBACK_ENABLED";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub remote: Option<RemoteConfig>,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteConfig {
    pub base_url: String,
    pub anon_key: Option<String>,
    /// Backend codes treated as access denial in addition to the built-in ones
    #[serde(default)]
    pub policy_codes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TimeoutConfig {
    pub request_timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            jitter_ms: 0,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_jitter(Duration::from_millis(self.jitter_ms))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CacheConfig {
    /// Oldest cache entry still served when the remote fails
    pub max_age_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_age_ms: 5 * 60 * 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FallbackConfig {
    pub enabled: bool,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Memory,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory holding one JSON file per store (file backend only)
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SessionConfig {
    pub login_url: Option<String>,
    pub locale: Locale,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "ledgerline=info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or LEDGERLINE_CONFIG)")]
    MissingConfigPath,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ClientConfig {
    /// Load from `--config` / `LEDGERLINE_CONFIG`, apply env overrides, validate.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        let mut config = Self::from_path(&path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        let value = std::env::var(FALLBACK_ENABLED_ENV).ok();
        self.override_fallback_enabled(value.as_deref())
    }

    /// Apply a raw `LEDGERLINE_FALLBACK_ENABLED` value (`true/false/1/0`).
    pub fn override_fallback_enabled(&mut self, raw: Option<&str>) -> Result<(), ConfigError> {
        let Some(raw) = raw else {
            return Ok(());
        };
        self.fallback.enabled = parse_flag(raw).ok_or_else(|| ConfigError::InvalidValue {
            field: "fallback.enabled",
            reason: format!("{} must be true, false, 1 or 0 (got '{}')", FALLBACK_ENABLED_ENV, raw),
        })?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(remote) = &self.remote {
            let url = remote.base_url.trim();
            if url.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "remote.base_url",
                    reason: "must not be empty".to_string(),
                });
            }
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidValue {
                    field: "remote.base_url",
                    reason: "must start with http:// or https://".to_string(),
                });
            }
            if remote.policy_codes.iter().any(|c| c.trim().is_empty()) {
                return Err(ConfigError::InvalidValue {
                    field: "remote.policy_codes",
                    reason: "codes must not be empty".to_string(),
                });
            }
        }
        if self.timeouts.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "timeouts.request_timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retry.max_attempts",
                reason: "must be >= 1".to_string(),
            });
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigError::InvalidValue {
                field: "retry.max_delay_ms",
                reason: "must be >= base_delay_ms".to_string(),
            });
        }
        if self.storage.backend == StorageBackend::File
            && self.storage.path.as_ref().map_or(true, |p| p.as_os_str().is_empty())
        {
            return Err(ConfigError::InvalidValue {
                field: "storage.path",
                reason: "required for the file backend".to_string(),
            });
        }
        if self.logging.filter.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "logging.filter",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.request_timeout_ms)
    }

    pub fn cache_max_age(&self) -> Duration {
        Duration::from_millis(self.cache.max_age_ms)
    }

    /// `error` as shown to the operator, in the configured session locale.
    pub fn display_error(&self, error: &ApiError) -> DisplayError {
        error.to_display(self.session.locale)
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var(CONFIG_ENV).ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerline_core::ErrorKind;

    const FULL: &str = r#"
        [remote]
        base_url = "https://svj.example.com"
        anon_key = "public-anon"
        policy_codes = ["P0403"]

        [timeouts]
        request_timeout_ms = 5000

        [retry]
        max_attempts = 4
        base_delay_ms = 250
        max_delay_ms = 4000
        jitter_ms = 50

        [cache]
        max_age_ms = 60000

        [fallback]
        enabled = false

        [storage]
        backend = "file"
        path = "/var/lib/ledgerline"

        [session]
        login_url = "https://svj.example.com/login"
        locale = "cs"

        [logging]
        filter = "ledgerline=debug"
        json = true
    "#;

    #[test]
    fn test_full_config_parses_and_validates() {
        let config = ClientConfig::from_toml(FULL).unwrap();
        config.validate().unwrap();
        assert_eq!(config.remote.as_ref().unwrap().policy_codes, vec!["P0403"]);
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert!(!config.fallback.enabled);
        assert_eq!(config.session.locale, Locale::Cs);
        let policy = config.retry.policy();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
        assert_eq!(policy.jitter, Duration::from_millis(50));
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::from_toml("[storage]\nbackend = \"memory\"\n").unwrap();
        config.validate().unwrap();
        assert!(config.remote.is_none());
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.retry.policy(), RetryPolicy::default());
        assert!(config.fallback.enabled);
        assert_eq!(config.logging.filter, "ledgerline=info");
    }

    #[test]
    fn test_display_error_uses_session_locale() {
        let config = ClientConfig::from_toml(FULL).unwrap();
        let forbidden = ApiError::new(ErrorKind::Forbidden, "permission denied for table employees");

        let shown = config.display_error(&forbidden);
        assert_eq!(shown.kind, ErrorKind::Forbidden);
        assert_eq!(shown.message, ErrorKind::Forbidden.localized_message(Locale::Cs));
        assert_ne!(shown.message, ErrorKind::Forbidden.localized_message(Locale::En));

        let invalid = ApiError::validation("first_name is required");
        assert_eq!(config.display_error(&invalid).message, "first_name is required");

        let english = ClientConfig::from_toml("").unwrap();
        assert_eq!(
            english.display_error(&forbidden).message,
            ErrorKind::Forbidden.localized_message(Locale::En)
        );
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let result = ClientConfig::from_toml("[fallback]\nenabled = true\nmode = \"auto\"\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_file_backend_requires_path() {
        let config = ClientConfig::from_toml("").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "storage.path", .. })
        ));
    }

    #[test]
    fn test_invalid_values() {
        let mut config = ClientConfig::from_toml(FULL).unwrap();
        config.retry.max_attempts = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "retry.max_attempts", .. })
        ));

        let mut config = ClientConfig::from_toml(FULL).unwrap();
        config.remote.as_mut().unwrap().base_url = "svj.example.com".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "remote.base_url", .. })
        ));
    }

    #[test]
    fn test_fallback_env_override() {
        let mut config = ClientConfig::from_toml(FULL).unwrap();
        config.override_fallback_enabled(Some("1")).unwrap();
        assert!(config.fallback.enabled);
        config.override_fallback_enabled(Some("FALSE")).unwrap();
        assert!(!config.fallback.enabled);
        config.override_fallback_enabled(None).unwrap();
        assert!(!config.fallback.enabled);
        assert!(config.override_fallback_enabled(Some("maybe")).is_err());
    }
}
