//! Configuration types and loading

use serde::{Deserialize, Serialize};

/// Main configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TetherConfig {
    /// When false, processors are skipped and content is stored verbatim
    pub processing_enabled: bool,
    /// Upload worker budget per life-cycle operation (`None` = unbounded)
    pub concurrent_workers: Option<usize>,
    /// Local filesystem storage configuration
    pub local_storage: LocalStorageConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LocalStorageConfig {
    /// Directory every stored path is relative to
    pub local_prefix: Option<String>,
    /// Prefix for public URLs
    pub public_url_prefix: Option<String>,
    /// Unix mode applied to written files
    pub permissions: u32,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            local_prefix: None,
            public_url_prefix: None,
            permissions: 0o644,
        }
    }
}

impl Default for TetherConfig {
    fn default() -> Self {
        Self {
            processing_enabled: true,
            concurrent_workers: None,
            local_storage: LocalStorageConfig::default(),
        }
    }
}

/// Configuration error
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

impl TetherConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key lookup (environment, test maps)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("TETHER_PROCESSING_ENABLED") {
            config.processing_enabled = parse_bool("TETHER_PROCESSING_ENABLED", &v)?;
        }

        if let Some(v) = lookup("TETHER_CONCURRENT_WORKERS") {
            config.concurrent_workers = parse_workers(&v)?;
        }

        // Storage
        if let Some(path) = lookup("TETHER_STORAGE_PATH") {
            config.local_storage.local_prefix = Some(path);
        }
        if let Some(prefix) = lookup("TETHER_PUBLIC_URL_PREFIX") {
            config.local_storage.public_url_prefix = Some(prefix);
        }
        if let Some(v) = lookup("TETHER_FILE_PERMISSIONS") {
            config.local_storage.permissions = parse_mode(&v)?;
        }

        tracing::debug!(
            processing_enabled = config.processing_enabled,
            concurrent_workers = ?config.concurrent_workers,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Check a worker budget before it reaches a throttle
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrent_workers == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "concurrent_workers".to_string(),
                message: "must be a positive integer".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{}'", other),
        }),
    }
}

fn parse_mode(value: &str) -> Result<u32, ConfigError> {
    let digits = value.trim().trim_start_matches("0o");
    u32::from_str_radix(digits, 8).map_err(|_| ConfigError::InvalidValue {
        key: "TETHER_FILE_PERMISSIONS".to_string(),
        message: format!("expected an octal mode, got '{}'", value),
    })
}

fn parse_workers(value: &str) -> Result<Option<usize>, ConfigError> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("unbounded") {
        return Ok(None);
    }

    match value.parse::<usize>() {
        Ok(0) | Err(_) => Err(ConfigError::InvalidValue {
            key: "TETHER_CONCURRENT_WORKERS".to_string(),
            message: format!("expected a positive integer, got '{}'", value),
        }),
        Ok(n) => Ok(Some(n)),
    }
}
