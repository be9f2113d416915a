//! Configuration loading
//!
//! Resolution priority for every setting:
//! 1. Command-line argument (applied by the binary)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable overriding the database path
pub const ENV_DATABASE: &str = "ROOMSORT_DATABASE";
/// Environment variable overriding the HTTP bind address
pub const ENV_BIND: &str = "ROOMSORT_BIND";
/// Environment variable carrying the fallback-tier API key
pub const ENV_FALLBACK_API_KEY: &str = "ROOMSORT_FALLBACK_API_KEY";
/// Environment variable carrying the URL signing secret
pub const ENV_SIGNING_SECRET: &str = "ROOMSORT_SIGNING_SECRET";

/// Top-level configuration file contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// SQLite database file; defaults to `<data dir>/roomsort/roomsort.db`
    pub database_path: Option<PathBuf>,
    /// HTTP listen address
    pub bind_address: Option<String>,
    pub logging: LoggingConfig,
    pub rate_limits: RateLimitConfig,
    pub fast_tier: FastTierConfig,
    pub fallback_tier: FallbackTierConfig,
    pub storage: StorageConfig,
    pub workflow: WorkflowConfig,
    pub reconciler: ReconcilerConfig,
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive, overridden by `RUST_LOG`
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "roomsort_engine=info,roomsort_common=info,tower_http=info".to_string(),
        }
    }
}

/// Fallback-tier request budget
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Logical budget name shared by every workflow execution
    pub budget_key: String,
    pub requests_per_minute: u32,
    pub requests_per_day: u32,
    /// Rejected re-checks tolerated before a minimal allowance is forced
    pub escape_valve_after: u32,
    pub minute_wait_seconds: u64,
    pub day_wait_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            budget_key: "fallback-tier".to_string(),
            requests_per_minute: 300,
            requests_per_day: 2000,
            escape_valve_after: 3,
            minute_wait_seconds: 60,
            day_wait_seconds: 86_400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FastTierConfig {
    /// Label-detection service endpoint
    pub endpoint: String,
    /// Images per sub-batch (bounded by the detector's own batch limit)
    pub batch_size: usize,
    /// Delay between sub-batches
    pub pacing_ms: u64,
    /// Labels at or below this confidence (0-100) are ignored
    pub min_confidence: f64,
    pub max_labels: u32,
    /// Price charged per image, USD
    pub unit_price_usd: f64,
    pub request_timeout_secs: u64,
}

impl Default for FastTierConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:5801/detect-labels".to_string(),
            batch_size: 10,
            pacing_ms: 1000,
            min_confidence: 95.0,
            max_labels: 10,
            unit_price_usd: 0.001,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackTierConfig {
    /// OpenAI-compatible API base URL
    pub endpoint: String,
    /// Bearer token; usually supplied through `ROOMSORT_FALLBACK_API_KEY`
    pub api_key: Option<String>,
    pub model: String,
    /// USD per token consumed
    pub per_token_rate_usd: f64,
    /// Fallback attempts allowed per image
    pub max_tries: u32,
    /// Confidence recorded for fallback-tier labels
    pub reported_confidence: f64,
    pub request_timeout_secs: u64,
}

impl Default for FallbackTierConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            per_token_rate_usd: 0.00001,
            max_tries: 2,
            reported_confidence: 95.0,
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Public base URL of the object store
    pub base_url: String,
    /// Shared secret for URL signatures; usually `ROOMSORT_SIGNING_SECRET`
    pub signing_secret: String,
    pub source_prefix: String,
    pub resized_prefix: String,
    pub url_ttl_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5800".to_string(),
            signing_secret: "change-me".to_string(),
            source_prefix: "source-images".to_string(),
            resized_prefix: "resized-images".to_string(),
            url_ttl_secs: 3600,
        }
    }
}

/// Step retry policy: `max_retries` after the first attempt, delay
/// `interval_secs * backoff_rate^(n-1)` before retry `n`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub interval_secs: u64,
    pub backoff_rate: f64,
}

impl RetryConfig {
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            interval_secs: 0,
            backoff_rate: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// How often the step executor looks for due executions
    pub poll_interval_ms: u64,
    /// Upper bound on a single step's runtime
    pub step_timeout_secs: u64,
    /// How long a claimed step stays invisible to other executors
    pub step_lease_secs: u64,
    pub fast_tier_retry: RetryConfig,
    pub fallback_tier_retry: RetryConfig,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            step_timeout_secs: 900,
            step_lease_secs: 960,
            fast_tier_retry: RetryConfig {
                max_retries: 5,
                interval_secs: 30,
                backoff_rate: 2.0,
            },
            fallback_tier_retry: RetryConfig {
                max_retries: 30,
                interval_secs: 60,
                backoff_rate: 2.0,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Calendar days scanned, oldest first, excluding today
    pub lookback_days: u32,
    /// Executions started per sweep
    pub max_starts: usize,
    /// Images at or above this many tries are ignored by the sweep
    pub tries_ceiling: u32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 12 * 60 * 60,
            lookback_days: 3,
            max_starts: 2,
            tries_ceiling: 3,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Receives the result payload of every finished request
    pub result_webhook_url: Option<String>,
    /// Receives plain-text operator alerts
    pub alert_webhook_url: Option<String>,
}

impl TomlConfig {
    /// Load configuration from `path` (or the default location), then apply
    /// environment overrides. A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => default_config_path(),
        };

        let mut config = match path {
            Some(ref p) if p.exists() => {
                let content = std::fs::read_to_string(p)
                    .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
                let parsed = Self::from_toml_str(&content)?;
                info!("Configuration loaded from {}", p.display());
                parsed
            }
            Some(ref p) => {
                debug!("No config file at {}, using defaults", p.display());
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Apply `ROOMSORT_*` environment variables on top of file values
    pub fn apply_env_overrides(&mut self) {
        if let Some(value) = non_empty_env(ENV_DATABASE) {
            self.database_path = Some(PathBuf::from(value));
        }
        if let Some(value) = non_empty_env(ENV_BIND) {
            self.bind_address = Some(value);
        }
        if let Some(value) = non_empty_env(ENV_FALLBACK_API_KEY) {
            self.fallback_tier.api_key = Some(value);
        }
        if let Some(value) = non_empty_env(ENV_SIGNING_SECRET) {
            self.storage.signing_secret = value;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.rate_limits.requests_per_minute == 0 || self.rate_limits.requests_per_day == 0 {
            return Err(Error::Config("rate limits must be greater than zero".to_string()));
        }
        if self.fast_tier.batch_size == 0 {
            return Err(Error::Config("fast_tier.batch_size must be greater than zero".to_string()));
        }
        if self.fallback_tier.max_tries == 0 {
            return Err(Error::Config("fallback_tier.max_tries must be greater than zero".to_string()));
        }
        if self.storage.signing_secret.trim().is_empty() {
            return Err(Error::Config("storage.signing_secret must not be empty".to_string()));
        }
        if self.workflow.step_lease_secs < self.workflow.step_timeout_secs {
            return Err(Error::Config(
                "workflow.step_lease_secs must be at least workflow.step_timeout_secs".to_string(),
            ));
        }
        Ok(())
    }

    /// Database path after defaults are applied
    pub fn resolved_database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| default_data_dir().join("roomsort.db"))
    }

    pub fn resolved_bind_address(&self) -> String {
        self.bind_address
            .clone()
            .unwrap_or_else(|| "127.0.0.1:5780".to_string())
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// `~/.config/roomsort/roomsort.toml` on Linux, platform equivalent elsewhere
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("roomsort").join("roomsort.toml"))
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("roomsort"))
        .unwrap_or_else(|| PathBuf::from("./roomsort_data"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_budget_constants() {
        let config = TomlConfig::default();
        assert_eq!(config.rate_limits.requests_per_minute, 300);
        assert_eq!(config.rate_limits.requests_per_day, 2000);
        assert_eq!(config.workflow.fast_tier_retry.max_retries, 5);
        assert_eq!(config.workflow.fallback_tier_retry.interval_secs, 60);
        assert_eq!(config.reconciler.max_starts, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = TomlConfig::from_toml_str(
            r#"
            [rate_limits]
            requests_per_minute = 10

            [fast_tier]
            pacing_ms = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.rate_limits.requests_per_minute, 10);
        assert_eq!(config.rate_limits.requests_per_day, 2000);
        assert_eq!(config.fast_tier.pacing_ms, 0);
        assert_eq!(config.fast_tier.batch_size, 10);
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let mut config = TomlConfig::default();
        config.fast_tier.batch_size = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = TomlConfig::from_toml_str("rate_limits = 5").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
