//! Configuration module for Workboard.
//!
//! Loads configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::cache::CacheConfig;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} has an invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    // MongoDB
    pub mongodb_uri: String,
    pub mongodb_database: String,

    // Cache
    /// Root of the durable tiers
    pub cache_dir: PathBuf,
    /// When false the cache runs memory-only
    pub cache_durable: bool,
    pub cache_default_ttl: Duration,
    pub cache_memory_capacity: u64,
    pub cache_durable_timeout: Duration,
    pub cache_scalar_quota_bytes: usize,
    /// Period of the expired-entry sweep
    pub cache_sweep_interval: Duration,

    // Listeners
    /// Minimum interval between UI notifications per listener
    pub listener_throttle: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    /// Returns an error if `MONGODB_URI` is not set or a value is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|var| env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mongodb_uri = var("MONGODB_URI").ok_or(ConfigError::Missing("MONGODB_URI"))?;

        Ok(Self {
            mongodb_uri,
            mongodb_database: var("MONGODB_DATABASE").unwrap_or_else(|| "workboard".to_string()),
            cache_dir: var("CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./cache")),
            cache_durable: parse_bool("CACHE_DURABLE", var("CACHE_DURABLE"), true)?,
            cache_default_ttl: Duration::from_millis(parse("CACHE_DEFAULT_TTL_MS", var("CACHE_DEFAULT_TTL_MS"), 300_000)?),
            cache_memory_capacity: parse("CACHE_MEMORY_CAPACITY", var("CACHE_MEMORY_CAPACITY"), 10_000)?,
            cache_durable_timeout: Duration::from_millis(parse(
                "CACHE_DURABLE_TIMEOUT_MS",
                var("CACHE_DURABLE_TIMEOUT_MS"),
                250,
            )?),
            cache_scalar_quota_bytes: parse("CACHE_SCALAR_QUOTA_BYTES", var("CACHE_SCALAR_QUOTA_BYTES"), 5 * 1024 * 1024)?,
            cache_sweep_interval: Duration::from_secs(parse_positive(
                "CACHE_SWEEP_INTERVAL_SECS",
                var("CACHE_SWEEP_INTERVAL_SECS"),
                60,
            )?),
            listener_throttle: Duration::from_millis(parse("LISTENER_THROTTLE_MS", var("LISTENER_THROTTLE_MS"), 1_000)?),
        })
    }

    /// Store configuration derived from the cache settings.
    pub fn cache_config(&self) -> CacheConfig {
        let config = CacheConfig::with_capacity(self.cache_memory_capacity)
            .default_ttl(self.cache_default_ttl)
            .durable_timeout(self.cache_durable_timeout)
            .scalar_quota(self.cache_scalar_quota_bytes);

        if self.cache_durable {
            config.durable_dir(&self.cache_dir)
        } else {
            config
        }
    }
}

fn parse<T>(name: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => {
            let parsed = raw.parse::<T>();
            parsed.map_err(|e| ConfigError::Invalid {
                var: name,
                reason: e.to_string(),
                value: raw,
            })
        }
    }
}

/// Like [`parse`], but zero is rejected.
fn parse_positive(name: &'static str, value: Option<String>, default: u64) -> Result<u64, ConfigError> {
    match parse(name, value, default)? {
        0 => Err(ConfigError::Invalid {
            var: name,
            value: "0".to_string(),
            reason: "must be greater than zero".to_string(),
        }),
        n => Ok(n),
    }
}

fn parse_bool(name: &'static str, value: Option<String>, default: bool) -> Result<bool, ConfigError> {
    let lowered = value.as_deref().map(str::to_lowercase);
    match lowered.as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(_) => Err(ConfigError::Invalid {
            var: name,
            value: value.unwrap_or_default(),
            reason: "expected true or false".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("MONGODB_URI", "mongodb://localhost:27017")]).unwrap();

        assert_eq!(config.mongodb_database, "workboard");
        assert_eq!(config.cache_dir, PathBuf::from("./cache"));
        assert!(config.cache_durable);
        assert_eq!(config.cache_default_ttl, Duration::from_millis(300_000));
        assert_eq!(config.cache_memory_capacity, 10_000);
        assert_eq!(config.cache_durable_timeout, Duration::from_millis(250));
        assert_eq!(config.cache_scalar_quota_bytes, 5_242_880);
        assert_eq!(config.cache_sweep_interval, Duration::from_secs(60));
        assert_eq!(config.listener_throttle, Duration::from_secs(1));
    }

    #[test]
    fn test_missing_uri() {
        let err = load(&[]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("MONGODB_URI")));
        assert!(load(&[("MONGODB_URI", "  ")]).is_err());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("MONGODB_URI", "mongodb://db"),
            ("MONGODB_DATABASE", "ops"),
            ("CACHE_DURABLE", "off"),
            ("CACHE_DEFAULT_TTL_MS", "1000"),
            ("LISTENER_THROTTLE_MS", "250"),
        ])
        .unwrap();

        assert_eq!(config.mongodb_database, "ops");
        assert!(!config.cache_durable);
        assert_eq!(config.listener_throttle, Duration::from_millis(250));

        let cache = config.cache_config();
        assert!(cache.durable_dir.is_none());
        assert_eq!(cache.default_ttl, Duration::from_secs(1));
    }

    #[test]
    fn test_invalid_values() {
        let err = load(&[("MONGODB_URI", "mongodb://db"), ("CACHE_MEMORY_CAPACITY", "lots")]).unwrap_err();
        assert!(err.to_string().contains("CACHE_MEMORY_CAPACITY"));

        let err = load(&[("MONGODB_URI", "mongodb://db"), ("CACHE_DURABLE", "maybe")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "CACHE_DURABLE", .. }));
    }

    #[test]
    fn test_zero_sweep_interval_rejected() {
        let err = load(&[("MONGODB_URI", "mongodb://db"), ("CACHE_SWEEP_INTERVAL_SECS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "CACHE_SWEEP_INTERVAL_SECS", .. }));

        let config = load(&[("MONGODB_URI", "mongodb://db"), ("CACHE_SWEEP_INTERVAL_SECS", "1")]).unwrap();
        assert_eq!(config.cache_sweep_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_durable_dir_follows_cache_dir() {
        let config = load(&[("MONGODB_URI", "mongodb://db"), ("CACHE_DIR", "/var/cache/workboard")]).unwrap();
        assert_eq!(
            config.cache_config().durable_dir,
            Some(PathBuf::from("/var/cache/workboard"))
        );
    }
}
