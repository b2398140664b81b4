//! Engine configuration
//!
//! Every field has a default, so an empty YAML document is a valid config.
//! Durations are written as human strings such as `"5m"` or `"30s"`.
//! Environment variables override the file; see [`EngineConfig::apply_overrides`].

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Largest integer every JSON consumer reads exactly (2^53 - 1)
pub const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub query: QueryConfig,
    pub advisor: AdvisorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Prefix of every cache key; a dataset's namespace is `<prefix><datasetId>:`
    pub key_prefix: String,
    pub memory: MemoryTierConfig,
    pub distributed: DistributedTierConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            key_prefix: "cache:data:".to_string(),
            memory: MemoryTierConfig::default(),
            distributed: DistributedTierConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryTierConfig {
    pub max_bytes: u64,
    #[serde(with = "duration_str")]
    pub default_ttl: Duration,
    /// A disabled tier re-enables once usage falls below this share of `max_bytes`
    pub reenable_ratio: f64,
    /// Share of `max_bytes` one insertion may evict before the tier gives up
    pub eviction_allowance: f64,
}

impl Default for MemoryTierConfig {
    fn default() -> Self {
        Self {
            max_bytes: 100 * 1024 * 1024,
            default_ttl: Duration::from_secs(5 * 60),
            reenable_ratio: 0.8,
            eviction_allowance: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributedTierConfig {
    pub enabled: bool,
    pub url: String,
    pub password: Option<String>,
    #[serde(with = "duration_str")]
    pub connect_timeout: Duration,
    #[serde(with = "duration_str")]
    pub command_timeout: Duration,
    #[serde(with = "duration_str")]
    pub ttl: Duration,
}

impl Default for DistributedTierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "redis://localhost:6379".to_string(),
            password: None,
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(5),
            ttl: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Numeric cells whose magnitude exceeds this are returned as strings
    pub numeric_string_threshold: f64,
    pub max_in_list: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            numeric_string_threshold: 100_000.0,
            max_in_list: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorConfig {
    pub enabled: bool,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl EngineConfig {
    /// Parse a YAML document
    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: EngineConfig = serde_yaml_ng::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML file, then apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(&path).map_err(|e| {
            EngineError::Config(format!(
                "failed to read config file {}: {e}",
                path.as_ref().display()
            ))
        })?;
        let mut config = Self::from_yaml(&text)?;
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Defaults plus environment overrides
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(|name| std::env::var(name).ok());
        config
    }

    /// Apply overrides from a variable lookup. Malformed values are logged and ignored.
    ///
    /// `CACHE_TTL` and the `REDIS_*_TIMEOUT` variables are milliseconds;
    /// `CACHE_MAX_MEMORY` is bytes.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parsed(&lookup, "CACHE_ENABLED", parse_bool) {
            self.cache.enabled = v;
        }
        if let Some(v) = parsed(&lookup, "CACHE_MAX_MEMORY", |s| s.parse::<u64>().ok()) {
            self.cache.memory.max_bytes = v;
        }
        if let Some(v) = parsed(&lookup, "CACHE_TTL", parse_millis) {
            self.cache.memory.default_ttl = v;
        }
        if let Some(v) = parsed(&lookup, "REDIS_ENABLED", parse_bool) {
            self.cache.distributed.enabled = v;
        }
        if let Some(url) = lookup("REDIS_URL").filter(|s| !s.trim().is_empty()) {
            self.cache.distributed.url = url;
        }
        if let Some(password) = lookup("REDIS_PASSWORD").filter(|s| !s.is_empty()) {
            self.cache.distributed.password = Some(password);
        }
        if let Some(v) = parsed(&lookup, "REDIS_CONNECT_TIMEOUT", parse_millis) {
            self.cache.distributed.connect_timeout = v;
        }
        if let Some(v) = parsed(&lookup, "REDIS_COMMAND_TIMEOUT", parse_millis) {
            self.cache.distributed.command_timeout = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mem = &self.cache.memory;
        if !(0.0..=1.0).contains(&mem.reenable_ratio) {
            return Err(EngineError::Config(format!(
                "cache.memory.reenable_ratio must be within 0..=1, got {}",
                mem.reenable_ratio
            )));
        }
        if !(0.0..=1.0).contains(&mem.eviction_allowance) {
            return Err(EngineError::Config(format!(
                "cache.memory.eviction_allowance must be within 0..=1, got {}",
                mem.eviction_allowance
            )));
        }
        if !(0.0..=MAX_SAFE_INTEGER).contains(&self.query.numeric_string_threshold) {
            return Err(EngineError::Config(format!(
                "query.numeric_string_threshold must be within 0..={MAX_SAFE_INTEGER}, got {}",
                self.query.numeric_string_threshold
            )));
        }
        if self.query.max_in_list == 0 {
            return Err(EngineError::Config(
                "query.max_in_list must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn parsed<T, F, P>(lookup: &F, name: &str, parse: P) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    P: Fn(&str) -> Option<T>,
{
    let raw = lookup(name)?;
    let value = parse(raw.trim());
    if value.is_none() {
        diagnostics::log_warn!(
            "Ignoring malformed {name}={raw}",
            name: name,
            raw: raw.as_str()
        );
    }
    value
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

fn parse_millis(s: &str) -> Option<Duration> {
    s.parse::<u64>().ok().map(Duration::from_millis)
}

/// Serde adapter for human-readable durations
mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = value.as_millis();
        if millis % 1000 == 0 {
            serializer.serialize_str(&format!("{}s", millis / 1000))
        } else {
            serializer.serialize_str(&format!("{millis}ms"))
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse_duration::parse(&text)
            .map_err(|e| D::Error::custom(format!("invalid duration {text:?}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.cache.enabled);
        assert_eq!(config.cache.key_prefix, "cache:data:");
        assert_eq!(config.cache.memory.max_bytes, 100 * 1024 * 1024);
        assert_eq!(config.cache.memory.default_ttl, Duration::from_secs(300));
        assert!(!config.cache.distributed.enabled);
        assert_eq!(config.query.max_in_list, 1000);
        assert!(config.advisor.enabled);
        assert_eq!(EngineConfig::from_yaml("").expect("empty"), config);
    }

    #[test]
    fn test_from_yaml() {
        let config = EngineConfig::from_yaml(
            r#"
cache:
  memory:
    max_bytes: 2048
    default_ttl: "30s"
  distributed:
    enabled: true
    url: "redis://cache:6379"
    command_timeout: "250ms"
query:
  numeric_string_threshold: 10
"#,
        )
        .expect("yaml");
        assert_eq!(config.cache.memory.max_bytes, 2048);
        assert_eq!(config.cache.memory.default_ttl, Duration::from_secs(30));
        assert_eq!(config.cache.memory.reenable_ratio, 0.8);
        assert!(config.cache.distributed.enabled);
        assert_eq!(config.cache.distributed.command_timeout, Duration::from_millis(250));
        assert_eq!(config.cache.distributed.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.query.numeric_string_threshold, 10.0);
    }

    #[test]
    fn test_yaml_round_trip_and_rejects() {
        let text = serde_yaml_ng::to_string(&EngineConfig::default()).expect("serialize");
        assert_eq!(EngineConfig::from_yaml(&text).expect("parse"), EngineConfig::default());

        assert!(EngineConfig::from_yaml("cache:\n  memory:\n    default_ttl: \"soon\"\n").is_err());
        assert!(EngineConfig::from_yaml("cache:\n  memory:\n    reenable_ratio: 3.0\n").is_err());
        assert!(EngineConfig::from_yaml("query:\n  max_in_list: 0\n").is_err());
        assert!(EngineConfig::from_yaml("query:\n  numeric_string_threshold: -1\n").is_err());
        assert!(EngineConfig::from_yaml("query:\n  numeric_string_threshold: 1e300\n").is_err());
        assert!(EngineConfig::from_yaml("query:\n  numeric_string_threshold: 9007199254740991\n").is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CACHE_MAX_MEMORY", "4096"),
            ("CACHE_TTL", "1500"),
            ("REDIS_ENABLED", "true"),
            ("REDIS_URL", "redis://other:6380"),
            ("REDIS_PASSWORD", "hunter2"),
            ("REDIS_COMMAND_TIMEOUT", "not-a-number"),
        ]
        .into_iter()
        .collect();
        let mut config = EngineConfig::default();
        config.apply_overrides(|name| vars.get(name).map(|v| (*v).to_string()));

        assert_eq!(config.cache.memory.max_bytes, 4096);
        assert_eq!(config.cache.memory.default_ttl, Duration::from_millis(1500));
        assert!(config.cache.distributed.enabled);
        assert_eq!(config.cache.distributed.url, "redis://other:6380");
        assert_eq!(config.cache.distributed.password.as_deref(), Some("hunter2"));
        // malformed value leaves the default in place
        assert_eq!(config.cache.distributed.command_timeout, Duration::from_secs(5));
    }
}
