//! Declarative tier configuration.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Backend-specific option bag, forwarded verbatim to a driver.
pub type Options = Map<String, Value>;

/// One tier of a chain: which driver to use and how to configure it.
///
/// # Example
///
/// ```
/// use cache_tiers::DriverConfig;
///
/// let local = DriverConfig::new("memory");
/// let remote = DriverConfig::new("redis")
///     .with_option("url", "redis://localhost:6379/2")
///     .with_option("pool_size", 8);
/// assert_eq!(remote.options["pool_size"], 8);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Registered driver name.
    pub driver: String,
    /// Driver options; see each driver for the accepted keys.
    #[serde(default)]
    pub options: Options,
}

impl DriverConfig {
    /// Config for `driver` with no options.
    pub fn new(driver: impl Into<String>) -> Self {
        DriverConfig {
            driver: driver.into(),
            options: Options::new(),
        }
    }

    /// Add one option.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// How an envelope without a TTL (`expired_duration == 0`) is read.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZeroTtlPolicy {
    /// No TTL means the entry lives until it is deleted.
    #[default]
    NeverExpires,
    /// No TTL means the entry is already stale and is evicted on first read.
    ///
    /// Matches caches written by older deployments that stored every entry
    /// with an explicit TTL.
    ExpireImmediately,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_driver_config_from_json() {
        let config: DriverConfig = serde_json::from_value(json!({
            "driver": "redis",
            "options": {"addrs": ["127.0.0.1:6379"], "db": 2}
        }))
        .unwrap();

        assert_eq!(config.driver, "redis");
        assert_eq!(config.options["db"], json!(2));
    }

    #[test]
    fn test_driver_config_options_default_empty() {
        let config: DriverConfig = serde_json::from_value(json!({"driver": "memory"})).unwrap();
        assert!(config.options.is_empty());
    }

    #[test]
    fn test_zero_ttl_policy_default() {
        assert_eq!(ZeroTtlPolicy::default(), ZeroTtlPolicy::NeverExpires);
    }
}
