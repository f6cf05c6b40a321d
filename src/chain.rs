//! Chain construction.
//!
//! A chain is built from two or more [`DriverConfig`]s, head first. Each
//! config is opened through the driver registry; the last tier must be
//! remote-capable so deletions can be broadcast to other processes. Any
//! failure closes the backends already opened before the error is returned.

use crate::cache::TieredCache;
use crate::config::{DriverConfig, ZeroTtlPolicy};
use crate::error::{Error, Result};
use crate::observability::{NoOpMetrics, TierMetrics};
use crate::registry::open_backend;
use crate::tier::{close_tiers, Chain, Tier};
use std::sync::Arc;

/// Minimum number of tiers in a chain.
pub const MIN_TIERS: usize = 2;

/// Builder for a [`TieredCache`] chain.
///
/// # Example
///
/// ```no_run
/// use cache_tiers::{ChainBuilder, DriverConfig, ZeroTtlPolicy};
/// use cache_tiers::observability::LogMetrics;
/// use std::sync::Arc;
///
/// # async fn example() -> cache_tiers::Result<()> {
/// let cache = ChainBuilder::new(vec![
///     DriverConfig::new("memory"),
///     DriverConfig::new("redis").with_option("url", "redis://localhost:6379"),
/// ])
/// .with_zero_ttl_policy(ZeroTtlPolicy::NeverExpires)
/// .with_metrics(Arc::new(LogMetrics))
/// .build()
/// .await?;
/// # Ok(())
/// # }
/// ```
pub struct ChainBuilder {
    configs: Vec<DriverConfig>,
    zero_ttl: ZeroTtlPolicy,
    metrics: Arc<dyn TierMetrics>,
}

impl ChainBuilder {
    /// Start a builder from tier configurations, head first.
    pub fn new(configs: Vec<DriverConfig>) -> Self {
        ChainBuilder {
            configs,
            zero_ttl: ZeroTtlPolicy::default(),
            metrics: Arc::new(NoOpMetrics),
        }
    }

    /// How entries stored without a TTL are treated on read.
    pub fn with_zero_ttl_policy(mut self, policy: ZeroTtlPolicy) -> Self {
        self.zero_ttl = policy;
        self
    }

    /// Set custom metrics handler.
    pub fn with_metrics(mut self, metrics: Arc<dyn TierMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Open every tier and link them into a chain.
    ///
    /// # Errors
    ///
    /// - `Error::ConfigError` for fewer than two configs (nothing is opened)
    ///   or a tail tier without remote support
    /// - `Error::DriverNotRegistered` for an unknown driver name
    /// - any error returned by a driver's `connect`, or by subscribing to
    ///   the invalidation channel
    pub async fn build(self) -> Result<TieredCache> {
        if self.configs.len() < MIN_TIERS {
            return Err(Error::ConfigError(format!(
                "a cache chain needs at least {} tiers, got {}",
                MIN_TIERS,
                self.configs.len()
            )));
        }

        let mut tiers = Vec::with_capacity(self.configs.len());
        for config in &self.configs {
            match open_backend(config).await {
                Ok(backend) => tiers.push(Tier {
                    driver: config.driver.clone(),
                    backend,
                }),
                Err(e) => return Err(abandon(&tiers, e).await),
            }
        }

        let tail_is_remote = tiers
            .last()
            .is_some_and(|tier| tier.backend.supports_remote());
        if !tail_is_remote {
            let tail = self.configs[self.configs.len() - 1].driver.clone();
            let e = Error::ConfigError(format!(
                "the last tier ({}) must support remote publish/subscribe",
                tail
            ));
            return Err(abandon(&tiers, e).await);
        }

        let drivers: Vec<String> = tiers.iter().map(|tier| tier.driver.clone()).collect();
        let chain = Arc::new(Chain::new(tiers, self.zero_ttl, self.metrics));
        if let Err(e) = chain.listen_for_invalidations().await {
            if let Err(close_error) = chain.close().await {
                warn!("Closing abandoned chain failed: {}", close_error);
            }
            return Err(e);
        }

        info!("✓ Cache chain built: {}", drivers.join(" -> "));
        Ok(TieredCache::new(chain))
    }
}

impl TieredCache {
    /// Build a chain with default options. Shorthand for
    /// `ChainBuilder::new(configs).build()`.
    pub async fn from_configs(configs: Vec<DriverConfig>) -> Result<TieredCache> {
        ChainBuilder::new(configs).build().await
    }
}

/// Close partially built tiers, returning the error that aborted the build.
async fn abandon(tiers: &[Tier], e: Error) -> Error {
    warn!("Cache chain construction failed: {}", e);
    if let Err(close_error) = close_tiers(tiers).await {
        warn!("Closing abandoned tiers failed: {}", close_error);
    }
    e
}
