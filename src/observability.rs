//! Observability hooks for tier coordination.
//!
//! Implement [`TierMetrics`] to feed hits, misses, promotions and
//! invalidations into your monitoring system:
//!
//! ```ignore
//! use cache_tiers::observability::TierMetrics;
//!
//! struct PrometheusMetrics;
//!
//! impl TierMetrics for PrometheusMetrics {
//!     fn record_hit(&self, tier: usize, _key: &str) {
//!         // counter!("cache_hits", "tier" => tier.to_string()).inc();
//!     }
//!     // ... implement other methods
//! }
//!
//! // let cache = ChainBuilder::new(configs)
//! //     .with_metrics(Arc::new(PrometheusMetrics))
//! //     .build()
//! //     .await?;
//! ```
//!
//! Tiers are identified by their index in the chain, 0 being the head.
//! The default is [`NoOpMetrics`]; [`LogMetrics`] writes every event to the
//! `log` facade.

/// Trait for tier event collection.
pub trait TierMetrics: Send + Sync {
    /// A read was answered by `tier`.
    fn record_hit(&self, tier: usize, key: &str) {
        debug!("Cache HIT: {} at tier {}", key, tier);
    }

    /// A read missed every tier.
    fn record_miss(&self, key: &str) {
        debug!("Cache MISS: {}", key);
    }

    /// A value was copied back into `tier` after a miss there.
    fn record_promotion(&self, tier: usize, key: &str) {
        debug!("Cache PROMOTE: {} into tier {}", key, tier);
    }

    /// An expired entry was evicted from `tier` on read.
    fn record_expired(&self, tier: usize, key: &str) {
        debug!("Cache EXPIRED: {} at tier {}", key, tier);
    }

    /// Keys were evicted from `tier` because of an invalidation broadcast.
    fn record_invalidation(&self, tier: usize, keys: &[String]) {
        debug!("Cache INVALIDATE: {:?} at tier {}", keys, tier);
    }

    /// A failure that was swallowed rather than returned.
    fn record_error(&self, operation: &str, error: &str) {
        warn!("Cache ERROR during {}: {}", operation, error);
    }
}

/// Default metrics implementation (no-op).
#[derive(Clone, Default)]
pub struct NoOpMetrics;

impl TierMetrics for NoOpMetrics {
    fn record_hit(&self, _tier: usize, _key: &str) {}
    fn record_miss(&self, _key: &str) {}
    fn record_promotion(&self, _tier: usize, _key: &str) {}
    fn record_expired(&self, _tier: usize, _key: &str) {}
    fn record_invalidation(&self, _tier: usize, _keys: &[String]) {}
    fn record_error(&self, _operation: &str, _error: &str) {}
}

/// Metrics implementation that logs each event.
#[derive(Clone, Default)]
pub struct LogMetrics;

impl TierMetrics for LogMetrics {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_metrics_are_object_safe() {
        let sinks: Vec<Arc<dyn TierMetrics>> = vec![Arc::new(NoOpMetrics), Arc::new(LogMetrics)];
        for sink in sinks {
            sink.record_hit(0, "k");
            sink.record_miss("k");
            sink.record_invalidation(1, &["k".to_string()]);
            sink.record_error("set", "boom");
        }
    }
}
