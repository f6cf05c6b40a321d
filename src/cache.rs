//! Caller-visible cache handle.
//!
//! A [`TieredCache`] is a cheap view of one tier of a built chain. The
//! handle returned by [`crate::ChainBuilder::build`] sits on the head tier;
//! [`TieredCache::next`] and [`TieredCache::previous`] move along the chain.
//! Every operation cascades from the handle's tier toward the tail.

use crate::backend::{Backend, KeyFilter, KeyTtl, MessageHandler};
use crate::envelope::Envelope;
use crate::error::Result;
use crate::tier::Chain;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Handle on one tier of a cache chain.
///
/// Cloning is cheap; all clones share the chain. The chain's backends stay
/// open until [`TieredCache::close`] is called on any handle.
///
/// # Example
///
/// ```no_run
/// use cache_tiers::{ChainBuilder, DriverConfig};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> cache_tiers::Result<()> {
///     let cache = ChainBuilder::new(vec![
///         DriverConfig::new("memory"),
///         DriverConfig::new("shared-memory"),
///     ])
///     .build()
///     .await?;
///
///     cache.set("foo1", "bar1", Some(Duration::from_secs(60))).await?;
///     assert_eq!(cache.get_string("foo1").await?, Some("bar1".to_string()));
///
///     cache.del(&["foo1"]).await?;
///     assert_eq!(cache.get_string("foo1").await?, None);
///
///     cache.close().await
/// }
/// ```
#[derive(Clone)]
pub struct TieredCache {
    inner: Arc<Chain>,
    position: usize,
}

impl TieredCache {
    pub(crate) fn new(inner: Arc<Chain>) -> Self {
        TieredCache { inner, position: 0 }
    }

    /// Index of this tier, 0 being the head.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Number of tiers in the chain.
    pub fn depth(&self) -> usize {
        self.inner.len()
    }

    /// Handle on the next tier toward the tail.
    pub fn next(&self) -> Option<TieredCache> {
        (self.position + 1 < self.inner.len()).then(|| TieredCache {
            inner: Arc::clone(&self.inner),
            position: self.position + 1,
        })
    }

    /// Handle on the previous tier toward the head.
    pub fn previous(&self) -> Option<TieredCache> {
        self.position.checked_sub(1).map(|position| TieredCache {
            inner: Arc::clone(&self.inner),
            position,
        })
    }

    /// Whether this tier's backend is remote-capable.
    pub fn remote_support(&self) -> bool {
        self.backend().supports_remote()
    }

    /// Driver name this tier was built from.
    pub fn driver(&self) -> &str {
        &self.inner.tier(self.position).driver
    }

    /// The raw backend of this tier, bypassing envelopes and cascading.
    pub fn backend(&self) -> &dyn Backend {
        self.inner.tier(self.position).backend.as_ref()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Read-through lookup.
    ///
    /// Tiers are tried in order; expired entries are evicted on the way.
    /// A hit on a later tier is promoted into the tiers in front of it.
    ///
    /// # Errors
    ///
    /// - `Error::DeserializationError` if the stored payload is not an
    ///   envelope or does not convert to `T`
    /// - backend errors, unchanged
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.inner.read(self.position, key).await? {
            Some(envelope) => envelope.into_data().map(Some),
            None => Ok(None),
        }
    }

    /// Like [`TieredCache::get`], returning `default` on a miss.
    pub async fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T> {
        Ok(self.get(key).await?.unwrap_or(default))
    }

    /// Like [`TieredCache::get`], returning `T::default()` on a miss.
    pub async fn get_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T> {
        Ok(self.get(key).await?.unwrap_or_default())
    }

    /// Whether a live entry exists at this tier or any later one.
    /// Nothing is promoted.
    pub async fn has(&self, key: &str) -> Result<bool> {
        self.inner.has(self.position, key).await
    }

    pub async fn get_string(&self, key: &str) -> Result<Option<String>> {
        self.get(key).await
    }

    pub async fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        self.get(key).await
    }

    pub async fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        self.get(key).await
    }

    pub async fn get_i32(&self, key: &str) -> Result<Option<i32>> {
        self.get(key).await
    }

    pub async fn get_u64(&self, key: &str) -> Result<Option<u64>> {
        self.get(key).await
    }

    pub async fn get_f64(&self, key: &str) -> Result<Option<f64>> {
        self.get(key).await
    }

    /// Timestamp stored as RFC 3339 text.
    pub async fn get_time(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        self.get(key).await
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Write-through to this tier and every later one.
    ///
    /// `None` or a zero TTL stores the value without expiry. On failure the
    /// tiers already written keep the value.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let ttl = ttl.filter(|d| !d.is_zero());
        let envelope = Envelope::wrap(value, ttl)?;
        self.inner.write(self.position, key, &envelope, ttl).await
    }

    /// Delete keys from this tier and every later one, then broadcast the
    /// deletion so other chains sharing the tail evict their copies.
    ///
    /// All tiers are attempted; the first error is returned.
    pub async fn del<K: AsRef<str>>(&self, keys: &[K]) -> Result<()> {
        let keys: Vec<String> = keys.iter().map(|k| k.as_ref().to_string()).collect();
        self.inner.delete(self.position, &keys).await
    }

    /// Native TTL of the key at this tier only.
    pub async fn ttl(&self, key: &str) -> Result<KeyTtl> {
        self.inner.ttl(self.position, key).await
    }

    // ========================================================================
    // Scans
    // ========================================================================

    /// Live entries whose key starts with `prefix`.
    ///
    /// The first tier with any match answers; results are never merged
    /// across tiers. `limit` of `None` or `Some(0)` means unlimited.
    pub async fn has_prefix(
        &self,
        prefix: &str,
        limit: Option<usize>,
    ) -> Result<HashMap<String, Value>> {
        self.scan(KeyFilter::Prefix(prefix.to_string()), limit).await
    }

    /// Live entries whose key ends with `suffix`. See [`TieredCache::has_prefix`].
    pub async fn has_suffix(
        &self,
        suffix: &str,
        limit: Option<usize>,
    ) -> Result<HashMap<String, Value>> {
        self.scan(KeyFilter::Suffix(suffix.to_string()), limit).await
    }

    /// Live entries whose key contains `needle`. See [`TieredCache::has_prefix`].
    pub async fn contains(
        &self,
        needle: &str,
        limit: Option<usize>,
    ) -> Result<HashMap<String, Value>> {
        self.scan(KeyFilter::Contains(needle.to_string()), limit).await
    }

    async fn scan(&self, filter: KeyFilter, limit: Option<usize>) -> Result<HashMap<String, Value>> {
        self.inner.scan(self.position, &filter, limit).await
    }

    // ========================================================================
    // Counters
    // ========================================================================

    /// Increment by one at the tail tier.
    pub async fn incr(&self, key: &str) -> Result<i64> {
        self.incr_by(key, 1).await
    }

    /// Add `step` at the tail tier. Cached copies in earlier tiers are
    /// neither read nor updated.
    pub async fn incr_by(&self, key: &str, step: i64) -> Result<i64> {
        self.inner.increment_by(key, step).await
    }

    /// Add a float `step` at the tail tier.
    pub async fn incr_by_float(&self, key: &str, step: f64) -> Result<f64> {
        self.inner.increment_by_float(key, step).await
    }

    // ========================================================================
    // Pub/sub
    // ========================================================================

    /// Publish on the first remote-capable tier at or after this one.
    ///
    /// # Errors
    ///
    /// - `Error::ReservedChannel` for the invalidation channel
    /// - `Error::UnsupportedPubSub` when no tier can publish
    pub async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        self.inner.publish(self.position, channel, payload).await
    }

    /// Subscribe to channels. `handler` runs on a background task until the
    /// chain is closed.
    pub async fn subscribe<C: AsRef<str>>(
        &self,
        channels: &[C],
        handler: MessageHandler,
    ) -> Result<()> {
        let channels: Vec<String> = channels.iter().map(|c| c.as_ref().to_string()).collect();
        self.inner.subscribe(self.position, &channels, handler).await
    }

    /// Subscribe to glob patterns. Invalidation broadcasts are never
    /// delivered, even to a catch-all pattern.
    pub async fn psubscribe<P: AsRef<str>>(
        &self,
        patterns: &[P],
        handler: MessageHandler,
    ) -> Result<()> {
        let patterns: Vec<String> = patterns.iter().map(|p| p.as_ref().to_string()).collect();
        self.inner.psubscribe(self.position, &patterns, handler).await
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Health check of this tier and every later one.
    pub async fn health_check(&self) -> Result<bool> {
        for idx in self.position..self.inner.len() {
            if !self.inner.tier(idx).backend.health_check().await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Close every tier of the chain in construction order.
    ///
    /// Closing is idempotent and applies to the whole chain, whichever
    /// handle it is called on. All tiers are attempted; the first error is
    /// returned.
    pub async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("position", &self.position)
            .field("depth", &self.inner.len())
            .field("driver", &self.driver())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::config::ZeroTtlPolicy;
    use crate::error::Error;
    use crate::observability::NoOpMetrics;
    use crate::tier::Tier;
    use serde::Deserialize;

    fn two_tier(policy: ZeroTtlPolicy) -> (TieredCache, InMemoryBackend, InMemoryBackend) {
        let head = InMemoryBackend::new();
        let tail = InMemoryBackend::shared(&format!("cache-test-{}", uuid::Uuid::now_v7()));
        let chain = Chain::new(
            vec![
                Tier {
                    driver: "memory".into(),
                    backend: Box::new(head.clone()),
                },
                Tier {
                    driver: "shared-memory".into(),
                    backend: Box::new(tail.clone()),
                },
            ],
            policy,
            Arc::new(NoOpMetrics),
        );
        (TieredCache::new(Arc::new(chain)), head, tail)
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq, Default)]
    struct Profile {
        name: String,
        age: u32,
    }

    #[tokio::test]
    async fn test_navigation() {
        let (cache, _, _) = two_tier(ZeroTtlPolicy::NeverExpires);

        assert_eq!(cache.position(), 0);
        assert_eq!(cache.depth(), 2);
        assert!(cache.previous().is_none());
        assert!(!cache.remote_support());

        let tail = cache.next().expect("tail tier");
        assert_eq!(tail.position(), 1);
        assert!(tail.remote_support());
        assert_eq!(tail.driver(), "shared-memory");
        assert!(tail.next().is_none());
        assert_eq!(tail.previous().map(|c| c.position()), Some(0));
    }

    #[tokio::test]
    async fn test_typed_getters() {
        let (cache, _, _) = two_tier(ZeroTtlPolicy::NeverExpires);
        let when: DateTime<Utc> = "2024-05-01T10:00:00Z".parse().unwrap();

        cache.set("s", "text", None).await.unwrap();
        cache.set("b", &true, None).await.unwrap();
        cache.set("i", &-7i64, None).await.unwrap();
        cache.set("f", &2.5f64, None).await.unwrap();
        cache.set("t", &when, None).await.unwrap();
        cache
            .set(
                "p",
                &Profile {
                    name: "ada".into(),
                    age: 36,
                },
                None,
            )
            .await
            .unwrap();

        assert_eq!(cache.get_string("s").await.unwrap(), Some("text".into()));
        assert_eq!(cache.get_bool("b").await.unwrap(), Some(true));
        assert_eq!(cache.get_i64("i").await.unwrap(), Some(-7));
        assert_eq!(cache.get_i32("i").await.unwrap(), Some(-7));
        assert_eq!(cache.get_f64("f").await.unwrap(), Some(2.5));
        assert_eq!(cache.get_time("t").await.unwrap(), Some(when));
        assert_eq!(
            cache.get::<Profile>("p").await.unwrap().map(|p| p.age),
            Some(36)
        );
    }

    #[tokio::test]
    async fn test_type_mismatch_is_error() {
        let (cache, _, _) = two_tier(ZeroTtlPolicy::NeverExpires);
        cache.set("i", &-7i64, None).await.unwrap();

        assert!(matches!(
            cache.get_u64("i").await,
            Err(Error::DeserializationError(_))
        ));
        assert!(matches!(
            cache.get_string("i").await,
            Err(Error::DeserializationError(_))
        ));
    }

    #[tokio::test]
    async fn test_defaults_on_miss() {
        let (cache, _, _) = two_tier(ZeroTtlPolicy::NeverExpires);

        assert_eq!(cache.get_or("missing", 9i32).await.unwrap(), 9);
        assert_eq!(
            cache.get_or_default::<Profile>("missing").await.unwrap(),
            Profile::default()
        );
        assert!(!cache.has("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_writes_every_tier() {
        let (cache, head, tail) = two_tier(ZeroTtlPolicy::NeverExpires);

        cache
            .set("k", "v", Some(Duration::from_secs(60)))
            .await
            .unwrap();

        assert!(head.get("k").await.unwrap().is_some());
        assert!(tail.get("k").await.unwrap().is_some());
        assert!(matches!(cache.ttl("k").await.unwrap(), KeyTtl::Expires(_)));
    }

    #[tokio::test]
    async fn test_set_on_tail_skips_head() {
        let (cache, head, _) = two_tier(ZeroTtlPolicy::NeverExpires);
        let tail = cache.next().unwrap();

        tail.set("k", "v", None).await.unwrap();
        assert!(head.is_empty());
        assert_eq!(tail.ttl("k").await.unwrap(), KeyTtl::Persistent);
        assert_eq!(cache.ttl("k").await.unwrap(), KeyTtl::Missing);

        // Head read falls through and promotes.
        assert_eq!(cache.get_string("k").await.unwrap(), Some("v".into()));
        assert!(head.get("k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_zero_ttl_is_persistent_by_default() {
        let (cache, _, _) = two_tier(ZeroTtlPolicy::NeverExpires);

        cache.set("k", "v", Some(Duration::ZERO)).await.unwrap();
        assert_eq!(cache.get_string("k").await.unwrap(), Some("v".into()));
        assert_eq!(cache.ttl("k").await.unwrap(), KeyTtl::Persistent);
    }

    #[tokio::test]
    async fn test_zero_ttl_expires_under_legacy_policy() {
        let (cache, head, tail) = two_tier(ZeroTtlPolicy::ExpireImmediately);

        cache.set("k", "v", None).await.unwrap();
        assert_eq!(cache.get_string("k").await.unwrap(), None);
        assert!(head.is_empty());
        assert!(tail.is_empty());
        assert!(!cache.has("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_counters_stay_at_tail() {
        let (cache, head, tail) = two_tier(ZeroTtlPolicy::NeverExpires);

        assert_eq!(cache.incr("hits").await.unwrap(), 1);
        assert_eq!(cache.incr_by("hits", 4).await.unwrap(), 5);
        assert!(head.get("hits").await.unwrap().is_none());
        assert_eq!(tail.get("hits").await.unwrap(), Some(b"5".to_vec()));

        // Bare counters read back through the envelope codec.
        assert_eq!(cache.get_i64("hits").await.unwrap(), Some(5));
        assert_eq!(cache.incr_by_float("ratio", 0.5).await.unwrap(), 0.5);
    }

    #[tokio::test]
    async fn test_pubsub_runs_on_remote_tier() {
        let (cache, _, _) = two_tier(ZeroTtlPolicy::NeverExpires);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        cache
            .subscribe(
                &["news"],
                crate::backend::handler_fn(move |msg| {
                    let _ = tx.send(msg.payload);
                }),
            )
            .await
            .unwrap();
        cache.publish("news", "hello").await.unwrap();

        assert_eq!(rx.recv().await.as_deref(), Some("hello"));
        assert!(matches!(
            cache.publish("CONNECT_CHANNEL", "x").await,
            Err(Error::ReservedChannel(_))
        ));
    }

    #[tokio::test]
    async fn test_debug_output() {
        let (cache, _, _) = two_tier(ZeroTtlPolicy::NeverExpires);
        let rendered = format!("{:?}", cache);
        assert!(rendered.contains("position: 0"));
        assert!(rendered.contains("memory"));
    }
}
