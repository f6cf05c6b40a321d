//! In-memory backends (thread-safe, async).
//!
//! Uses DashMap for lock-free concurrent access with per-key sharding.
//! Expired entries are dropped on access.
//!
//! Two flavours share one implementation:
//! - **local** (`memory` driver): a private store, no pub/sub. The natural
//!   head tier of a chain.
//! - **shared** (`shared-memory` driver): every backend opened with the same
//!   namespace in this process sees one store and one broadcast bus, so it
//!   behaves like a networked store with pub/sub. Two chains built on the
//!   same namespace model two processes sharing a remote tier. A namespace
//!   is dropped from the process when the last backend attached to it closes.

use super::{glob_match, Backend, KeyFilter, KeyTtl, Message, MessageHandler, Subscriptions};
use crate::config::Options;
use crate::error::{Error, Result};
use crate::registry::Driver;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::broadcast::{self, error::RecvError};

/// Messages buffered per subscriber before it starts lagging.
const BUS_CAPACITY: usize = 1024;

/// In-memory cache entry with optional expiration.
struct CacheEntry {
    data: Vec<u8>,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(data: Vec<u8>, ttl: Option<Duration>) -> Self {
        let expires_at = ttl.map(|d| Instant::now() + d);
        CacheEntry { data, expires_at }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Instant::now() > exp)
    }
}

/// A store plus its message bus.
struct Space {
    store: DashMap<String, CacheEntry>,
    bus: broadcast::Sender<Message>,
}

impl Space {
    fn new() -> Self {
        let (bus, _) = broadcast::channel(BUS_CAPACITY);
        Space {
            store: DashMap::new(),
            bus,
        }
    }
}

fn shared_spaces() -> &'static DashMap<String, Arc<Space>> {
    static SPACES: OnceLock<DashMap<String, Arc<Space>>> = OnceLock::new();
    SPACES.get_or_init(DashMap::new)
}

/// What a subscription listens to.
enum Topics {
    Channels(Vec<String>),
    Patterns(Vec<String>),
}

impl Topics {
    /// `Some(pattern)` when `channel` is routed to this subscription.
    fn route(&self, channel: &str) -> Option<Option<String>> {
        match self {
            Topics::Channels(channels) => channels.iter().any(|c| c == channel).then_some(None),
            Topics::Patterns(patterns) => patterns
                .iter()
                .find(|p| glob_match(p, channel))
                .map(|p| Some(p.clone())),
        }
    }
}

/// Thread-safe async in-memory cache backend.
///
/// # Example
///
/// ```no_run
/// use cache_tiers::backend::{Backend, InMemoryBackend};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let backend = InMemoryBackend::new();
///
///     backend.put("key1", b"value".to_vec(), None).await?;
///     assert!(backend.get("key1").await?.is_some());
///
///     backend.put("key2", b"expires".to_vec(), Some(Duration::from_secs(300))).await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct InMemoryBackend {
    space: Arc<Space>,
    namespace: Option<String>,
    subscriptions: Arc<Subscriptions>,
}

impl InMemoryBackend {
    /// Create a private, local-only backend.
    pub fn new() -> Self {
        InMemoryBackend {
            space: Arc::new(Space::new()),
            namespace: None,
            subscriptions: Arc::default(),
        }
    }

    /// Attach to the process-wide shared store named `namespace`.
    pub fn shared(namespace: &str) -> Self {
        let space = shared_spaces()
            .entry(namespace.to_string())
            .or_insert_with(|| Arc::new(Space::new()))
            .clone();
        InMemoryBackend {
            space,
            namespace: Some(namespace.to_string()),
            subscriptions: Arc::default(),
        }
    }

    /// Get the current number of entries, expired ones included.
    pub fn len(&self) -> usize {
        self.space.store.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.space.store.is_empty()
    }

    fn is_shared(&self) -> bool {
        self.namespace.is_some()
    }

    /// Forget the namespace once only the registry and this backend hold it.
    fn release_namespace(&self) {
        let Some(namespace) = &self.namespace else {
            return;
        };
        let released = shared_spaces()
            .remove_if(namespace, |_, space| {
                Arc::ptr_eq(space, &self.space) && Arc::strong_count(space) == 2
            })
            .is_some();
        if released {
            debug!("✓ SharedMemory namespace {} released", namespace);
        }
    }

    fn listen(&self, topics: Topics, handler: MessageHandler) -> Result<()> {
        if !self.is_shared() {
            return Err(Error::UnsupportedPubSub);
        }

        let mut rx = self.space.bus.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) => {
                        if let Some(pattern) = topics.route(&message.channel) {
                            handler(Message { pattern, ..message }).await;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("⚠ SharedMemory subscriber lagged, {} messages dropped", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        self.subscriptions.push(handle);
        Ok(())
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_counter<T: std::str::FromStr>(data: &[u8], key: &str) -> Result<T> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|s| s.trim().parse::<T>().ok())
        .ok_or_else(|| Error::BackendError(format!("value at {} is not a number", key)))
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(entry) = self.space.store.get(key) {
            if !entry.is_expired() {
                debug!("✓ InMemory GET {} -> HIT", key);
                return Ok(Some(entry.data.clone()));
            }
        }

        self.space.store.remove_if(key, |_, entry| entry.is_expired());
        debug!("✓ InMemory GET {} -> MISS", key);
        Ok(None)
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let entry = CacheEntry::new(value, ttl);
        self.space.store.insert(key.to_string(), entry);

        if let Some(d) = ttl {
            debug!("✓ InMemory SET {} (TTL: {:?})", key, d);
        } else {
            debug!("✓ InMemory SET {}", key);
        }

        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<usize> {
        let removed = keys
            .iter()
            .filter(|key| self.space.store.remove(key.as_str()).is_some())
            .count();

        debug!("✓ InMemory DELETE {} keys ({} existed)", keys.len(), removed);
        Ok(removed)
    }

    async fn scan(
        &self,
        filter: &KeyFilter,
        limit: Option<usize>,
    ) -> Result<Vec<(String, Vec<u8>)>> {
        let mut found = Vec::new();
        for entry in self.space.store.iter() {
            if limit.is_some_and(|max| found.len() >= max) {
                break;
            }
            if !entry.is_expired() && filter.matches(entry.key()) {
                found.push((entry.key().clone(), entry.data.clone()));
            }
        }

        debug!("✓ InMemory SCAN {:?} -> {} keys", filter, found.len());
        Ok(found)
    }

    async fn ttl_of(&self, key: &str) -> Result<KeyTtl> {
        let ttl = match self.space.store.get(key) {
            None => KeyTtl::Missing,
            Some(entry) => match entry.expires_at {
                None => KeyTtl::Persistent,
                Some(_) if entry.is_expired() => KeyTtl::Missing,
                Some(exp) => KeyTtl::Expires(exp.saturating_duration_since(Instant::now())),
            },
        };
        Ok(ttl)
    }

    async fn increment_by(&self, key: &str, step: i64) -> Result<i64> {
        let mut entry = self
            .space
            .store
            .entry(key.to_string())
            .or_insert_with(|| CacheEntry::new(b"0".to_vec(), None));
        if entry.is_expired() {
            *entry = CacheEntry::new(b"0".to_vec(), None);
        }

        let current: i64 = parse_counter(&entry.data, key)?;
        let next = current
            .checked_add(step)
            .ok_or_else(|| Error::BackendError(format!("increment overflows key {}", key)))?;
        entry.data = next.to_string().into_bytes();

        debug!("✓ InMemory INCRBY {} {} -> {}", key, step, next);
        Ok(next)
    }

    async fn increment_by_float(&self, key: &str, step: f64) -> Result<f64> {
        let mut entry = self
            .space
            .store
            .entry(key.to_string())
            .or_insert_with(|| CacheEntry::new(b"0".to_vec(), None));
        if entry.is_expired() {
            *entry = CacheEntry::new(b"0".to_vec(), None);
        }

        let current: f64 = parse_counter(&entry.data, key)?;
        let next = current + step;
        if !next.is_finite() {
            return Err(Error::BackendError(format!(
                "increment would produce NaN or Infinity at key {}",
                key
            )));
        }
        entry.data = next.to_string().into_bytes();

        debug!("✓ InMemory INCRBYFLOAT {} {} -> {}", key, step, next);
        Ok(next)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        if !self.is_shared() {
            return Err(Error::UnsupportedPubSub);
        }

        let receivers = self
            .space
            .bus
            .send(Message {
                channel: channel.to_string(),
                pattern: None,
                payload: payload.to_string(),
            })
            .unwrap_or(0);
        debug!("✓ SharedMemory PUBLISH {} -> {} receivers", channel, receivers);
        Ok(())
    }

    async fn subscribe(&self, channels: &[String], handler: MessageHandler) -> Result<()> {
        self.listen(Topics::Channels(channels.to_vec()), handler)?;
        debug!("✓ SharedMemory SUBSCRIBE {:?}", channels);
        Ok(())
    }

    async fn psubscribe(&self, patterns: &[String], handler: MessageHandler) -> Result<()> {
        self.listen(Topics::Patterns(patterns.to_vec()), handler)?;
        debug!("✓ SharedMemory PSUBSCRIBE {:?}", patterns);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let stopped = self.subscriptions.abort_all();
        if self.is_shared() {
            self.release_namespace();
        } else {
            self.space.store.clear();
        }

        debug!("✓ InMemory CLOSE ({} subscriptions stopped)", stopped);
        Ok(())
    }

    fn supports_remote(&self) -> bool {
        self.is_shared()
    }
}

/// Driver `memory`: a private local store. Accepts no options.
pub struct MemoryDriver;

#[async_trait]
impl Driver for MemoryDriver {
    fn name(&self) -> &str {
        "memory"
    }

    async fn connect(&self, _options: Options) -> Result<Box<dyn Backend>> {
        info!("✓ InMemory backend initialized");
        Ok(Box::new(InMemoryBackend::new()))
    }
}

/// Options of the `shared-memory` driver.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SharedMemoryOptions {
    /// Name of the shared store to attach to.
    pub namespace: String,
}

impl Default for SharedMemoryOptions {
    fn default() -> Self {
        SharedMemoryOptions {
            namespace: "default".to_string(),
        }
    }
}

/// Driver `shared-memory`: attaches to a process-wide shared store.
pub struct SharedMemoryDriver;

#[async_trait]
impl Driver for SharedMemoryDriver {
    fn name(&self) -> &str {
        "shared-memory"
    }

    async fn connect(&self, options: Options) -> Result<Box<dyn Backend>> {
        let options: SharedMemoryOptions = serde_json::from_value(Value::Object(options))
            .map_err(|e| Error::ConfigError(format!("parse shared-memory options failed: {}", e)))?;

        info!("✓ SharedMemory backend initialized: {}", options.namespace);
        Ok(Box::new(InMemoryBackend::shared(&options.namespace)))
    }
}
