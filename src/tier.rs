//! Tier coordinator.
//!
//! A chain owns its tiers as one flat, ordered collection; neighbours are
//! found by index (`idx + 1` is next, `idx - 1` is previous). Every cascade
//! rule lives here, written once for any [`Backend`]:
//!
//! - **read-through**: the first tier holding a live envelope answers, and
//!   the value is promoted into the tiers in front of it
//! - **write-through**: a write goes to every tier from the caller's tier to
//!   the tail, stopping at the first failure (no rollback)
//! - **cascading delete**: every tier is attempted, then the tail broadcasts
//!   the deleted keys on the invalidation channel
//! - **counters**: always executed by the tail tier
//!
//! The topology never changes after construction, so no lock guards it.

use crate::backend::{Backend, KeyFilter, KeyTtl, Message, MessageHandler};
use crate::config::ZeroTtlPolicy;
use crate::envelope::{Envelope, Freshness};
use crate::error::{Error, Result};
use crate::observability::TierMetrics;
use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Channel carrying cross-process invalidation broadcasts.
///
/// The payload is the comma-joined list of deleted keys. Applications cannot
/// publish or subscribe on it through a [`crate::TieredCache`].
pub(crate) const INVALIDATION_CHANNEL: &str = "CONNECT_CHANNEL";

/// One cache level.
pub(crate) struct Tier {
    pub(crate) driver: String,
    pub(crate) backend: Box<dyn Backend>,
}

/// Ordered, owning collection of tiers.
pub(crate) struct Chain {
    tiers: Vec<Tier>,
    zero_ttl: ZeroTtlPolicy,
    metrics: Arc<dyn TierMetrics>,
    closed: AtomicBool,
}

impl Chain {
    pub(crate) fn new(
        tiers: Vec<Tier>,
        zero_ttl: ZeroTtlPolicy,
        metrics: Arc<dyn TierMetrics>,
    ) -> Self {
        Chain {
            tiers,
            zero_ttl,
            metrics,
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.tiers.len()
    }

    pub(crate) fn tier(&self, idx: usize) -> &Tier {
        &self.tiers[idx]
    }

    fn tail(&self) -> &Tier {
        &self.tiers[self.tiers.len() - 1]
    }

    /// Live envelope stored at tier `idx` itself, evicting it if stale.
    async fn read_local(&self, idx: usize, key: &str) -> Result<Option<(Vec<u8>, Envelope)>> {
        let tier = &self.tiers[idx];
        let Some(bytes) = tier.backend.get(key).await? else {
            return Ok(None);
        };

        let envelope = Envelope::decode(&bytes)?;
        if !envelope.freshness(self.zero_ttl, Utc::now()).is_live() {
            self.metrics.record_expired(idx, key);
            if let Err(e) = tier.backend.delete(&[key.to_string()]).await {
                warn!("Evicting expired {} at tier {} failed: {}", key, idx, e);
                self.metrics.record_error("expire", &e.to_string());
            }
            return Ok(None);
        }

        Ok(Some((bytes, envelope)))
    }

    /// Read-through from tier `from` toward the tail.
    ///
    /// Bare counters are answered but never promoted, so counter reads always
    /// reach the tail that increments them.
    pub(crate) async fn read(&self, from: usize, key: &str) -> Result<Option<Envelope>> {
        for idx in from..self.tiers.len() {
            if let Some((bytes, envelope)) = self.read_local(idx, key).await? {
                self.metrics.record_hit(idx, key);
                if idx > from && !envelope.is_counter() {
                    self.promote(from..idx, key, bytes, &envelope).await;
                }
                return Ok(Some(envelope));
            }
        }

        self.metrics.record_miss(key);
        Ok(None)
    }

    /// Copy a hit back into the tiers in front of the one that answered.
    ///
    /// Best-effort: failures are reported to metrics and otherwise ignored.
    /// The stored bytes are reused as-is, so the promoted copy keeps the
    /// original creation time and expires together with its source.
    async fn promote(&self, tiers: Range<usize>, key: &str, bytes: Vec<u8>, envelope: &Envelope) {
        let freshness = envelope.freshness(self.zero_ttl, Utc::now());
        if !freshness.is_live() {
            return;
        }

        for idx in tiers {
            match self.tiers[idx]
                .backend
                .put(key, bytes.clone(), freshness.backend_ttl())
                .await
            {
                Ok(()) => self.metrics.record_promotion(idx, key),
                Err(e) => {
                    warn!("Promoting {} into tier {} failed: {}", key, idx, e);
                    self.metrics.record_error("promote", &e.to_string());
                }
            }
        }
    }

    /// Existence check; no promotion side effect.
    pub(crate) async fn has(&self, from: usize, key: &str) -> Result<bool> {
        for idx in from..self.tiers.len() {
            if self.read_local(idx, key).await?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Write-through from tier `from` to the tail.
    pub(crate) async fn write(
        &self,
        from: usize,
        key: &str,
        envelope: &Envelope,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let bytes = envelope.encode()?;
        for tier in &self.tiers[from..] {
            tier.backend.put(key, bytes.clone(), ttl).await?;
        }
        Ok(())
    }

    /// Delete from tier `from` to the tail, then broadcast from the tail.
    ///
    /// Every tier is attempted; the first error is returned.
    pub(crate) async fn delete(&self, from: usize, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let mut first_error = None;
        for tier in &self.tiers[from..] {
            if let Err(e) = tier.backend.delete(keys).await {
                first_error.get_or_insert(e);
            }
        }

        let payload = keys.join(",");
        if let Err(e) = self
            .tail()
            .backend
            .publish(INVALIDATION_CHANNEL, &payload)
            .await
        {
            first_error.get_or_insert(e);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Native TTL of the key at tier `idx` only.
    pub(crate) async fn ttl(&self, idx: usize, key: &str) -> Result<KeyTtl> {
        self.tiers[idx].backend.ttl_of(key).await
    }

    /// Scan from tier `from`; the first tier with any live match answers.
    /// Results from different tiers are never merged.
    pub(crate) async fn scan(
        &self,
        from: usize,
        filter: &KeyFilter,
        limit: Option<usize>,
    ) -> Result<HashMap<String, Value>> {
        let limit = limit.filter(|n| *n > 0);
        let now = Utc::now();

        for idx in from..self.tiers.len() {
            let backend = &self.tiers[idx].backend;
            let mut found = HashMap::new();
            let mut stale = Vec::new();

            // The limit applies to live entries, so the backend scans unbounded.
            for (key, bytes) in backend.scan(filter, None).await? {
                match Envelope::decode(&bytes) {
                    Ok(envelope) if envelope.freshness(self.zero_ttl, now).is_live() => {
                        if limit.map_or(true, |max| found.len() < max) {
                            found.insert(key, envelope.data);
                        }
                    }
                    Ok(_) => stale.push(key),
                    Err(e) => warn!("Skipping undecodable key {} in scan: {}", key, e),
                }
            }

            if !stale.is_empty() {
                for key in &stale {
                    self.metrics.record_expired(idx, key);
                }
                if let Err(e) = backend.delete(&stale).await {
                    warn!("Evicting {} expired keys at tier {} failed: {}", stale.len(), idx, e);
                    self.metrics.record_error("expire", &e.to_string());
                }
            }

            if !found.is_empty() {
                return Ok(found);
            }
        }

        Ok(HashMap::new())
    }

    pub(crate) async fn increment_by(&self, key: &str, step: i64) -> Result<i64> {
        self.tail().backend.increment_by(key, step).await
    }

    pub(crate) async fn increment_by_float(&self, key: &str, step: f64) -> Result<f64> {
        self.tail().backend.increment_by_float(key, step).await
    }

    /// First remote-capable backend at or after tier `from`.
    fn messaging_backend(&self, from: usize) -> Result<&dyn Backend> {
        self.tiers[from..]
            .iter()
            .find(|tier| tier.backend.supports_remote())
            .map(|tier| tier.backend.as_ref())
            .ok_or(Error::UnsupportedPubSub)
    }

    pub(crate) async fn publish(&self, from: usize, channel: &str, payload: &str) -> Result<()> {
        reject_reserved(std::iter::once(channel))?;
        self.messaging_backend(from)?
            .publish(channel, payload)
            .await
    }

    pub(crate) async fn subscribe(
        &self,
        from: usize,
        channels: &[String],
        handler: MessageHandler,
    ) -> Result<()> {
        reject_reserved(channels.iter().map(String::as_str))?;
        self.messaging_backend(from)?
            .subscribe(channels, handler)
            .await
    }

    /// Pattern subscription; invalidation broadcasts are filtered out even
    /// when a pattern would match them.
    pub(crate) async fn psubscribe(
        &self,
        from: usize,
        patterns: &[String],
        handler: MessageHandler,
    ) -> Result<()> {
        let filtered: MessageHandler = Arc::new(move |message: Message| -> BoxFuture<'static, ()> {
            if message.channel == INVALIDATION_CHANNEL {
                Box::pin(async {})
            } else {
                handler(message)
            }
        });
        self.messaging_backend(from)?
            .psubscribe(patterns, filtered)
            .await
    }

    /// Subscribe every remote-capable tier after the head to the
    /// invalidation channel.
    pub(crate) async fn listen_for_invalidations(self: &Arc<Self>) -> Result<()> {
        for idx in 1..self.tiers.len() {
            if !self.tiers[idx].backend.supports_remote() {
                continue;
            }

            let chain = Arc::downgrade(self);
            let handler: MessageHandler = Arc::new(move |message: Message| -> BoxFuture<'static, ()> {
                let chain = chain.clone();
                Box::pin(async move {
                    if let Some(chain) = chain.upgrade() {
                        chain.evict_upstream(idx, &message.payload).await;
                    }
                })
            });

            self.tiers[idx]
                .backend
                .subscribe(&[INVALIDATION_CHANNEL.to_string()], handler)
                .await?;
            debug!(
                "Tier {} ({}) listening for invalidations",
                idx, self.tiers[idx].driver
            );
        }
        Ok(())
    }

    /// Evict broadcast keys from every tier in front of `idx`.
    ///
    /// Local evictions only: nothing cascades and nothing is re-published.
    /// Failures are logged; the listener keeps running.
    async fn evict_upstream(&self, idx: usize, payload: &str) {
        let keys: Vec<String> = payload
            .split(',')
            .filter(|key| !key.is_empty())
            .map(str::to_string)
            .collect();
        if keys.is_empty() {
            return;
        }

        for up in 0..idx {
            match self.tiers[up].backend.delete(&keys).await {
                Ok(_) => self.metrics.record_invalidation(up, &keys),
                Err(e) => {
                    warn!("Invalidation of {:?} at tier {} failed: {}", keys, up, e);
                    self.metrics.record_error("invalidate", &e.to_string());
                }
            }
        }
    }

    /// Close every tier in construction order, once.
    pub(crate) async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        close_tiers(&self.tiers).await
    }
}

/// Close tiers in order, attempting all of them and keeping the first error.
pub(crate) async fn close_tiers(tiers: &[Tier]) -> Result<()> {
    let mut first_error = None;
    for tier in tiers {
        if let Err(e) = tier.backend.close().await {
            warn!("Closing {} tier failed: {}", tier.driver, e);
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn reject_reserved<'a>(mut channels: impl Iterator<Item = &'a str>) -> Result<()> {
    match channels.find(|c| *c == INVALIDATION_CHANNEL) {
        Some(channel) => Err(Error::ReservedChannel(channel.to_string())),
        None => Ok(()),
    }
}
