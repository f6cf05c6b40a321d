//! Value envelope codec.
//!
//! Every value written through a tier is wrapped in an envelope that records
//! when it was created and how long it may live. The envelope is what every
//! backend actually stores, so its shape is part of the external interface:
//!
//! ```text
//! {
//!   "expired_duration": 300000000000,            // i64 nanoseconds, 0 = no TTL
//!   "created_at": "2024-05-01T10:00:00.123456789Z", // RFC 3339
//!   "data": {"any": "json value"}
//! }
//! ```
//!
//! Expiry is lazy: nothing sweeps stores, readers check the envelope and
//! evict stale entries when they see them.
//!
//! Counters are the one exception. Tail tiers increment them natively and
//! store a bare decimal number, so [`Envelope::decode`] accepts a bare JSON
//! number as a persistent entry.

use crate::config::ZeroTtlPolicy;
use crate::error::{Error, Result};
use chrono::{DateTime, TimeDelta, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Stored record pairing a value with its creation time and TTL.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Declared time-to-live in nanoseconds.
    #[serde(rename = "expired_duration")]
    pub ttl_nanos: i64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// The cached value.
    pub data: Value,
    /// Set for bare counter values, which never expire by envelope.
    #[serde(skip)]
    counter: bool,
}

/// How much life an envelope has left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Past its TTL (or stale by policy); must be evicted.
    Expired,
    /// No TTL; lives until deleted.
    Persistent,
    /// Still live for the given duration.
    Live(Duration),
}

impl Freshness {
    /// `true` unless the entry is expired.
    pub fn is_live(&self) -> bool {
        !matches!(self, Freshness::Expired)
    }

    /// Native TTL to hand to a backend when re-storing the entry.
    pub fn backend_ttl(&self) -> Option<Duration> {
        match self {
            Freshness::Live(d) => Some(*d),
            _ => None,
        }
    }
}

impl Envelope {
    /// Wrap an already-converted JSON value, stamped with the current time.
    pub fn new(data: Value, ttl: Option<Duration>) -> Self {
        Envelope {
            ttl_nanos: ttl_to_nanos(ttl),
            created_at: Utc::now(),
            data,
            counter: false,
        }
    }

    /// Serialize `value` and wrap it.
    ///
    /// # Errors
    ///
    /// Returns `Error::SerializationError` if `value` cannot be represented
    /// as JSON (e.g. a map with non-string keys).
    pub fn wrap<T: Serialize + ?Sized>(value: &T, ttl: Option<Duration>) -> Result<Self> {
        let data = serde_json::to_value(value)
            .map_err(|e| Error::SerializationError(e.to_string()))?;
        Ok(Self::new(data, ttl))
    }

    /// Encode the envelope to its stored byte form.
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            log::error!("Envelope serialization failed: {}", e);
            Error::SerializationError(e.to_string())
        })
    }

    /// Decode stored bytes.
    ///
    /// # Errors
    ///
    /// Returns `Error::DeserializationError` when the bytes are neither an
    /// envelope nor a bare counter number.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        match serde_json::from_slice::<Envelope>(bytes) {
            Ok(envelope) => Ok(envelope),
            Err(e) => match serde_json::from_slice::<Value>(bytes) {
                Ok(number @ Value::Number(_)) => Ok(Envelope {
                    ttl_nanos: 0,
                    created_at: Utc::now(),
                    data: number,
                    counter: true,
                }),
                _ => {
                    log::warn!("Invalid cache envelope: {}", e);
                    Err(Error::DeserializationError(format!(
                        "invalid cache envelope: {}",
                        e
                    )))
                }
            },
        }
    }

    /// Whether the bytes were a bare counter number rather than an envelope.
    ///
    /// Counters are owned by the tail tier and are never copied forward.
    pub fn is_counter(&self) -> bool {
        self.counter
    }

    /// Declared TTL, `None` when the envelope has none.
    pub fn ttl(&self) -> Option<Duration> {
        u64::try_from(self.ttl_nanos)
            .ok()
            .filter(|n| *n > 0)
            .map(Duration::from_nanos)
    }

    /// Remaining life of the envelope at `now`.
    pub fn freshness(&self, policy: ZeroTtlPolicy, now: DateTime<Utc>) -> Freshness {
        if self.counter {
            return Freshness::Persistent;
        }
        match self.ttl_nanos {
            0 => match policy {
                ZeroTtlPolicy::NeverExpires => Freshness::Persistent,
                ZeroTtlPolicy::ExpireImmediately => Freshness::Expired,
            },
            n if n < 0 => Freshness::Expired,
            n => {
                let expires_at = self.created_at + TimeDelta::nanoseconds(n);
                match (expires_at - now).to_std() {
                    Ok(left) if !left.is_zero() => Freshness::Live(left),
                    _ => Freshness::Expired,
                }
            }
        }
    }

    /// Deserialize the wrapped value.
    pub fn into_data<T: DeserializeOwned>(self) -> Result<T> {
        Ok(serde_json::from_value(self.data)?)
    }
}

fn ttl_to_nanos(ttl: Option<Duration>) -> i64 {
    ttl.map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
