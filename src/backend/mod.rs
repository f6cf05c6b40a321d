//! Backend capability contract and built-in storage drivers.
//!
//! A backend supplies raw primitives only: bytes in, bytes out, plus
//! scanning, counters and (for remote-capable stores) pub/sub. All cache
//! semantics (envelopes, expiry, promotion, write-through, invalidation)
//! live in the tier coordinator, which works with any backend.

use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::{InMemoryBackend, MemoryDriver, SharedMemoryDriver, SharedMemoryOptions};
#[cfg(feature = "redis")]
pub use redis::{RedisBackend, RedisConfig, RedisDriver};

/// A message delivered to a subscription handler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Channel the message was published on.
    pub channel: String,
    /// Pattern that matched, for pattern subscriptions.
    pub pattern: Option<String>,
    /// Message body.
    pub payload: String,
}

/// Callback run by a subscription's delivery task, one message at a time.
pub type MessageHandler = Arc<dyn Fn(Message) -> BoxFuture<'static, ()> + Send + Sync>;

/// Build a [`MessageHandler`] from a synchronous closure.
///
/// # Example
///
/// ```
/// use cache_tiers::backend::{handler_fn, Message};
///
/// let handler = handler_fn(|msg: Message| println!("{}: {}", msg.channel, msg.payload));
/// # let _ = handler;
/// ```
pub fn handler_fn<F>(f: F) -> MessageHandler
where
    F: Fn(Message) + Send + Sync + 'static,
{
    Arc::new(move |message| -> BoxFuture<'static, ()> {
        f(message);
        Box::pin(async {})
    })
}

/// Delivery tasks owned by a backend.
///
/// Tasks are aborted by [`Subscriptions::abort_all`] (called from
/// [`Backend::close`]) or when the set is dropped.
#[derive(Default)]
pub struct Subscriptions {
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Subscriptions {
    /// Take ownership of a delivery task.
    pub fn push(&self, task: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);
    }

    /// Abort every task, returning how many were running.
    pub fn abort_all(&self) -> usize {
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in &tasks {
            task.abort();
        }
        tasks.len()
    }
}

impl Drop for Subscriptions {
    fn drop(&mut self) {
        self.abort_all();
    }
}

/// Key predicate used by scans.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyFilter {
    /// Keys starting with the string.
    Prefix(String),
    /// Keys ending with the string.
    Suffix(String),
    /// Keys containing the string.
    Contains(String),
}

impl KeyFilter {
    /// Apply the predicate to a raw key.
    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyFilter::Prefix(s) => key.starts_with(s.as_str()),
            KeyFilter::Suffix(s) => key.ends_with(s.as_str()),
            KeyFilter::Contains(s) => key.contains(s.as_str()),
        }
    }

    /// Equivalent glob pattern (Redis `MATCH` syntax), with glob
    /// metacharacters in the search string escaped.
    pub fn to_glob(&self) -> String {
        match self {
            KeyFilter::Prefix(s) => format!("{}*", escape_glob(s)),
            KeyFilter::Suffix(s) => format!("*{}", escape_glob(s)),
            KeyFilter::Contains(s) => format!("*{}*", escape_glob(s)),
        }
    }
}

fn escape_glob(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Glob matching with Redis semantics: `*`, `?`, `[set]`, `[^set]`,
/// `[a-z]` and `\` escapes.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
            continue;
        }
        if pi < p.len() {
            if let Some(next) = match_one(&p, pi, t[ti]) {
                pi = next;
                ti += 1;
                continue;
            }
        }
        match star {
            Some((sp, st)) => {
                pi = sp + 1;
                ti = st + 1;
                star = Some((sp, st + 1));
            }
            None => return false,
        }
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// Match the pattern token at `pi` against `c`, returning the index of the
/// next token on success.
fn match_one(p: &[char], pi: usize, c: char) -> Option<usize> {
    match p[pi] {
        '?' => Some(pi + 1),
        '\\' if pi + 1 < p.len() => (p[pi + 1] == c).then_some(pi + 2),
        '[' => match class_end(p, pi) {
            Some(end) => class_matches(&p[pi + 1..end], c).then_some(end + 1),
            None => (c == '[').then_some(pi + 1),
        },
        other => (other == c).then_some(pi + 1),
    }
}

fn class_end(p: &[char], open: usize) -> Option<usize> {
    let mut i = open + 1;
    while i < p.len() {
        match p[i] {
            '\\' => i += 2,
            ']' => return Some(i),
            _ => i += 1,
        }
    }
    None
}

fn class_matches(set: &[char], c: char) -> bool {
    let (negate, set) = match set.first() {
        Some('^') => (true, &set[1..]),
        _ => (false, set),
    };
    let mut hit = false;
    let mut i = 0;
    while i < set.len() {
        if set[i] == '\\' && i + 1 < set.len() {
            hit |= set[i + 1] == c;
            i += 2;
        } else if i + 2 < set.len() && set[i + 1] == '-' {
            let (lo, hi) = if set[i] <= set[i + 2] {
                (set[i], set[i + 2])
            } else {
                (set[i + 2], set[i])
            };
            hit |= lo <= c && c <= hi;
            i += 3;
        } else {
            hit |= set[i] == c;
            i += 1;
        }
    }
    hit != negate
}

/// Remaining time-to-live of a key as reported by a backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyTtl {
    /// The key does not exist.
    Missing,
    /// The key exists without an expiry.
    Persistent,
    /// The key expires after the given duration.
    Expires(Duration),
}

impl KeyTtl {
    /// Whether the key exists.
    pub fn is_found(&self) -> bool {
        !matches!(self, KeyTtl::Missing)
    }

    /// Remaining duration, if the key expires.
    pub fn remaining(&self) -> Option<Duration> {
        match self {
            KeyTtl::Expires(d) => Some(*d),
            _ => None,
        }
    }
}

/// Trait for storage drivers backing a tier.
///
/// All methods take `&self`; implementations use interior mutability or
/// external storage. Each backend instance is owned by exactly one tier,
/// which calls [`Backend::close`] exactly once.
///
/// Dropping a returned future cancels the call. Deadlines belong to the
/// caller (`tokio::time::timeout`) or to the driver's own configuration.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Retrieve raw bytes by key.
    ///
    /// # Returns
    /// - `Ok(Some(bytes))` - key present
    /// - `Ok(None)` - key absent
    ///
    /// # Errors
    /// Returns `Err` if a backend error occurs (connection lost, etc.)
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store raw bytes with an optional native expiry.
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Delete keys, returning how many existed.
    ///
    /// Every key is attempted; on partial failure the first error is
    /// returned. Deleting an absent key is not an error.
    async fn delete(&self, keys: &[String]) -> Result<usize>;

    /// Raw `(key, bytes)` pairs whose key satisfies `filter`, at most
    /// `limit` of them when given.
    async fn scan(&self, filter: &KeyFilter, limit: Option<usize>)
        -> Result<Vec<(String, Vec<u8>)>>;

    /// Native remaining TTL of a key.
    async fn ttl_of(&self, key: &str) -> Result<KeyTtl>;

    /// Add `step` to the integer stored at `key` (absent = 0).
    async fn increment_by(&self, key: &str, step: i64) -> Result<i64>;

    /// Add `step` to the float stored at `key` (absent = 0).
    async fn increment_by_float(&self, key: &str, step: f64) -> Result<f64>;

    /// Publish a message. Default: [`Error::UnsupportedPubSub`].
    async fn publish(&self, _channel: &str, _payload: &str) -> Result<()> {
        Err(Error::UnsupportedPubSub)
    }

    /// Subscribe to channels; `handler` runs on a task owned by the backend
    /// until [`Backend::close`]. Default: [`Error::UnsupportedPubSub`].
    async fn subscribe(&self, _channels: &[String], _handler: MessageHandler) -> Result<()> {
        Err(Error::UnsupportedPubSub)
    }

    /// Subscribe to glob patterns. Default: [`Error::UnsupportedPubSub`].
    async fn psubscribe(&self, _patterns: &[String], _handler: MessageHandler) -> Result<()> {
        Err(Error::UnsupportedPubSub)
    }

    /// Health check - verify backend is accessible.
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    /// Release connections and stop subscription tasks.
    async fn close(&self) -> Result<()>;

    /// Whether the store is shared across processes and supports pub/sub.
    fn supports_remote(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_filter_matches() {
        assert!(KeyFilter::Prefix("user:".into()).matches("user:1"));
        assert!(!KeyFilter::Prefix("user:".into()).matches("x:user:1"));
        assert!(KeyFilter::Suffix(":meta".into()).matches("doc:9:meta"));
        assert!(KeyFilter::Contains("sess".into()).matches("a:session:b"));
    }

    #[test]
    fn test_key_filter_glob_escapes() {
        assert_eq!(KeyFilter::Prefix("a*b".into()).to_glob(), "a\\*b*");
        assert_eq!(KeyFilter::Suffix("[x]".into()).to_glob(), "*\\[x\\]");
        assert_eq!(KeyFilter::Contains("?".into()).to_glob(), "*\\?*");
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*", ""));
        assert!(glob_match("user:*", "user:42"));
        assert!(glob_match("h?llo", "hello"));
        assert!(!glob_match("h?llo", "hllo"));
        assert!(glob_match("h[ae]llo", "hallo"));
        assert!(!glob_match("h[^e]llo", "hello"));
        assert!(glob_match("h[a-b]llo", "hbllo"));
        assert!(glob_match("a\\*b", "a*b"));
        assert!(!glob_match("a\\*b", "axb"));
        assert!(glob_match("*:meta", "doc:1:meta"));
        assert!(!glob_match("*:meta", "doc:1:metadata"));
        assert!(glob_match("[unclosed", "[unclosed"));
    }

    #[test]
    fn test_key_ttl_accessors() {
        assert!(!KeyTtl::Missing.is_found());
        assert!(KeyTtl::Persistent.is_found());
        assert_eq!(KeyTtl::Persistent.remaining(), None);
        assert_eq!(
            KeyTtl::Expires(Duration::from_secs(3)).remaining(),
            Some(Duration::from_secs(3))
        );
    }
}
