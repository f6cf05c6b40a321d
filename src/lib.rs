//! # cache-tiers
//!
//! Multi-tier cache chains for Rust: compose a fast local store and a shared
//! remote store into one logical cache.
//!
//! ## Features
//!
//! - **Read-through promotion:** a miss falls through to the next tier; a hit
//!   there is copied back into the tiers in front of it
//! - **Write-through replication:** writes go to every tier down to the tail
//! - **Cross-process invalidation:** deletes are broadcast from the tail tier
//!   so other processes evict their local copies
//! - **Lazy TTLs:** every value is stored in an envelope carrying its creation
//!   time and TTL; stale entries are evicted when read
//! - **Pluggable drivers:** `memory`, `shared-memory`, `redis` (feature
//!   `redis`), or your own through [`register_driver`]
//!
//! ## Quick Start
//!
//! ```no_run
//! use cache_tiers::{ChainBuilder, DriverConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> cache_tiers::Result<()> {
//! let cache = ChainBuilder::new(vec![
//!     DriverConfig::new("memory"),
//!     DriverConfig::new("redis").with_option("url", "redis://localhost:6379/0"),
//! ])
//! .build()
//! .await?;
//!
//! cache.set("user:1", &serde_json::json!({"name": "ada"}), Some(Duration::from_secs(300))).await?;
//! let user: Option<serde_json::Value> = cache.get("user:1").await?;
//!
//! let visits = cache.incr("visits").await?;
//! cache.del(&["user:1"]).await?;
//! cache.close().await?;
//! # Ok(())
//! # }
//! ```

#[macro_use]
extern crate log;

pub mod backend;
pub mod cache;
pub mod chain;
pub mod config;
pub mod envelope;
pub mod error;
pub mod observability;
pub mod registry;
mod tier;

// Re-exports for convenience
pub use backend::{handler_fn, Backend, KeyFilter, KeyTtl, Message, MessageHandler};
pub use cache::TieredCache;
pub use chain::ChainBuilder;
pub use config::{DriverConfig, Options, ZeroTtlPolicy};
pub use envelope::Envelope;
pub use error::{Error, Result};
pub use registry::{register_driver, unregister_driver, Driver};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
