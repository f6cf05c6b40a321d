//! Process-wide driver registry.
//!
//! Maps a driver name to the [`Driver`] that opens backends for it. The
//! built-in drivers (`memory`, `shared-memory`, and `redis` with the `redis`
//! feature) are present from first use. Register custom drivers at startup;
//! the registry is guarded by a read/write lock, so lookups during chain
//! construction are safe while other threads register or unregister.

use crate::backend::{Backend, MemoryDriver, SharedMemoryDriver};
use crate::config::{DriverConfig, Options};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

/// Factory for one kind of backend.
///
/// # Example
///
/// ```ignore
/// use cache_tiers::registry::{register_driver, Driver};
///
/// struct DiskDriver;
///
/// #[async_trait::async_trait]
/// impl Driver for DiskDriver {
///     fn name(&self) -> &str { "disk" }
///     async fn connect(&self, options: Options) -> Result<Box<dyn Backend>> {
///         Ok(Box::new(DiskBackend::open(options)?))
///     }
/// }
///
/// register_driver(Arc::new(DiskDriver));
/// ```
#[async_trait]
pub trait Driver: Send + Sync {
    /// Name used in [`DriverConfig::driver`]. Must not be empty.
    fn name(&self) -> &str;

    /// Open a backend from the driver's option bag.
    async fn connect(&self, options: Options) -> Result<Box<dyn Backend>>;
}

type DriverMap = HashMap<String, Arc<dyn Driver>>;

fn drivers() -> &'static RwLock<DriverMap> {
    static DRIVERS: OnceLock<RwLock<DriverMap>> = OnceLock::new();
    DRIVERS.get_or_init(|| {
        let mut map: DriverMap = HashMap::new();
        #[allow(unused_mut)]
        let mut builtin: Vec<Arc<dyn Driver>> =
            vec![Arc::new(MemoryDriver), Arc::new(SharedMemoryDriver)];
        #[cfg(feature = "redis")]
        builtin.push(Arc::new(crate::backend::RedisDriver));
        for driver in builtin {
            map.insert(driver.name().to_string(), driver);
        }
        RwLock::new(map)
    })
}

/// Register a driver, replacing any driver already registered under the
/// same name.
///
/// # Panics
///
/// Panics if the driver's name is empty.
pub fn register_driver(driver: Arc<dyn Driver>) {
    let name = driver.name().to_string();
    if name.is_empty() {
        panic!("cache: missing driver name");
    }

    let previous = drivers()
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(name.clone(), driver);
    if previous.is_some() {
        debug!("Driver {} re-registered", name);
    } else {
        debug!("Driver {} registered", name);
    }
}

/// Remove a driver. Unknown names are ignored.
pub fn unregister_driver(name: &str) {
    drivers()
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(name);
}

/// Look up a driver by name.
pub fn lookup_driver(name: &str) -> Option<Arc<dyn Driver>> {
    drivers()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(name)
        .cloned()
}

/// Names of all registered drivers, sorted.
pub fn registered_drivers() -> Vec<String> {
    let mut names: Vec<String> = drivers()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .keys()
        .cloned()
        .collect();
    names.sort();
    names
}

/// Open a single backend from its configuration.
///
/// # Errors
///
/// - `Error::DriverNotRegistered` for an unknown driver name
/// - whatever the driver's `connect` returns
pub async fn open_backend(config: &DriverConfig) -> Result<Box<dyn Backend>> {
    // The lock is released before connecting; connect may take a while.
    let driver = lookup_driver(&config.driver)
        .ok_or_else(|| Error::DriverNotRegistered(config.driver.clone()))?;
    driver.connect(config.options.clone()).await
}
