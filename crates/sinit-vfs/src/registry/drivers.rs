//! Driver registry: name -> driver.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use crate::driver::FsDriver;
use crate::error::{VfsError, VfsResult};
use crate::locked::{DRIVER_LOCK, Locked};

/// Registered filesystem drivers, keyed by name.
pub struct DriverRegistry {
    drivers: Locked<BTreeMap<String, Arc<dyn FsDriver>>>,
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            drivers: Locked::new(DRIVER_LOCK, BTreeMap::new()),
        }
    }

    /// Register a driver under its own name.
    pub fn register(&self, driver: Arc<dyn FsDriver>) -> VfsResult<()> {
        let name = driver.name().to_string();
        self.drivers.with(|drivers| {
            if drivers.contains_key(&name) {
                return Err(VfsError::AlreadyRegistered(name.clone()));
            }
            drivers.insert(name.clone(), driver);
            Ok(())
        })?;
        info!(driver = %name, "registered filesystem driver");
        Ok(())
    }

    /// Remove a driver without checking for volumes that use it.
    ///
    /// [`Vfs::unregister_driver`](crate::Vfs::unregister_driver) performs
    /// the busy check under the volume lock before calling this.
    pub(crate) fn remove(&self, name: &str) -> VfsResult<Arc<dyn FsDriver>> {
        let driver = self
            .drivers
            .with(|drivers| drivers.remove(name))
            .ok_or_else(|| VfsError::not_found(format!("driver {name}")))?;
        info!(driver = %name, "unregistered filesystem driver");
        Ok(driver)
    }

    /// Look up a driver.
    pub fn lookup(&self, name: &str) -> VfsResult<Arc<dyn FsDriver>> {
        self.drivers
            .with(|drivers| drivers.get(name).cloned())
            .ok_or_else(|| VfsError::DriverNotFound(name.to_string()))
    }

    /// Returns true if a driver with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.drivers.with(|drivers| drivers.contains_key(name))
    }

    /// Registered driver names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.drivers.with(|drivers| drivers.keys().cloned().collect())
    }

    /// Number of registered drivers.
    pub fn len(&self) -> usize {
        self.drivers.with(|drivers| drivers.len())
    }

    /// Returns true if no driver is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
