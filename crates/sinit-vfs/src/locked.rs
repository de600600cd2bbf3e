//! Named registry locks.
//!
//! The VFS has exactly three pieces of shared mutable state: the driver
//! table, the volume table and the volume-info table. Each lives inside a
//! [`Locked`] so the data cannot be reached without taking its lock, and
//! access is closure-scoped so a guard never outlives the registry
//! operation that needed it.
//!
//! Rules:
//!
//! - Never call into driver code from inside a `with` closure. A driver
//!   operation may itself resolve volumes (overlay, template).
//! - When two locks are needed, take `volumes` before `drivers`.

use parking_lot::Mutex;
use tracing::trace;

/// Lock name for the driver table.
pub const DRIVER_LOCK: &str = "drivers";
/// Lock name for the volume table.
pub const VOLUME_LOCK: &str = "volumes";
/// Lock name for the volume-info table.
pub const VOLUME_INFO_LOCK: &str = "volume-infos";

/// A value guarded by a named mutex.
pub struct Locked<T> {
    name: &'static str,
    inner: Mutex<T>,
}

impl<T> Locked<T> {
    /// Wrap `value` under the lock called `name`.
    pub fn new(name: &'static str, value: T) -> Self {
        Self {
            name,
            inner: Mutex::new(value),
        }
    }

    /// Lock name, for diagnostics.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run `f` with exclusive access, blocking until the lock is free.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        trace!(lock = self.name, "acquire");
        let mut guard = self.inner.lock();
        let result = f(&mut guard);
        drop(guard);
        trace!(lock = self.name, "release");
        result
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Locked<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Locked")
            .field("name", &self.name)
            .field("inner", &"<locked>")
            .finish()
    }
}
