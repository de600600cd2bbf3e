//! Volume registry: mounted volumes and path resolution.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::{VfsError, VfsResult};
use crate::locked::{Locked, VOLUME_LOCK};
use crate::path::{Location, VfsPath};
use crate::volume::{Volume, VolumeState};

#[derive(Default)]
struct VolumeTable {
    volumes: BTreeMap<String, Arc<Volume>>,
    /// Names reserved by a mount in progress, with their driver.
    mounting: BTreeMap<String, String>,
    default: Option<String>,
    next_sequence: u64,
}

impl VolumeTable {
    fn name_taken(&self, name: &str) -> bool {
        self.volumes.contains_key(name) || self.mounting.contains_key(name)
    }

    fn uses_driver(&self, driver: &str) -> bool {
        self.volumes.values().any(|v| v.driver_name() == driver)
            || self.mounting.values().any(|d| d == driver)
    }
}

/// Mounted volumes keyed by name.
pub struct VolumeRegistry {
    table: Locked<VolumeTable>,
}

impl Default for VolumeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl VolumeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            table: Locked::new(VOLUME_LOCK, VolumeTable::default()),
        }
    }

    /// Reserve `name` for a mount about to run on `driver`.
    ///
    /// Returns the mount sequence number.
    pub(crate) fn reserve(&self, name: &str, driver: &str) -> VfsResult<u64> {
        self.table.with(|t| {
            if t.name_taken(name) {
                return Err(VfsError::NameInUse(name.to_string()));
            }
            t.mounting.insert(name.to_string(), driver.to_string());
            t.next_sequence += 1;
            Ok(t.next_sequence)
        })
    }

    /// Drop a reservation after a failed mount.
    pub(crate) fn cancel(&self, name: &str) {
        self.table.with(|t| {
            t.mounting.remove(name);
        });
    }

    /// Turn a reservation into a mounted volume.
    pub(crate) fn publish(&self, volume: Arc<Volume>) {
        self.table.with(|t| {
            t.mounting.remove(volume.name());
            t.volumes.insert(volume.name().to_string(), volume);
        });
    }

    /// Detach a volume from the table, refusing while it is busy unless
    /// `force` is set. On success the volume is `Unmounting`.
    pub(crate) fn detach(&self, name: &str, force: bool) -> VfsResult<Arc<Volume>> {
        self.table.with(|t| {
            let volume = t
                .volumes
                .get(name)
                .cloned()
                .ok_or_else(|| VfsError::no_such_volume(name))?;
            if !force && volume.is_busy() {
                return Err(VfsError::busy(format!(
                    "volume {name} has {} open handles and {} dependent volumes",
                    volume.open_handles(),
                    volume.pins()
                )));
            }
            volume.set_state(VolumeState::Unmounting);
            t.volumes.remove(name);
            if t.default.as_deref() == Some(name) {
                t.default = None;
            }
            Ok(volume)
        })
    }

    /// Run `f` while holding the volume lock, provided no volume (mounted
    /// or mounting) uses `driver`.
    ///
    /// `f` must only touch registry data; it is where the driver lock is
    /// taken, giving the volumes-then-drivers order.
    pub(crate) fn while_driver_unused<R>(
        &self,
        driver: &str,
        f: impl FnOnce() -> VfsResult<R>,
    ) -> VfsResult<R> {
        self.table.with(|t| {
            if t.uses_driver(driver) {
                return Err(VfsError::busy(format!("driver {driver} has mounted volumes")));
            }
            f()
        })
    }

    /// Look up a mounted volume by name.
    pub fn get(&self, name: &str) -> VfsResult<Arc<Volume>> {
        self.table
            .with(|t| t.volumes.get(name).cloned())
            .ok_or_else(|| VfsError::no_such_volume(name))
    }

    /// Lifecycle state of a name.
    pub fn state(&self, name: &str) -> VolumeState {
        self.table.with(|t| {
            if t.mounting.contains_key(name) {
                VolumeState::Mounting
            } else if let Some(volume) = t.volumes.get(name) {
                volume.state()
            } else {
                VolumeState::Unmounted
            }
        })
    }

    /// Mounted volume names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.table.with(|t| t.volumes.keys().cloned().collect())
    }

    /// Mounted volumes, most recently mounted first.
    pub(crate) fn newest_first(&self) -> Vec<Arc<Volume>> {
        let mut volumes: Vec<_> = self.table.with(|t| t.volumes.values().cloned().collect());
        volumes.sort_by_key(|v| std::cmp::Reverse(v.sequence()));
        volumes
    }

    /// Volume used for paths no mount point claims.
    pub fn default_volume(&self) -> Option<String> {
        self.table.with(|t| t.default.clone())
    }

    /// Set or clear the fallback volume. The volume need not be mounted yet.
    pub fn set_default_volume(&self, name: Option<String>) {
        self.table.with(|t| t.default = name);
    }

    /// Find the volume that owns `loc`.
    ///
    /// An explicit `name://` picks that volume. Otherwise the mount point
    /// with the longest segment-wise prefix of the path wins, and the
    /// returned path is relative to it. Paths no mount point claims go to
    /// the default volume unchanged.
    pub fn resolve(&self, loc: &Location) -> VfsResult<(Arc<Volume>, VfsPath)> {
        let resolved = self.table.with(|t| {
            if let Some(name) = &loc.volume {
                return t
                    .volumes
                    .get(name)
                    .map(|v| (Arc::clone(v), loc.path.clone()))
                    .ok_or_else(|| VfsError::no_such_volume(name.clone()));
            }

            let mut best: Option<(usize, &Arc<Volume>, VfsPath)> = None;
            for (name, volume) in &t.volumes {
                if !name.starts_with('/') {
                    continue;
                }
                let Ok(prefix) = VfsPath::parse(name) else {
                    continue;
                };
                if let Some(rest) = loc.path.strip_prefix(&prefix) {
                    if best.as_ref().is_none_or(|(depth, _, _)| prefix.depth() > *depth) {
                        best = Some((prefix.depth(), volume, rest));
                    }
                }
            }
            if let Some((_, volume, rest)) = best {
                return Ok((Arc::clone(volume), rest));
            }

            t.default
                .as_ref()
                .and_then(|name| t.volumes.get(name))
                .map(|v| (Arc::clone(v), loc.path.clone()))
                .ok_or_else(|| VfsError::no_such_volume(loc.path.to_string()))
        })?;
        debug!(volume = resolved.0.name(), path = %resolved.1, "resolved");
        Ok(resolved)
    }
}
