//! The VFS facade: registries plus mount lifecycle.
//!
//! A [`Vfs`] owns the driver, volume and volume-info registries. Path
//! operations live in `oper.rs`; this file covers setup and teardown.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::driver::{FsDriver, MountContext, MountOptions, MountRoot};
use crate::error::VfsResult;
use crate::init::{Initiator, Platform, initiators_for};
use crate::path::{Location, VfsPath, normalize_volume_name};
use crate::registry::{DriverRegistry, VolumeInfoRegistry, VolumeRegistry};
use crate::types::StatFs;
use crate::volume::{Volume, VolumeState};

/// Layered virtual filesystem.
///
/// `Send + Sync`; share it behind an `Arc`.
pub struct Vfs {
    drivers: DriverRegistry,
    volumes: VolumeRegistry,
    infos: VolumeInfoRegistry,
    initiators: Vec<Initiator>,
}

impl std::fmt::Debug for Vfs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vfs")
            .field("drivers", &self.drivers.names())
            .field("volumes", &self.volumes.names())
            .finish()
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

impl Vfs {
    /// A VFS with no drivers.
    pub fn new() -> Self {
        Self {
            drivers: DriverRegistry::new(),
            volumes: VolumeRegistry::new(),
            infos: VolumeInfoRegistry::new(),
            initiators: Vec::new(),
        }
    }

    /// A VFS with the standard drivers for `platform`.
    pub fn init(platform: Platform) -> VfsResult<Self> {
        info!(%platform, "initializing vfs");
        Self::with_initiators(initiators_for(platform))
    }

    /// Run `initiators` in order.
    ///
    /// If one fails, the ones that already succeeded are deinitialized in
    /// reverse order and the original error is returned.
    pub fn with_initiators(initiators: Vec<Initiator>) -> VfsResult<Self> {
        let mut vfs = Self::new();
        for (i, init) in initiators.iter().enumerate() {
            if let Err(e) = init(&vfs, false) {
                warn!(initiator = i, error = %e, "initiator failed, rolling back");
                for undo in initiators[..i].iter().rev() {
                    if let Err(e) = undo(&vfs, true) {
                        warn!(error = %e, "rollback deinit failed");
                    }
                }
                return Err(e);
            }
        }
        vfs.initiators = initiators;
        Ok(vfs)
    }

    /// Force-unmount everything, newest first, then deinitialize drivers
    /// in reverse initiator order.
    ///
    /// Errors are logged. Calling it twice is harmless.
    pub fn shutdown(&self) {
        for volume in self.volumes.newest_first() {
            if let Err(e) = self.unmount(volume.name(), true) {
                warn!(volume = volume.name(), error = %e, "unmount on shutdown failed");
            }
        }
        for deinit in self.initiators.iter().rev() {
            if let Err(e) = deinit(self, true) {
                warn!(error = %e, "driver deinit failed");
            }
        }
        debug!("vfs shut down");
    }

    // ========================================================================
    // Drivers
    // ========================================================================

    /// Register a filesystem driver.
    pub fn register_driver(&self, driver: Arc<dyn FsDriver>) -> VfsResult<()> {
        self.drivers.register(driver)
    }

    /// Unregister a driver. Fails with `Busy` while any volume uses it.
    pub fn unregister_driver(&self, name: &str) -> VfsResult<()> {
        self.volumes
            .while_driver_unused(name, || self.drivers.remove(name))
            .map(|_| ())
    }

    /// Returns true if a driver is registered under `name`.
    pub fn has_driver(&self, name: &str) -> bool {
        self.drivers.contains(name)
    }

    /// Registered driver names, sorted.
    pub fn driver_names(&self) -> Vec<String> {
        self.drivers.names()
    }

    // ========================================================================
    // Volumes
    // ========================================================================

    /// Mount `root` under `name` using `driver`.
    ///
    /// Names starting with `/` are mount points reached by path; any other
    /// name is reached as `name://`.
    pub fn mount(
        &self,
        name: &str,
        driver: &str,
        root: MountRoot,
        options: MountOptions,
    ) -> VfsResult<Arc<Volume>> {
        let name = normalize_volume_name(name)?;
        let sequence = self.volumes.reserve(&name, driver)?;
        let ops = self.drivers.lookup(driver).and_then(|drv| {
            let ctx = MountContext::new(&self.volumes);
            drv.mount(root, &options, &ctx).map(|ops| (drv, ops))
        });
        let (drv, ops) = match ops {
            Ok(pair) => pair,
            Err(e) => {
                self.volumes.cancel(&name);
                debug!(volume = %name, driver, error = %e, "mount failed");
                return Err(e);
            }
        };

        let volume = Arc::new(Volume::new(name, drv, ops, &options, sequence));
        self.volumes.publish(Arc::clone(&volume));
        info!(
            volume = volume.name(),
            driver,
            caps = ?volume.capabilities(),
            "mounted"
        );
        Ok(volume)
    }

    /// Unmount a volume.
    ///
    /// Without `force`, fails with `Busy` while handles are open or layer
    /// volumes pin it. With `force`, outstanding handles are invalidated.
    pub fn unmount(&self, name: &str, force: bool) -> VfsResult<()> {
        let name = normalize_volume_name(name)?;
        let volume = self.volumes.detach(&name, force)?;
        if let Err(e) = volume.release() {
            warn!(volume = %name, error = %e, "sync on unmount failed");
        }
        volume.set_state(VolumeState::Unmounted);
        info!(volume = %name, force, handles = volume.open_handles(), "unmounted");
        Ok(())
    }

    /// Look up a mounted volume.
    pub fn volume(&self, name: &str) -> VfsResult<Arc<Volume>> {
        self.volumes.get(&normalize_volume_name(name)?)
    }

    /// Mounted volume names, sorted.
    pub fn volume_names(&self) -> Vec<String> {
        self.volumes.names()
    }

    /// Lifecycle state of a volume name.
    pub fn volume_state(&self, name: &str) -> VolumeState {
        match normalize_volume_name(name) {
            Ok(name) => self.volumes.state(&name),
            Err(_) => VolumeState::Unmounted,
        }
    }

    /// Set or clear the volume that receives paths no mount point claims.
    pub fn set_default_volume(&self, name: Option<&str>) -> VfsResult<()> {
        let name = name.map(normalize_volume_name).transpose()?;
        self.volumes.set_default_volume(name);
        Ok(())
    }

    /// Volume that unqualified paths resolve against, if one is set.
    pub fn default_volume(&self) -> Option<String> {
        self.volumes.default_volume()
    }

    /// Split a caller path into its volume and in-volume path.
    pub fn resolve(&self, path: &str) -> VfsResult<(Arc<Volume>, VfsPath)> {
        self.volumes.resolve(&Location::parse(path)?)
    }

    /// Filesystem statistics for a volume.
    pub fn statfs(&self, volume: &str) -> VfsResult<StatFs> {
        self.volume(volume)?.statfs()
    }

    /// Discovered storage units.
    pub fn volume_infos(&self) -> &VolumeInfoRegistry {
        &self.infos
    }
}
