//! Mounted volumes.
//!
//! A [`Volume`] binds one driver instance to one backing root. It owns the
//! driver's private [`VolumeOps`] context, tracks its lifecycle state and
//! counts the handles and layer volumes that depend on it.
//!
//! ```text
//! Unmounted -> Mounting -> Mounted -> Unmounting -> Unmounted
//!                  |                      ^
//!                  +-- driver error ------+ (straight back to Unmounted)
//! ```
//!
//! `Mounting` only exists as a name reservation in the
//! [`VolumeRegistry`](crate::registry::VolumeRegistry); a `Volume` value
//! is born `Mounted`.

use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::driver::{FileOps, FsDriver, MountOptions, VolumeOps};
use crate::error::{VfsError, VfsResult};
use crate::path::VfsPath;
use crate::types::{Capabilities, DirEntry, FileAttr, OpenFlags, StatFs};

/// Volume lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum VolumeState {
    Unmounted,
    Mounting,
    Mounted,
    Unmounting,
}

impl VolumeState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => VolumeState::Mounting,
            2 => VolumeState::Mounted,
            3 => VolumeState::Unmounting,
            _ => VolumeState::Unmounted,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            VolumeState::Unmounted => 0,
            VolumeState::Mounting => 1,
            VolumeState::Mounted => 2,
            VolumeState::Unmounting => 3,
        }
    }
}

/// A live mount.
pub struct Volume {
    name: String,
    driver: Arc<dyn FsDriver>,
    /// Taken on unmount, which releases whatever the driver holds.
    ops: RwLock<Option<Box<dyn VolumeOps>>>,
    caps: Capabilities,
    state: AtomicU8,
    open_handles: AtomicUsize,
    pins: AtomicUsize,
    sequence: u64,
}

impl std::fmt::Debug for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Volume")
            .field("name", &self.name)
            .field("driver", &self.driver.name())
            .field("caps", &self.caps)
            .field("state", &self.state())
            .field("open_handles", &self.open_handles())
            .finish()
    }
}

impl Volume {
    pub(crate) fn new(
        name: String,
        driver: Arc<dyn FsDriver>,
        ops: Box<dyn VolumeOps>,
        options: &MountOptions,
        sequence: u64,
    ) -> Self {
        let mut caps = ops.capabilities().unwrap_or_else(|| driver.capabilities());
        if options.read_only {
            caps.remove(Capabilities::MUTATING);
        }
        Self {
            name,
            driver,
            ops: RwLock::new(Some(ops)),
            caps,
            state: AtomicU8::new(VolumeState::Mounted.as_u8()),
            open_handles: AtomicUsize::new(0),
            pins: AtomicUsize::new(0),
            sequence,
        }
    }

    /// Mount name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the driver this volume runs on.
    pub fn driver_name(&self) -> &str {
        self.driver.name()
    }

    /// Effective capabilities.
    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    /// Current lifecycle state.
    pub fn state(&self) -> VolumeState {
        VolumeState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Number of open file handles.
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::Acquire)
    }

    /// Number of layer volumes wrapping this one.
    pub fn pins(&self) -> usize {
        self.pins.load(Ordering::Acquire)
    }

    /// Returns true if handles or layer volumes depend on this volume.
    pub fn is_busy(&self) -> bool {
        self.open_handles() > 0 || self.pins() > 0
    }

    /// Mount order, used to tear down in reverse.
    pub(crate) fn sequence(&self) -> u64 {
        self.sequence
    }

    pub(crate) fn set_state(&self, state: VolumeState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Drop the driver context after a final `sync`.
    ///
    /// Waits for operations already running on the volume.
    pub(crate) fn release(&self) -> VfsResult<()> {
        let ops = self.ops.write().take();
        match ops {
            Some(ops) => ops.sync(),
            None => Ok(()),
        }
    }

    fn with_ops<R>(&self, f: impl FnOnce(&dyn VolumeOps) -> VfsResult<R>) -> VfsResult<R> {
        let ops = self.ops.read();
        match ops.as_deref() {
            Some(ops) => f(ops),
            None => Err(VfsError::InvalidHandle),
        }
    }

    pub(crate) fn acquire_handle(&self) {
        self.open_handles.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn release_handle(&self) {
        self.open_handles.fetch_sub(1, Ordering::AcqRel);
    }

    /// Fail with `InvalidHandle` unless the volume is still mounted.
    pub fn ensure_mounted(&self) -> VfsResult<()> {
        if self.state() == VolumeState::Mounted {
            Ok(())
        } else {
            Err(VfsError::InvalidHandle)
        }
    }

    /// Check that the volume is mounted and supports `cap`.
    ///
    /// Mutations on a volume without `WRITE` report `ReadOnly`; any other
    /// missing capability reports `Unsupported`.
    pub fn require(&self, cap: Capabilities, op: &str) -> VfsResult<()> {
        self.ensure_mounted()?;
        if Capabilities::MUTATING.intersects(cap) && !self.caps.is_writable() {
            return Err(VfsError::read_only(self.name.clone()));
        }
        if !self.caps.contains(cap) {
            return Err(VfsError::unsupported(format!("{op} on volume {}", self.name)));
        }
        Ok(())
    }

    /// Open a file and return the driver's per-open state.
    ///
    /// Layer drivers call this on the volumes they wrap; callers outside
    /// the crate want [`Vfs::open`](crate::Vfs::open), which also counts
    /// the handle.
    pub fn open_file(&self, path: &VfsPath, flags: OpenFlags) -> VfsResult<Box<dyn FileOps>> {
        if flags.is_mutating() {
            self.require(Capabilities::WRITE, "open for write")?;
        }
        if flags.read || !flags.is_mutating() {
            self.require(Capabilities::READ, "open")?;
        }
        self.with_ops(|ops| ops.open(path, flags))
    }

    /// Get attributes.
    pub fn stat(&self, path: &VfsPath) -> VfsResult<FileAttr> {
        self.require(Capabilities::STAT, "stat")?;
        self.with_ops(|ops| ops.stat(path))
    }

    /// List a directory.
    pub fn list(&self, path: &VfsPath) -> VfsResult<Vec<DirEntry>> {
        self.require(Capabilities::LIST, "list")?;
        self.with_ops(|ops| ops.list(path))
    }

    /// Create a directory.
    pub fn mkdir(&self, path: &VfsPath) -> VfsResult<()> {
        self.require(Capabilities::MKDIR, "mkdir")?;
        self.with_ops(|ops| ops.mkdir(path))
    }

    /// Remove a file or empty directory.
    pub fn remove(&self, path: &VfsPath) -> VfsResult<()> {
        self.require(Capabilities::DELETE, "delete")?;
        if path.is_root() {
            return Err(VfsError::invalid(format!("cannot remove root of volume {}", self.name)));
        }
        self.with_ops(|ops| ops.remove(path))
    }

    /// Rename within this volume.
    pub fn rename(&self, from: &VfsPath, to: &VfsPath) -> VfsResult<()> {
        self.require(Capabilities::RENAME, "rename")?;
        if from.is_root() || to.is_root() {
            return Err(VfsError::invalid("cannot rename a volume root"));
        }
        if to.starts_with(from) && to != from {
            return Err(VfsError::invalid(format!("cannot move {from} into itself")));
        }
        self.with_ops(|ops| ops.rename(from, to))
    }

    /// Filesystem statistics.
    pub fn statfs(&self) -> VfsResult<StatFs> {
        self.ensure_mounted()?;
        self.with_ops(|ops| ops.statfs())
    }
}

/// A volume held by a layer volume.
///
/// Counts as a dependency: the volume refuses a non-forced unmount while
/// any pin is alive.
pub struct PinnedVolume {
    volume: Arc<Volume>,
}

impl PinnedVolume {
    pub(crate) fn new(volume: Arc<Volume>) -> Self {
        volume.pins.fetch_add(1, Ordering::AcqRel);
        Self { volume }
    }

    /// The pinned volume.
    pub fn volume(&self) -> &Arc<Volume> {
        &self.volume
    }
}

impl Deref for PinnedVolume {
    type Target = Volume;

    fn deref(&self) -> &Volume {
        &self.volume
    }
}

impl Drop for PinnedVolume {
    fn drop(&mut self) {
        self.volume.pins.fetch_sub(1, Ordering::AcqRel);
    }
}
