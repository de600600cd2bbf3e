//! Driver capability traits.
//!
//! A filesystem driver is split in three levels, each a trait object:
//!
//! - [`FsDriver`] - registered once by name, immutable afterwards.
//! - [`VolumeOps`] - the private context a driver returns from `mount`.
//!   Owned exclusively by one [`Volume`](crate::Volume); remounting the
//!   same root always builds a fresh one.
//! - [`FileOps`] - per-open state returned from [`VolumeOps::open`].
//!
//! Every optional method defaults to `Unsupported`. Drivers advertise what
//! they really implement through [`Capabilities`], and the dispatcher
//! checks those before calling in, so the defaults are only reached by a
//! driver that under-implements its own advertisement.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::drivers::assets::AssetTable;
use crate::drivers::template::TemplateVars;
use crate::drivers::uefi::SimpleFileSystem;
use crate::error::{VfsError, VfsResult};
use crate::path::{VfsPath, normalize_volume_name};
use crate::registry::VolumeRegistry;
use crate::types::{Capabilities, DirEntry, FileAttr, OpenFlags, StatFs};
use crate::volume::PinnedVolume;

/// A named filesystem implementation for one backend kind.
pub trait FsDriver: Send + Sync {
    /// Registry key, e.g. `"posix"`.
    fn name(&self) -> &str;

    /// What volumes of this driver can do.
    fn capabilities(&self) -> Capabilities;

    /// Bind the driver to a backing root.
    fn mount(
        &self,
        root: MountRoot,
        options: &MountOptions,
        ctx: &MountContext<'_>,
    ) -> VfsResult<Box<dyn VolumeOps>>;
}

/// Per-mount driver context.
///
/// Paths are already normalized and relative to the volume root.
pub trait VolumeOps: Send + Sync {
    /// Open a file.
    fn open(&self, path: &VfsPath, flags: OpenFlags) -> VfsResult<Box<dyn FileOps>> {
        let _ = (path, flags);
        Err(VfsError::unsupported("open"))
    }

    /// Get attributes.
    fn stat(&self, path: &VfsPath) -> VfsResult<FileAttr> {
        let _ = path;
        Err(VfsError::unsupported("stat"))
    }

    /// List a directory, sorted by name.
    fn list(&self, path: &VfsPath) -> VfsResult<Vec<DirEntry>> {
        let _ = path;
        Err(VfsError::unsupported("list"))
    }

    /// Create a directory. Parents must exist.
    fn mkdir(&self, path: &VfsPath) -> VfsResult<()> {
        let _ = path;
        Err(VfsError::unsupported("mkdir"))
    }

    /// Remove a file or an empty directory.
    fn remove(&self, path: &VfsPath) -> VfsResult<()> {
        let _ = path;
        Err(VfsError::unsupported("delete"))
    }

    /// Rename within the volume.
    fn rename(&self, from: &VfsPath, to: &VfsPath) -> VfsResult<()> {
        let _ = (from, to);
        Err(VfsError::unsupported("rename"))
    }

    /// Filesystem statistics.
    fn statfs(&self) -> VfsResult<StatFs> {
        Err(VfsError::unsupported("statfs"))
    }

    /// Flush driver state. Called once when the volume is unmounted.
    fn sync(&self) -> VfsResult<()> {
        Ok(())
    }

    /// Capabilities of this particular mount, when they differ from the
    /// driver's static set (layer volumes derive theirs from the layers).
    fn capabilities(&self) -> Option<Capabilities> {
        None
    }
}

/// Per-open driver state.
///
/// The dispatcher owns the logical offset and calls positional reads and
/// writes; stream backends that cannot seek ignore `offset`.
pub trait FileOps: Send {
    /// Read up to `buf.len()` bytes at `offset`. Returns 0 at or past EOF.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> VfsResult<usize> {
        let _ = (offset, buf);
        Err(VfsError::unsupported("read"))
    }

    /// Write `buf` at `offset`, returning the bytes written.
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> VfsResult<usize> {
        let _ = (offset, buf);
        Err(VfsError::unsupported("write"))
    }

    /// Current file size.
    fn size(&mut self) -> VfsResult<u64>;

    /// Attributes of the open file.
    fn stat(&mut self) -> VfsResult<FileAttr> {
        Ok(FileAttr::file(self.size()?))
    }

    /// Truncate or extend.
    fn set_len(&mut self, size: u64) -> VfsResult<()> {
        let _ = size;
        Err(VfsError::unsupported("truncate"))
    }

    /// Push buffered data to the backing store.
    fn flush(&mut self) -> VfsResult<()> {
        Ok(())
    }
}

/// What a volume is mounted on.
///
/// Each driver accepts exactly one variant and rejects the rest with
/// `InvalidArgument`.
#[derive(Clone)]
pub enum MountRoot {
    /// No backing root.
    None,
    /// Host directory (posix, socket).
    Directory(PathBuf),
    /// Archive bytes (zip).
    Archive(Arc<[u8]>),
    /// Embedded resource table (assets).
    Assets(Arc<AssetTable>),
    /// Firmware file-system protocol (uefi).
    Protocol(Arc<dyn SimpleFileSystem>),
    /// Upper and lower volume names (overlay).
    Layers { upper: String, lower: String },
    /// One wrapped volume name (template).
    Wrap { volume: String },
}

impl MountRoot {
    /// Short variant name for logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            MountRoot::None => "none",
            MountRoot::Directory(_) => "directory",
            MountRoot::Archive(_) => "archive",
            MountRoot::Assets(_) => "assets",
            MountRoot::Protocol(_) => "protocol",
            MountRoot::Layers { .. } => "layers",
            MountRoot::Wrap { .. } => "wrap",
        }
    }

    /// Error for a driver handed the wrong kind of root.
    pub fn mismatch(&self, driver: &str, expected: &str) -> VfsError {
        VfsError::invalid(format!(
            "driver {driver} needs a {expected} root, got {}",
            self.kind()
        ))
    }
}

impl fmt::Debug for MountRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountRoot::Directory(path) => f.debug_tuple("Directory").field(path).finish(),
            MountRoot::Archive(bytes) => write!(f, "Archive({} bytes)", bytes.len()),
            MountRoot::Layers { upper, lower } => f
                .debug_struct("Layers")
                .field("upper", upper)
                .field("lower", lower)
                .finish(),
            MountRoot::Wrap { volume } => f.debug_struct("Wrap").field("volume", volume).finish(),
            other => f.write_str(other.kind()),
        }
    }
}

/// Mount-time options.
#[derive(Debug, Clone, Default)]
pub struct MountOptions {
    /// Strip every mutating capability from the volume.
    pub read_only: bool,
    /// Substitution table for the template driver.
    pub variables: TemplateVars,
    /// Driver-specific key/value options.
    pub extra: BTreeMap<String, String>,
}

impl MountOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only mount.
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Default::default()
        }
    }

    /// Attach a template variable table.
    pub fn with_variables(mut self, variables: TemplateVars) -> Self {
        self.variables = variables;
        self
    }

    /// Set a driver-specific option.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// What a driver may see of the VFS while mounting.
///
/// Layer drivers use it to pin the volumes they wrap. It is handed out
/// with no registry lock held.
pub struct MountContext<'a> {
    volumes: &'a VolumeRegistry,
}

impl<'a> MountContext<'a> {
    pub(crate) fn new(volumes: &'a VolumeRegistry) -> Self {
        Self { volumes }
    }

    /// Pin a mounted volume for the lifetime of the returned value.
    ///
    /// A pinned volume cannot be unmounted without `force`.
    pub fn pin(&self, name: &str) -> VfsResult<PinnedVolume> {
        let volume = self.volumes.get(&normalize_volume_name(name)?)?;
        Ok(PinnedVolume::new(volume))
    }
}
