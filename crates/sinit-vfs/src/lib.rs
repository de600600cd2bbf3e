//! # sinit-vfs
//!
//! Layered virtual filesystem for the sinit boot environment.
//!
//! One file interface over every store the loader can reach: firmware
//! file-system protocols, host directories, embedded assets, archives,
//! and the layer volumes built from those (overlay, template).
//!
//! - [`Vfs`] - registries plus the path API (`open`, `stat`, `list`, ...)
//! - [`FsDriver`] / [`VolumeOps`] / [`FileOps`] - the driver contract
//! - [`Volume`] - a live mount, [`FileHandle`] - an open file
//! - [`VfsConfig`] - RON mount tables
//!
//! Paths are either `name://path` (explicit volume) or absolute paths
//! routed to the mount point with the longest matching prefix:
//!
//! ```no_run
//! use sinit_vfs::{Platform, Vfs};
//!
//! let vfs = Vfs::init(Platform::Hosted)?;
//! let splash = vfs.read_all("res:///splash.png")?;
//! let cmdline = vfs.read_all("/boot/cmdline")?;
//! # Ok::<(), sinit_vfs::VfsError>(())
//! ```

pub mod config;
pub mod driver;
pub mod drivers;
pub mod error;
pub mod file;
pub mod init;
pub mod locked;
mod oper;
pub mod path;
pub mod registry;
pub mod types;
pub mod vfs;
pub mod volume;

pub use config::{ConfigError, MountSpec, RootSpec, VfsConfig};
pub use driver::{FileOps, FsDriver, MountContext, MountOptions, MountRoot, VolumeOps};
pub use drivers::{AssetTable, TemplateVars};
pub use error::{VfsError, VfsResult};
pub use file::FileHandle;
pub use init::{Initiator, Platform, initiators_for};
pub use path::{Location, VfsPath};
pub use registry::{PartitionInfo, VolumeInfo, VolumeInfoRegistry};
pub use types::{Capabilities, DirEntry, FileAttr, FileType, OpenFlags, StatFs};
pub use vfs::Vfs;
pub use volume::{PinnedVolume, Volume, VolumeState};
