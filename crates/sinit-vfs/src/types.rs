//! Core VFS types.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

bitflags! {
    /// Operations a driver (and therefore a volume) can perform.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const SEEK = 1 << 2;
        const LIST = 1 << 3;
        const STAT = 1 << 4;
        const MKDIR = 1 << 5;
        const DELETE = 1 << 6;
        const RENAME = 1 << 7;

        /// Everything that changes the backing store.
        const MUTATING = Self::WRITE.bits()
            | Self::MKDIR.bits()
            | Self::DELETE.bits()
            | Self::RENAME.bits();

        /// A read-only browsable store (assets, archives).
        const READ_ONLY = Self::READ.bits()
            | Self::SEEK.bits()
            | Self::LIST.bits()
            | Self::STAT.bits();
    }
}

impl Capabilities {
    /// Returns true if the volume accepts any mutation.
    pub fn is_writable(&self) -> bool {
        self.contains(Capabilities::WRITE)
    }
}

/// File type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
    /// UNIX domain socket.
    Socket,
    /// Device node, fifo, or anything else.
    Other,
}

impl FileType {
    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }
}

/// File attributes (metadata).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttr {
    /// Size in bytes.
    pub size: u64,
    /// File type.
    pub kind: FileType,
    /// Last modification time, if the backend records one.
    pub mtime: Option<SystemTime>,
    /// Unix permissions, if the backend has them.
    pub perm: Option<u32>,
}

impl FileAttr {
    /// Attributes for a regular file.
    pub fn file(size: u64) -> Self {
        Self {
            size,
            kind: FileType::File,
            mtime: None,
            perm: None,
        }
    }

    /// Attributes for a directory.
    pub fn directory() -> Self {
        Self {
            size: 0,
            kind: FileType::Directory,
            mtime: None,
            perm: None,
        }
    }

    /// Set the modification time.
    pub fn with_mtime(mut self, mtime: Option<SystemTime>) -> Self {
        self.mtime = mtime;
        self
    }

    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }
}

/// Directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name (not full path).
    pub name: String,
    /// Entry type.
    pub kind: FileType,
}

impl DirEntry {
    /// Create a new directory entry.
    pub fn new(name: impl Into<String>, kind: FileType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Create a file entry.
    pub fn file(name: impl Into<String>) -> Self {
        Self::new(name, FileType::File)
    }

    /// Create a directory entry.
    pub fn directory(name: impl Into<String>) -> Self {
        Self::new(name, FileType::Directory)
    }
}

/// Filesystem statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatFs {
    /// Total blocks.
    pub blocks: u64,
    /// Free blocks.
    pub bfree: u64,
    /// Available blocks (to non-root).
    pub bavail: u64,
    /// Block size.
    pub bsize: u32,
    /// Maximum name length.
    pub namelen: u32,
}

/// Open file flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    /// Read access requested.
    pub read: bool,
    /// Write access requested.
    pub write: bool,
    /// Append mode.
    pub append: bool,
    /// Create if not exists.
    pub create: bool,
    /// Truncate on open.
    pub truncate: bool,
    /// Exclusive create (fail if exists).
    pub exclusive: bool,
}

impl Default for OpenFlags {
    fn default() -> Self {
        Self {
            read: true,
            write: false,
            append: false,
            create: false,
            truncate: false,
            exclusive: false,
        }
    }
}

impl OpenFlags {
    /// Read-only access.
    pub fn read() -> Self {
        Self::default()
    }

    /// Write access (also enables read).
    pub fn write() -> Self {
        Self {
            read: true,
            write: true,
            ..Default::default()
        }
    }

    /// Create with write access.
    pub fn create() -> Self {
        Self {
            read: true,
            write: true,
            create: true,
            ..Default::default()
        }
    }

    /// Create exclusively (fail if exists).
    pub fn create_exclusive() -> Self {
        Self {
            read: true,
            write: true,
            create: true,
            exclusive: true,
            ..Default::default()
        }
    }

    /// Create and truncate.
    pub fn create_truncate() -> Self {
        Self {
            read: true,
            write: true,
            create: true,
            truncate: true,
            ..Default::default()
        }
    }

    /// Create if missing and write at the end.
    pub fn append() -> Self {
        Self {
            read: true,
            write: true,
            create: true,
            append: true,
            ..Default::default()
        }
    }

    /// Returns true if opening with these flags may modify the backing store.
    pub fn is_mutating(&self) -> bool {
        self.write || self.append || self.create || self.truncate
    }
}
