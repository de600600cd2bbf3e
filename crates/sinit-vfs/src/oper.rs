//! Path operations.
//!
//! Every call has the same shape: parse the caller string, resolve the
//! owning volume (the volume lock is held only for the lookup), let the
//! volume check state and capabilities, then forward to the driver.

use tracing::debug;

use crate::error::{VfsError, VfsResult};
use crate::file::FileHandle;
use crate::types::{DirEntry, FileAttr, OpenFlags};
use crate::vfs::Vfs;

impl Vfs {
    /// Open a file.
    pub fn open(&self, path: &str, flags: OpenFlags) -> VfsResult<FileHandle> {
        let (volume, rel) = self.resolve(path)?;
        let file = volume.open_file(&rel, flags)?;
        debug!(volume = volume.name(), path = %rel, ?flags, "open");
        Ok(FileHandle::new(volume, file, rel, flags))
    }

    /// Get attributes.
    pub fn stat(&self, path: &str) -> VfsResult<FileAttr> {
        let (volume, rel) = self.resolve(path)?;
        volume.stat(&rel)
    }

    /// List a directory, sorted by name.
    pub fn list(&self, path: &str) -> VfsResult<Vec<DirEntry>> {
        let (volume, rel) = self.resolve(path)?;
        volume.list(&rel)
    }

    /// Create a directory. The parent must exist.
    pub fn mkdir(&self, path: &str) -> VfsResult<()> {
        let (volume, rel) = self.resolve(path)?;
        volume.mkdir(&rel)
    }

    /// Remove a file or an empty directory.
    ///
    /// A directory with entries fails with `Busy`.
    pub fn delete(&self, path: &str) -> VfsResult<()> {
        let (volume, rel) = self.resolve(path)?;
        volume.remove(&rel)
    }

    /// Rename within one volume.
    pub fn rename(&self, from: &str, to: &str) -> VfsResult<()> {
        let (src, from) = self.resolve(from)?;
        let (dst, to) = self.resolve(to)?;
        if src.name() != dst.name() {
            return Err(VfsError::invalid(format!(
                "cross-volume rename: {} -> {}",
                src.name(),
                dst.name()
            )));
        }
        src.rename(&from, &to)
    }

    /// Returns true if `path` resolves and exists.
    ///
    /// Errors other than `NotFound` and `NoSuchVolume` are returned.
    pub fn exists(&self, path: &str) -> VfsResult<bool> {
        match self.stat(path) {
            Ok(_) => Ok(true),
            Err(VfsError::NotFound(_) | VfsError::NoSuchVolume(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Read a whole file.
    pub fn read_all(&self, path: &str) -> VfsResult<Vec<u8>> {
        let mut file = self.open(path, OpenFlags::read())?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        file.close()?;
        Ok(data)
    }

    /// Create or replace a file with `data`.
    pub fn write_all(&self, path: &str, data: &[u8]) -> VfsResult<()> {
        let mut file = self.open(path, OpenFlags::create_truncate())?;
        file.write_all(data)?;
        file.close()
    }
}
