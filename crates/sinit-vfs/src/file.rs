//! Open file handles.

use std::io::{self, SeekFrom};
use std::sync::Arc;

use tracing::warn;

use crate::driver::FileOps;
use crate::error::{VfsError, VfsResult};
use crate::path::VfsPath;
use crate::types::{Capabilities, FileAttr, OpenFlags};
use crate::volume::Volume;

const READ_CHUNK: usize = 8192;

/// An open file.
///
/// Owned by the caller from [`Vfs::open`](crate::Vfs::open) until
/// [`close`](Self::close). The handle keeps its volume alive and counted
/// as busy. It carries no lock of its own: every method takes `&mut self`,
/// and callers sharing a handle across threads must serialize access.
///
/// After `close`, or after the volume is force-unmounted, every operation
/// fails with [`VfsError::InvalidHandle`].
pub struct FileHandle {
    volume: Arc<Volume>,
    file: Option<Box<dyn FileOps>>,
    path: VfsPath,
    flags: OpenFlags,
    offset: u64,
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("volume", &self.volume.name())
            .field("path", &self.path.to_string())
            .field("offset", &self.offset)
            .field("closed", &self.file.is_none())
            .finish()
    }
}

impl FileHandle {
    pub(crate) fn new(
        volume: Arc<Volume>,
        file: Box<dyn FileOps>,
        path: VfsPath,
        flags: OpenFlags,
    ) -> Self {
        volume.acquire_handle();
        Self {
            volume,
            file: Some(file),
            path,
            flags,
            offset: 0,
        }
    }

    /// Path inside the volume.
    pub fn path(&self) -> &VfsPath {
        &self.path
    }

    /// Name of the owning volume.
    pub fn volume_name(&self) -> &str {
        self.volume.name()
    }

    /// Flags the handle was opened with.
    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    /// Returns true once `close` has run.
    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    fn check_open(&self) -> VfsResult<()> {
        self.volume.ensure_mounted()?;
        if self.file.is_none() {
            return Err(VfsError::InvalidHandle);
        }
        Ok(())
    }

    fn live(&mut self) -> VfsResult<&mut Box<dyn FileOps>> {
        self.volume.ensure_mounted()?;
        self.file.as_mut().ok_or(VfsError::InvalidHandle)
    }

    /// Read into `buf` at the current offset, advancing it.
    ///
    /// Returns fewer bytes than requested near EOF and 0 at or past it.
    pub fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        let offset = self.offset;
        let readable = self.flags.read;
        let file = self.live()?;
        if !readable {
            return Err(VfsError::invalid("handle not opened for reading"));
        }
        let n = file.read_at(offset, buf)?;
        self.offset += n as u64;
        Ok(n)
    }

    /// Read everything from the current offset to EOF.
    pub fn read_to_end(&mut self, out: &mut Vec<u8>) -> VfsResult<usize> {
        let start = out.len();
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            let n = self.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }
        Ok(out.len() - start)
    }

    /// Write `buf` at the current offset (or at EOF in append mode),
    /// advancing the offset by the bytes written.
    pub fn write(&mut self, buf: &[u8]) -> VfsResult<usize> {
        self.check_open()?;
        self.volume.require(Capabilities::WRITE, "write")?;
        let writable = self.flags.write || self.flags.append;
        let append = self.flags.append;
        let mut offset = self.offset;
        let file = self.live()?;
        if !writable {
            return Err(VfsError::invalid("handle not opened for writing"));
        }
        if append {
            offset = file.size()?;
        }
        if offset.checked_add(buf.len() as u64).is_none() {
            return Err(VfsError::invalid(format!("write at offset {offset} overflows")));
        }
        let n = file.write_at(offset, buf)?;
        self.offset = offset + n as u64;
        Ok(n)
    }

    /// Write all of `buf`, retrying short writes.
    pub fn write_all(&mut self, mut buf: &[u8]) -> VfsResult<()> {
        while !buf.is_empty() {
            let n = self.write(buf)?;
            if n == 0 {
                return Err(VfsError::io(None, "write returned zero bytes"));
            }
            buf = &buf[n..];
        }
        Ok(())
    }

    /// Move the offset.
    ///
    /// Seeking before byte 0 fails with `InvalidArgument`; seeking past
    /// EOF is allowed.
    pub fn seek(&mut self, pos: SeekFrom) -> VfsResult<u64> {
        self.check_open()?;
        self.volume.require(Capabilities::SEEK, "seek")?;
        let current = self.offset;
        let file = self.live()?;
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(delta) => current.checked_add_signed(delta),
            SeekFrom::End(delta) => file.size()?.checked_add_signed(delta),
        };
        let target =
            target.ok_or_else(|| VfsError::invalid(format!("seek out of range: {pos:?}")))?;
        self.offset = target;
        Ok(target)
    }

    /// Current offset.
    pub fn tell(&self) -> VfsResult<u64> {
        self.check_open()?;
        Ok(self.offset)
    }

    /// Current size of the file.
    pub fn size(&mut self) -> VfsResult<u64> {
        self.live()?.size()
    }

    /// Attributes of the open file.
    pub fn stat(&mut self) -> VfsResult<FileAttr> {
        self.live()?.stat()
    }

    /// Truncate or extend the file.
    pub fn set_len(&mut self, size: u64) -> VfsResult<()> {
        self.check_open()?;
        self.volume.require(Capabilities::WRITE, "truncate")?;
        let writable = self.flags.write;
        let file = self.live()?;
        if !writable {
            return Err(VfsError::invalid("handle not opened for writing"));
        }
        file.set_len(size)
    }

    /// Flush buffered data.
    pub fn flush(&mut self) -> VfsResult<()> {
        self.live()?.flush()
    }

    /// Close the handle.
    ///
    /// Flushes while the volume is still mounted, then releases the
    /// handle. The handle is released even when this fails: a handle
    /// invalidated by a forced unmount is dropped without flushing and
    /// reports `InvalidHandle`, as does closing twice.
    pub fn close(&mut self) -> VfsResult<()> {
        let mut file = self.file.take().ok_or(VfsError::InvalidHandle)?;
        let result = self.volume.ensure_mounted().and_then(|()| file.flush());
        drop(file);
        self.volume.release_handle();
        result
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        if self.file.is_none() {
            return;
        }
        match self.close() {
            Ok(()) | Err(VfsError::InvalidHandle) => {}
            Err(e) => {
                warn!(volume = self.volume.name(), path = %self.path, error = %e, "flush on drop failed");
            }
        }
    }
}

impl io::Read for FileHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        FileHandle::read(self, buf).map_err(io::Error::from)
    }
}

impl io::Write for FileHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        FileHandle::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        FileHandle::flush(self).map_err(io::Error::from)
    }
}

impl io::Seek for FileHandle {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        FileHandle::seek(self, pos).map_err(io::Error::from)
    }
}
