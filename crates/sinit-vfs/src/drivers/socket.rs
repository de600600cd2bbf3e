//! UNIX domain socket backend.
//!
//! Exposes the sockets under a host directory (usually a run directory
//! such as `/run/sinit`) as stream files: opening one connects, reads and
//! writes go straight to the stream. There is no seeking and no way to
//! create sockets through the VFS.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;

use crate::driver::{FileOps, FsDriver, MountContext, MountOptions, MountRoot, VolumeOps};
use crate::drivers::posix::PosixVolume;
use crate::error::{VfsError, VfsResult};
use crate::path::VfsPath;
use crate::types::{Capabilities, DirEntry, FileAttr, FileType, OpenFlags};

/// Registry name of the socket driver.
pub const DRIVER_NAME: &str = "socket";

/// Driver for directories of UNIX sockets.
#[derive(Debug, Default)]
pub struct SocketDriver;

impl FsDriver for SocketDriver {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::READ | Capabilities::WRITE | Capabilities::LIST | Capabilities::STAT
    }

    fn mount(
        &self,
        root: MountRoot,
        _options: &MountOptions,
        _ctx: &MountContext<'_>,
    ) -> VfsResult<Box<dyn VolumeOps>> {
        let MountRoot::Directory(dir) = root else {
            return Err(root.mismatch(DRIVER_NAME, "directory"));
        };
        Ok(Box::new(SocketVolume {
            dir: PosixVolume::new(&dir)?,
        }))
    }
}

struct SocketVolume {
    dir: PosixVolume,
}

impl VolumeOps for SocketVolume {
    fn open(&self, path: &VfsPath, flags: OpenFlags) -> VfsResult<Box<dyn FileOps>> {
        if flags.create || flags.truncate {
            return Err(VfsError::unsupported("creating sockets"));
        }
        let attr = self.dir.stat(path)?;
        if attr.kind != FileType::Socket {
            return Err(VfsError::invalid(format!("{path} is not a socket")));
        }
        let stream = UnixStream::connect(self.dir.resolve(path)?)?;
        Ok(Box::new(SocketFile { stream }))
    }

    fn stat(&self, path: &VfsPath) -> VfsResult<FileAttr> {
        self.dir.stat(path)
    }

    /// Sockets and the directories that may hold them.
    fn list(&self, path: &VfsPath) -> VfsResult<Vec<DirEntry>> {
        let mut entries = self.dir.list(path)?;
        entries.retain(|e| matches!(e.kind, FileType::Socket | FileType::Directory));
        Ok(entries)
    }
}

struct SocketFile {
    stream: UnixStream,
}

impl FileOps for SocketFile {
    fn read_at(&mut self, _offset: u64, buf: &mut [u8]) -> VfsResult<usize> {
        Ok(self.stream.read(buf)?)
    }

    fn write_at(&mut self, _offset: u64, buf: &[u8]) -> VfsResult<usize> {
        Ok(self.stream.write(buf)?)
    }

    fn size(&mut self) -> VfsResult<u64> {
        Ok(0)
    }

    fn stat(&mut self) -> VfsResult<FileAttr> {
        Ok(FileAttr {
            size: 0,
            kind: FileType::Socket,
            mtime: None,
            perm: None,
        })
    }

    fn flush(&mut self) -> VfsResult<()> {
        Ok(self.stream.flush()?)
    }
}
