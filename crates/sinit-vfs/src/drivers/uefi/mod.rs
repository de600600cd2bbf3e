//! Firmware file-protocol backend.
//!
//! [`SimpleFileSystem`] and [`FileProtocol`] mirror the shape of
//! `EFI_SIMPLE_FILE_SYSTEM_PROTOCOL` and `EFI_FILE_PROTOCOL`: open the
//! volume root, open children by backslash-separated name, read and
//! write at a file position, query and change `EFI_FILE_INFO`. A real
//! firmware binding implements the traits over the boot services tables;
//! [`MemoryFileSystem`] implements them in RAM.
//!
//! The driver translates logical `/a/b` paths to `\a\b` and every
//! [`EfiStatus`] to a [`VfsError`].

mod memory;

pub use memory::MemoryFileSystem;

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use tracing::debug;

use crate::driver::{FileOps, FsDriver, MountContext, MountOptions, MountRoot, VolumeOps};
use crate::error::{VfsError, VfsResult};
use crate::path::VfsPath;
use crate::types::{Capabilities, DirEntry, FileAttr, FileType, OpenFlags, StatFs};

/// Registry name of the uefi driver.
pub const DRIVER_NAME: &str = "uefi";

/// `EFI_STATUS`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EfiStatus(pub usize);

const ERROR_BIT: usize = 1 << (usize::BITS - 1);

impl EfiStatus {
    pub const SUCCESS: Self = Self(0);
    pub const LOAD_ERROR: Self = Self(ERROR_BIT | 1);
    pub const INVALID_PARAMETER: Self = Self(ERROR_BIT | 2);
    pub const UNSUPPORTED: Self = Self(ERROR_BIT | 3);
    pub const BAD_BUFFER_SIZE: Self = Self(ERROR_BIT | 4);
    pub const BUFFER_TOO_SMALL: Self = Self(ERROR_BIT | 5);
    pub const NOT_READY: Self = Self(ERROR_BIT | 6);
    pub const DEVICE_ERROR: Self = Self(ERROR_BIT | 7);
    pub const WRITE_PROTECTED: Self = Self(ERROR_BIT | 8);
    pub const OUT_OF_RESOURCES: Self = Self(ERROR_BIT | 9);
    pub const VOLUME_CORRUPTED: Self = Self(ERROR_BIT | 10);
    pub const VOLUME_FULL: Self = Self(ERROR_BIT | 11);
    pub const NO_MEDIA: Self = Self(ERROR_BIT | 12);
    pub const MEDIA_CHANGED: Self = Self(ERROR_BIT | 13);
    pub const NOT_FOUND: Self = Self(ERROR_BIT | 14);
    pub const ACCESS_DENIED: Self = Self(ERROR_BIT | 15);
    pub const END_OF_FILE: Self = Self(ERROR_BIT | 31);
    /// Warning: the handle was closed but the file was not deleted.
    pub const WARN_DELETE_FAILURE: Self = Self(2);

    /// Returns true for error codes (high bit set).
    pub fn is_error(self) -> bool {
        self.0 & ERROR_BIT != 0
    }

    fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::SUCCESS => "SUCCESS",
            Self::LOAD_ERROR => "LOAD_ERROR",
            Self::INVALID_PARAMETER => "INVALID_PARAMETER",
            Self::UNSUPPORTED => "UNSUPPORTED",
            Self::BAD_BUFFER_SIZE => "BAD_BUFFER_SIZE",
            Self::BUFFER_TOO_SMALL => "BUFFER_TOO_SMALL",
            Self::NOT_READY => "NOT_READY",
            Self::DEVICE_ERROR => "DEVICE_ERROR",
            Self::WRITE_PROTECTED => "WRITE_PROTECTED",
            Self::OUT_OF_RESOURCES => "OUT_OF_RESOURCES",
            Self::VOLUME_CORRUPTED => "VOLUME_CORRUPTED",
            Self::VOLUME_FULL => "VOLUME_FULL",
            Self::NO_MEDIA => "NO_MEDIA",
            Self::MEDIA_CHANGED => "MEDIA_CHANGED",
            Self::NOT_FOUND => "NOT_FOUND",
            Self::ACCESS_DENIED => "ACCESS_DENIED",
            Self::END_OF_FILE => "END_OF_FILE",
            Self::WARN_DELETE_FAILURE => "WARN_DELETE_FAILURE",
            _ => return None,
        })
    }
}

impl fmt::Debug for EfiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "EfiStatus({:#x})", self.0),
        }
    }
}

impl fmt::Display for EfiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Result of a protocol call.
pub type EfiResult<T> = Result<T, EfiStatus>;

impl From<EfiStatus> for VfsError {
    fn from(status: EfiStatus) -> Self {
        let msg = status.to_string();
        match status {
            EfiStatus::NOT_FOUND => VfsError::NotFound(msg),
            EfiStatus::WRITE_PROTECTED | EfiStatus::ACCESS_DENIED => VfsError::ReadOnly(msg),
            EfiStatus::OUT_OF_RESOURCES => VfsError::OutOfMemory,
            EfiStatus::INVALID_PARAMETER => VfsError::InvalidArgument(msg),
            EfiStatus::UNSUPPORTED => VfsError::Unsupported(msg),
            other => VfsError::io(Some(other.0 as i64), msg),
        }
    }
}

/// `EFI_FILE_MODE_READ`.
pub const FILE_MODE_READ: u64 = 0x1;
/// `EFI_FILE_MODE_WRITE`.
pub const FILE_MODE_WRITE: u64 = 0x2;
/// `EFI_FILE_MODE_CREATE`.
pub const FILE_MODE_CREATE: u64 = 0x8000_0000_0000_0000;

/// `EFI_FILE_READ_ONLY`.
pub const FILE_READ_ONLY: u64 = 0x01;
/// `EFI_FILE_DIRECTORY`.
pub const FILE_DIRECTORY: u64 = 0x10;

/// `EFI_FILE_INFO`, minus the timestamps firmware rarely fills in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EfiFileInfo {
    /// Leaf name. On `set_info`, a name starting with `\` moves the file.
    pub file_name: String,
    pub file_size: u64,
    pub attribute: u64,
    pub modification_time: Option<SystemTime>,
}

impl EfiFileInfo {
    pub fn is_directory(&self) -> bool {
        self.attribute & FILE_DIRECTORY != 0
    }
}

/// `EFI_FILE_SYSTEM_INFO`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EfiFileSystemInfo {
    pub read_only: bool,
    pub volume_size: u64,
    pub free_space: u64,
    pub block_size: u32,
    pub volume_label: String,
}

/// `EFI_SIMPLE_FILE_SYSTEM_PROTOCOL`.
pub trait SimpleFileSystem: Send + Sync {
    /// Open the root directory of the volume.
    fn open_volume(&self) -> EfiResult<Box<dyn FileProtocol>>;
}

/// `EFI_FILE_PROTOCOL`.
///
/// Dropping a handle closes it.
pub trait FileProtocol: Send {
    /// Open `name` relative to this directory (absolute if it starts with `\`).
    fn open(&mut self, name: &str, mode: u64, attributes: u64) -> EfiResult<Box<dyn FileProtocol>>;

    /// Delete the file and close the handle.
    fn delete(self: Box<Self>) -> EfiResult<()>;

    /// Read from the current position. Returns 0 at end of file.
    fn read(&mut self, buf: &mut [u8]) -> EfiResult<usize>;

    /// Next directory entry, or `None` after the last one.
    fn read_entry(&mut self) -> EfiResult<Option<EfiFileInfo>>;

    /// Write at the current position, extending the file as needed.
    fn write(&mut self, buf: &[u8]) -> EfiResult<usize>;

    fn get_position(&mut self) -> EfiResult<u64>;

    /// `u64::MAX` moves to end of file.
    fn set_position(&mut self, position: u64) -> EfiResult<()>;

    fn get_info(&mut self) -> EfiResult<EfiFileInfo>;

    /// Apply a changed name (rename) or size (truncate/extend).
    fn set_info(&mut self, info: &EfiFileInfo) -> EfiResult<()>;

    fn get_fs_info(&mut self) -> EfiResult<EfiFileSystemInfo> {
        Err(EfiStatus::UNSUPPORTED)
    }

    fn flush(&mut self) -> EfiResult<()> {
        Ok(())
    }
}

/// Logical `/a/b` to firmware `\a\b`.
pub fn efi_path(path: &VfsPath) -> String {
    let mut out = String::new();
    for seg in path.segments() {
        out.push('\\');
        out.push_str(seg);
    }
    if out.is_empty() {
        out.push('\\');
    }
    out
}

fn info_to_attr(info: &EfiFileInfo) -> FileAttr {
    let attr = if info.is_directory() {
        FileAttr::directory()
    } else {
        FileAttr::file(info.file_size)
    };
    attr.with_mtime(info.modification_time)
}

/// Driver for firmware file-system protocols.
#[derive(Debug, Default)]
pub struct UefiDriver;

impl FsDriver for UefiDriver {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::all()
    }

    fn mount(
        &self,
        root: MountRoot,
        _options: &MountOptions,
        _ctx: &MountContext<'_>,
    ) -> VfsResult<Box<dyn VolumeOps>> {
        let MountRoot::Protocol(fs) = root else {
            return Err(root.mismatch(DRIVER_NAME, "protocol"));
        };
        let mut dir = fs.open_volume()?;
        let read_only = match dir.get_fs_info() {
            Ok(info) => {
                debug!(label = %info.volume_label, read_only = info.read_only, "uefi volume");
                info.read_only
            }
            Err(EfiStatus::UNSUPPORTED) => false,
            Err(status) => return Err(status.into()),
        };
        Ok(Box::new(UefiVolume { fs, read_only }))
    }
}

struct UefiVolume {
    fs: Arc<dyn SimpleFileSystem>,
    read_only: bool,
}

impl UefiVolume {
    fn open_raw(&self, path: &VfsPath, mode: u64, attributes: u64) -> VfsResult<Box<dyn FileProtocol>> {
        let mut root = self.fs.open_volume()?;
        if path.is_root() {
            return Ok(root);
        }
        root.open(&efi_path(path), mode, attributes)
            .map_err(|status| match status {
                EfiStatus::NOT_FOUND => VfsError::not_found(path.to_string()),
                other => other.into(),
            })
    }

    fn exists(&self, path: &VfsPath) -> VfsResult<bool> {
        match self.open_raw(path, FILE_MODE_READ, 0) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn entries(dir: &mut dyn FileProtocol) -> VfsResult<Vec<EfiFileInfo>> {
        dir.set_position(0)?;
        let mut entries = Vec::new();
        while let Some(info) = dir.read_entry()? {
            if info.file_name != "." && info.file_name != ".." {
                entries.push(info);
            }
        }
        Ok(entries)
    }
}

impl VolumeOps for UefiVolume {
    fn open(&self, path: &VfsPath, flags: OpenFlags) -> VfsResult<Box<dyn FileOps>> {
        if flags.exclusive && self.exists(path)? {
            return Err(VfsError::already_exists(path.to_string()));
        }
        let mut mode = FILE_MODE_READ;
        if flags.is_mutating() {
            mode |= FILE_MODE_WRITE;
        }
        if flags.create {
            mode |= FILE_MODE_CREATE;
        }
        let mut file = self.open_raw(path, mode, 0)?;
        let mut info = file.get_info()?;
        if info.is_directory() {
            return Err(VfsError::invalid(format!("{path} is a directory")));
        }
        if flags.truncate && info.file_size != 0 {
            info.file_size = 0;
            file.set_info(&info)?;
        }
        Ok(Box::new(UefiFile { file }))
    }

    fn stat(&self, path: &VfsPath) -> VfsResult<FileAttr> {
        let mut file = self.open_raw(path, FILE_MODE_READ, 0)?;
        Ok(info_to_attr(&file.get_info()?))
    }

    fn list(&self, path: &VfsPath) -> VfsResult<Vec<DirEntry>> {
        let mut dir = self.open_raw(path, FILE_MODE_READ, 0)?;
        if !dir.get_info()?.is_directory() {
            return Err(VfsError::invalid(format!("{path} is not a directory")));
        }
        let mut entries: Vec<_> = Self::entries(dir.as_mut())?
            .into_iter()
            .map(|info| {
                let kind = if info.is_directory() {
                    FileType::Directory
                } else {
                    FileType::File
                };
                DirEntry::new(info.file_name, kind)
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn mkdir(&self, path: &VfsPath) -> VfsResult<()> {
        if self.exists(path)? {
            return Err(VfsError::already_exists(path.to_string()));
        }
        self.open_raw(
            path,
            FILE_MODE_READ | FILE_MODE_WRITE | FILE_MODE_CREATE,
            FILE_DIRECTORY,
        )?;
        Ok(())
    }

    fn remove(&self, path: &VfsPath) -> VfsResult<()> {
        let mut file = self.open_raw(path, FILE_MODE_READ | FILE_MODE_WRITE, 0)?;
        if file.get_info()?.is_directory() && !Self::entries(file.as_mut())?.is_empty() {
            return Err(VfsError::busy(format!("directory {path} is not empty")));
        }
        file.delete().map_err(|status| match status {
            EfiStatus::WARN_DELETE_FAILURE => VfsError::io(Some(status.0 as i64), "delete failed"),
            other => other.into(),
        })
    }

    fn rename(&self, from: &VfsPath, to: &VfsPath) -> VfsResult<()> {
        if self.exists(to)? {
            return Err(VfsError::already_exists(to.to_string()));
        }
        let mut file = self.open_raw(from, FILE_MODE_READ | FILE_MODE_WRITE, 0)?;
        let mut info = file.get_info()?;
        info.file_name = efi_path(to);
        file.set_info(&info)?;
        Ok(())
    }

    fn statfs(&self) -> VfsResult<StatFs> {
        let info = self.fs.open_volume()?.get_fs_info()?;
        let bsize = info.block_size.max(1);
        Ok(StatFs {
            blocks: info.volume_size / u64::from(bsize),
            bfree: info.free_space / u64::from(bsize),
            bavail: info.free_space / u64::from(bsize),
            bsize,
            namelen: crate::path::NAME_MAX as u32,
        })
    }

    fn capabilities(&self) -> Option<Capabilities> {
        self.read_only.then_some(Capabilities::READ_ONLY)
    }
}

struct UefiFile {
    file: Box<dyn FileProtocol>,
}

impl FileOps for UefiFile {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> VfsResult<usize> {
        self.file.set_position(offset)?;
        match self.file.read(buf) {
            Ok(n) => Ok(n),
            Err(EfiStatus::END_OF_FILE) => Ok(0),
            Err(status) => Err(status.into()),
        }
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> VfsResult<usize> {
        // u64::MAX means end of file to the protocol, not a real position.
        if offset == u64::MAX {
            return Err(VfsError::invalid("write offset out of range"));
        }
        self.file.set_position(offset)?;
        Ok(self.file.write(buf)?)
    }

    fn size(&mut self) -> VfsResult<u64> {
        Ok(self.file.get_info()?.file_size)
    }

    fn stat(&mut self) -> VfsResult<FileAttr> {
        Ok(info_to_attr(&self.file.get_info()?))
    }

    fn set_len(&mut self, size: u64) -> VfsResult<()> {
        let mut info = self.file.get_info()?;
        info.file_size = size;
        Ok(self.file.set_info(&info)?)
    }

    fn flush(&mut self) -> VfsResult<()> {
        Ok(self.file.flush()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::VolumeRegistry;

    fn mount(fs: MemoryFileSystem) -> Box<dyn VolumeOps> {
        let volumes = VolumeRegistry::new();
        UefiDriver
            .mount(
                MountRoot::Protocol(Arc::new(fs)),
                &MountOptions::new(),
                &MountContext::new(&volumes),
            )
            .unwrap()
    }

    fn p(s: &str) -> VfsPath {
        VfsPath::parse(s).unwrap()
    }

    #[test]
    fn test_path_translation() {
        assert_eq!(efi_path(&p("/EFI/BOOT/BOOTX64.EFI")), "\\EFI\\BOOT\\BOOTX64.EFI");
        assert_eq!(efi_path(&VfsPath::root()), "\\");
    }

    #[test]
    fn test_status_translation() {
        let cases = [
            (EfiStatus::NOT_FOUND, "NotFound"),
            (EfiStatus::WRITE_PROTECTED, "ReadOnly"),
            (EfiStatus::ACCESS_DENIED, "ReadOnly"),
            (EfiStatus::OUT_OF_RESOURCES, "OutOfMemory"),
            (EfiStatus::INVALID_PARAMETER, "InvalidArgument"),
            (EfiStatus::UNSUPPORTED, "Unsupported"),
        ];
        for (status, expected) in cases {
            let err = VfsError::from(status);
            assert!(format!("{err:?}").starts_with(expected), "{status} -> {err:?}");
        }

        match VfsError::from(EfiStatus::DEVICE_ERROR) {
            VfsError::Io { code, message } => {
                assert_eq!(code, Some(EfiStatus::DEVICE_ERROR.0 as i64));
                assert_eq!(message, "DEVICE_ERROR");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(EfiStatus::VOLUME_FULL.is_error());
        assert!(!EfiStatus::WARN_DELETE_FAILURE.is_error());
    }

    #[test]
    fn test_read_write_through_protocol() {
        let fs = MemoryFileSystem::new();
        fs.insert_file("/EFI/BOOT/grub.cfg", b"set timeout=5\n".to_vec())
            .unwrap();
        let volume = mount(fs);

        let attr = volume.stat(&p("/EFI/BOOT/grub.cfg")).unwrap();
        assert_eq!(attr.size, 14);
        assert!(volume.stat(&p("/EFI")).unwrap().is_dir());

        let mut file = volume.open(&p("/EFI/BOOT/grub.cfg"), OpenFlags::write()).unwrap();
        file.write_at(12, b"10\n").unwrap();
        let mut buf = vec![0u8; 32];
        let n = file.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"set timeout=10\n");
    }

    #[test]
    fn test_directory_ops() {
        let volume = mount(MemoryFileSystem::new());
        volume.mkdir(&p("/loader")).unwrap();
        volume.open(&p("/loader/entry.conf"), OpenFlags::create()).unwrap();
        assert!(matches!(volume.mkdir(&p("/loader")), Err(VfsError::AlreadyExists(_))));
        assert!(matches!(volume.mkdir(&p("/a/b")), Err(VfsError::NotFound(_))));

        assert_eq!(
            volume.list(&VfsPath::root()).unwrap(),
            vec![DirEntry::directory("loader")]
        );
        assert!(matches!(volume.remove(&p("/loader")), Err(VfsError::Busy(_))));

        volume.rename(&p("/loader/entry.conf"), &p("/entry.conf")).unwrap();
        volume.remove(&p("/loader")).unwrap();
        assert_eq!(
            volume.list(&VfsPath::root()).unwrap(),
            vec![DirEntry::file("entry.conf")]
        );
    }

    #[test]
    fn test_read_only_media() {
        let fs = MemoryFileSystem::new().with_read_only(true);
        let volume = mount(fs);
        assert_eq!(volume.capabilities(), Some(Capabilities::READ_ONLY));
        assert!(matches!(
            volume.open(&p("/new"), OpenFlags::create()),
            Err(VfsError::ReadOnly(_))
        ));
    }

    #[test]
    fn test_truncate_and_exclusive() {
        let fs = MemoryFileSystem::new();
        fs.insert_file("/a", b"abcdef".to_vec()).unwrap();
        let volume = mount(fs);

        assert!(matches!(
            volume.open(&p("/a"), OpenFlags::create_exclusive()),
            Err(VfsError::AlreadyExists(_))
        ));
        let mut file = volume.open(&p("/a"), OpenFlags::create_truncate()).unwrap();
        assert_eq!(file.size().unwrap(), 0);
        file.set_len(3).unwrap();
        assert_eq!(volume.stat(&p("/a")).unwrap().size, 3);
    }

    #[test]
    fn test_write_at_end_of_file_marker_rejected() {
        let fs = MemoryFileSystem::new();
        fs.insert_file("/a", b"abc".to_vec()).unwrap();
        let volume = mount(fs);

        let mut file = volume.open(&p("/a"), OpenFlags::write()).unwrap();
        assert!(matches!(
            file.write_at(u64::MAX, b"x"),
            Err(VfsError::InvalidArgument(_))
        ));
        assert_eq!(file.size().unwrap(), 3);
    }

    #[test]
    fn test_huge_length_fails_cleanly() {
        let volume = mount(MemoryFileSystem::new());
        let mut file = volume.open(&p("/b"), OpenFlags::create()).unwrap();
        assert!(file.set_len(1u64 << 62).is_err());
        assert!(file.write_at(1u64 << 62, b"x").is_err());
        assert_eq!(file.size().unwrap(), 0);
    }
}
