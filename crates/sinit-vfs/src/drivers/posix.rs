//! Host filesystem backend.
//!
//! Serves a directory of the host filesystem. All paths are relative to
//! the mount root, and a path that leaves the root through a symlink is
//! rejected.

use std::fs::{self, OpenOptions};
use std::os::unix::fs::{FileExt, FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::driver::{FileOps, FsDriver, MountContext, MountOptions, MountRoot, VolumeOps};
use crate::error::{VfsError, VfsResult};
use crate::path::VfsPath;
use crate::types::{Capabilities, DirEntry, FileAttr, FileType, OpenFlags, StatFs};

/// Registry name of the posix driver.
pub const DRIVER_NAME: &str = "posix";

/// Driver for host directories.
#[derive(Debug, Default)]
pub struct PosixDriver;

impl FsDriver for PosixDriver {
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
        let MountRoot::Directory(dir) = root else {
            return Err(root.mismatch(DRIVER_NAME, "directory"));
        };
        Ok(Box::new(PosixVolume::new(&dir)?))
    }
}

/// A mounted host directory.
#[derive(Debug)]
pub struct PosixVolume {
    root: PathBuf,
}

impl PosixVolume {
    /// Open a volume rooted at `dir`, which must be an existing directory.
    ///
    /// The root is canonicalized once here (e.g. macOS `/tmp` becomes
    /// `/private/tmp`).
    pub fn new(dir: &Path) -> VfsResult<Self> {
        let root = dunce::canonicalize(dir)?;
        if !fs::metadata(&root)?.is_dir() {
            return Err(VfsError::invalid(format!("{} is not a directory", root.display())));
        }
        debug!(root = %root.display(), "posix volume");
        Ok(Self { root })
    }

    /// Canonical host root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a volume path to a host path under the root.
    ///
    /// Existing paths are canonicalized; for a new path the parent is
    /// canonicalized instead. Either must stay under the root.
    pub(crate) fn resolve(&self, path: &VfsPath) -> VfsResult<PathBuf> {
        if path.is_root() {
            return Ok(self.root.clone());
        }
        let full = self.root.join(path.relative());

        let canonical = match fs::symlink_metadata(&full) {
            Ok(meta) if !meta.file_type().is_symlink() => match full.parent() {
                Some(parent) => dunce::canonicalize(parent)?.join(file_name(path)?),
                None => full,
            },
            Ok(_) => dunce::canonicalize(&full).unwrap_or(full),
            Err(_) => match full.parent() {
                Some(parent) if parent.exists() => {
                    dunce::canonicalize(parent)?.join(file_name(path)?)
                }
                _ => full,
            },
        };

        if !canonical.starts_with(&self.root) {
            return Err(VfsError::invalid(format!(
                "{path} escapes volume root {}",
                self.root.display()
            )));
        }
        Ok(canonical)
    }
}

fn file_name(path: &VfsPath) -> VfsResult<&str> {
    path.file_name()
        .ok_or_else(|| VfsError::invalid("path has no file name"))
}

fn kind_of(ft: fs::FileType) -> FileType {
    if ft.is_dir() {
        FileType::Directory
    } else if ft.is_symlink() {
        FileType::Symlink
    } else if ft.is_socket() {
        FileType::Socket
    } else if ft.is_file() {
        FileType::File
    } else {
        FileType::Other
    }
}

pub(crate) fn metadata_to_attr(meta: &fs::Metadata) -> FileAttr {
    FileAttr {
        size: if meta.is_dir() { 0 } else { meta.len() },
        kind: kind_of(meta.file_type()),
        mtime: meta.modified().ok(),
        perm: Some(meta.permissions().mode() & 0o7777),
    }
}

impl VolumeOps for PosixVolume {
    fn open(&self, path: &VfsPath, flags: OpenFlags) -> VfsResult<Box<dyn FileOps>> {
        let full = self.resolve(path)?;
        if full.is_dir() {
            return Err(VfsError::invalid(format!("{path} is a directory")));
        }
        let file = OpenOptions::new()
            .read(flags.read || !(flags.write || flags.append))
            .write(flags.write || flags.append)
            .create(flags.create && !flags.exclusive)
            .create_new(flags.create && flags.exclusive)
            .truncate(flags.truncate)
            .open(&full)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => VfsError::not_found(path.to_string()),
                std::io::ErrorKind::AlreadyExists => VfsError::already_exists(path.to_string()),
                _ => VfsError::from(e),
            })?;
        Ok(Box::new(PosixFile { file }))
    }

    fn stat(&self, path: &VfsPath) -> VfsResult<FileAttr> {
        let full = self.resolve(path)?;
        let meta = fs::symlink_metadata(&full).map_err(|e| not_found_or(e, path))?;
        Ok(metadata_to_attr(&meta))
    }

    fn list(&self, path: &VfsPath) -> VfsResult<Vec<DirEntry>> {
        let full = self.resolve(path)?;
        let mut entries = Vec::new();
        for entry in fs::read_dir(&full).map_err(|e| not_found_or(e, path))? {
            let entry = entry?;
            entries.push(DirEntry::new(
                entry.file_name().to_string_lossy().into_owned(),
                kind_of(entry.file_type()?),
            ));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn mkdir(&self, path: &VfsPath) -> VfsResult<()> {
        let full = self.resolve(path)?;
        fs::create_dir(&full).map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => VfsError::already_exists(path.to_string()),
            _ => not_found_or(e, path),
        })
    }

    fn remove(&self, path: &VfsPath) -> VfsResult<()> {
        let full = self.resolve(path)?;
        let meta = fs::symlink_metadata(&full).map_err(|e| not_found_or(e, path))?;
        if meta.is_dir() {
            if fs::read_dir(&full)?.next().is_some() {
                return Err(VfsError::busy(format!("directory {path} is not empty")));
            }
            fs::remove_dir(&full)?;
        } else {
            fs::remove_file(&full)?;
        }
        Ok(())
    }

    fn rename(&self, from: &VfsPath, to: &VfsPath) -> VfsResult<()> {
        let from_full = self.resolve(from)?;
        let to_full = self.resolve(to)?;
        fs::rename(&from_full, &to_full).map_err(|e| not_found_or(e, from))
    }

    fn statfs(&self) -> VfsResult<StatFs> {
        let stat = rustix::fs::statvfs(self.root.as_path()).map_err(std::io::Error::from)?;
        Ok(StatFs {
            blocks: stat.f_blocks,
            bfree: stat.f_bfree,
            bavail: stat.f_bavail,
            bsize: stat.f_bsize as u32,
            namelen: stat.f_namemax as u32,
        })
    }
}

fn not_found_or(e: std::io::Error, path: &VfsPath) -> VfsError {
    if e.kind() == std::io::ErrorKind::NotFound {
        VfsError::not_found(path.to_string())
    } else {
        VfsError::from(e)
    }
}

struct PosixFile {
    file: fs::File,
}

impl FileOps for PosixFile {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> VfsResult<usize> {
        Ok(self.file.read_at(buf, offset)?)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> VfsResult<usize> {
        Ok(self.file.write_at(buf, offset)?)
    }

    fn size(&mut self) -> VfsResult<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn stat(&mut self) -> VfsResult<FileAttr> {
        Ok(metadata_to_attr(&self.file.metadata()?))
    }

    fn set_len(&mut self, size: u64) -> VfsResult<()> {
        Ok(self.file.set_len(size)?)
    }

    fn flush(&mut self) -> VfsResult<()> {
        Ok(self.file.sync_data()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (PosixVolume, TempDir) {
        let dir = TempDir::new().unwrap();
        let volume = PosixVolume::new(dir.path()).unwrap();
        (volume, dir)
    }

    fn p(s: &str) -> VfsPath {
        VfsPath::parse(s).unwrap()
    }

    #[test]
    fn test_create_and_read() {
        let (volume, _dir) = setup();

        let mut file = volume.open(&p("test.txt"), OpenFlags::create()).unwrap();
        assert_eq!(file.write_at(0, b"hello world").unwrap(), 11);

        let mut buf = [0u8; 5];
        assert_eq!(file.read_at(6, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"world");
        assert_eq!(file.size().unwrap(), 11);
    }

    #[test]
    fn test_mkdir_and_list() {
        let (volume, _dir) = setup();

        volume.mkdir(&p("subdir")).unwrap();
        volume.open(&p("subdir/file.txt"), OpenFlags::create()).unwrap();
        volume.open(&p("root.txt"), OpenFlags::create()).unwrap();

        let entries = volume.list(&VfsPath::root()).unwrap();
        assert_eq!(
            entries,
            vec![DirEntry::file("root.txt"), DirEntry::directory("subdir")]
        );
        assert!(matches!(
            volume.mkdir(&p("subdir")),
            Err(VfsError::AlreadyExists(_))
        ));
        assert!(matches!(
            volume.mkdir(&p("missing/child")),
            Err(VfsError::NotFound(_))
        ));
    }

    #[test]
    fn test_remove_non_empty_is_busy() {
        let (volume, _dir) = setup();

        volume.mkdir(&p("d")).unwrap();
        volume.open(&p("d/f"), OpenFlags::create()).unwrap();
        assert!(matches!(volume.remove(&p("d")), Err(VfsError::Busy(_))));

        volume.remove(&p("d/f")).unwrap();
        volume.remove(&p("d")).unwrap();
        assert!(volume.stat(&p("d")).unwrap_err().is_not_found());
    }

    #[test]
    fn test_exclusive_create() {
        let (volume, _dir) = setup();
        volume.open(&p("a"), OpenFlags::create_exclusive()).unwrap();
        assert!(matches!(
            volume.open(&p("a"), OpenFlags::create_exclusive()),
            Err(VfsError::AlreadyExists(_))
        ));
        assert!(matches!(
            volume.open(&p("b"), OpenFlags::read()),
            Err(VfsError::NotFound(_))
        ));
    }

    #[test]
    fn test_symlink_escape_blocked() {
        let (volume, dir) = setup();
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret"), b"x").unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("out")).unwrap();

        let result = volume.open(&p("out/secret"), OpenFlags::read());
        assert!(matches!(result, Err(VfsError::InvalidArgument(_))));
    }

    #[test]
    fn test_rename_and_truncate() {
        let (volume, _dir) = setup();

        let mut file = volume.open(&p("old.txt"), OpenFlags::create()).unwrap();
        file.write_at(0, b"hello world").unwrap();
        drop(file);

        volume.rename(&p("old.txt"), &p("new.txt")).unwrap();
        assert!(volume.stat(&p("old.txt")).is_err());

        let mut file = volume.open(&p("new.txt"), OpenFlags::write()).unwrap();
        file.set_len(5).unwrap();
        assert_eq!(volume.stat(&p("new.txt")).unwrap().size, 5);
    }

    #[test]
    fn test_write_only_open() {
        let (volume, dir) = setup();
        let target = dir.path().join("log");
        fs::write(&target, b"").unwrap();
        fs::set_permissions(&target, fs::Permissions::from_mode(0o200)).unwrap();

        let flags = OpenFlags {
            read: false,
            ..OpenFlags::write()
        };
        let mut file = volume.open(&p("log"), flags).unwrap();
        assert_eq!(file.write_at(0, b"entry").unwrap(), 5);

        fs::set_permissions(&target, fs::Permissions::from_mode(0o600)).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"entry");
    }

    #[test]
    fn test_statfs() {
        let (volume, _dir) = setup();
        let stat = volume.statfs().unwrap();
        assert!(stat.bsize > 0);
        assert!(stat.namelen > 0);
    }
}
