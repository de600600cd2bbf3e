//! Archive backend.
//!
//! Mounts a zip archive held in memory as a read-only tree. The central
//! directory is indexed once at mount time; entry data is decompressed
//! when a file is opened.

use std::io::{Cursor, Read};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tracing::debug;
use zip::ZipArchive;

use crate::driver::{FileOps, FsDriver, MountContext, MountOptions, MountRoot, VolumeOps};
use crate::drivers::{BlobFile, TreeIndex, TreeNode};
use crate::error::{VfsError, VfsResult};
use crate::path::VfsPath;
use crate::types::{Capabilities, DirEntry, FileAttr, OpenFlags, StatFs};

/// Registry name of the zip driver.
pub const DRIVER_NAME: &str = "zip";

const MAX_PREALLOC: u64 = 1 << 20;

#[derive(Debug, Clone, Copy)]
struct ZipEntry {
    index: usize,
    size: u64,
    mtime: Option<SystemTime>,
}

/// Driver for in-memory zip archives.
#[derive(Debug, Default)]
pub struct ZipDriver;

impl FsDriver for ZipDriver {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::READ_ONLY
    }

    fn mount(
        &self,
        root: MountRoot,
        _options: &MountOptions,
        _ctx: &MountContext<'_>,
    ) -> VfsResult<Box<dyn VolumeOps>> {
        let MountRoot::Archive(bytes) = root else {
            return Err(root.mismatch(DRIVER_NAME, "archive"));
        };
        let archive_len = bytes.len() as u64;
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        let mut tree = TreeIndex::default();
        for index in 0..archive.len() {
            let file = archive.by_index_raw(index)?;
            let path = VfsPath::parse(file.name())?;
            if path.is_root() {
                continue;
            }
            if file.is_dir() {
                tree.insert_dir(&path)?;
            } else {
                let entry = ZipEntry {
                    index,
                    size: file.size(),
                    mtime: file.last_modified().and_then(dos_time_to_system),
                };
                tree.insert_file(&path, entry)?;
            }
        }
        debug!(entries = archive.len(), files = tree.file_count(), "indexed archive");
        Ok(Box::new(ZipVolume {
            archive: Mutex::new(archive),
            archive_len,
            tree,
        }))
    }
}

struct ZipVolume {
    archive: Mutex<ZipArchive<Cursor<Arc<[u8]>>>>,
    archive_len: u64,
    tree: TreeIndex<ZipEntry>,
}

impl VolumeOps for ZipVolume {
    fn open(&self, path: &VfsPath, flags: OpenFlags) -> VfsResult<Box<dyn FileOps>> {
        if flags.is_mutating() {
            return Err(VfsError::read_only(path.to_string()));
        }
        let entry = match self.tree.get(path)? {
            TreeNode::File(entry) => *entry,
            TreeNode::Dir => return Err(VfsError::invalid(format!("{path} is a directory"))),
        };
        // The recorded size is only a hint; the archive may lie about it.
        let hint = entry.size.min(MAX_PREALLOC);
        let mut data = Vec::with_capacity(usize::try_from(hint).unwrap_or(0));
        {
            let mut archive = self.archive.lock();
            let mut file = archive.by_index(entry.index)?;
            file.read_to_end(&mut data)?;
        }
        Ok(Box::new(BlobFile::new(data.into(), entry.mtime)))
    }

    fn stat(&self, path: &VfsPath) -> VfsResult<FileAttr> {
        Ok(match self.tree.get(path)? {
            TreeNode::File(entry) => FileAttr::file(entry.size).with_mtime(entry.mtime),
            TreeNode::Dir => FileAttr::directory(),
        })
    }

    fn list(&self, path: &VfsPath) -> VfsResult<Vec<DirEntry>> {
        self.tree.list(path)
    }

    fn mkdir(&self, path: &VfsPath) -> VfsResult<()> {
        Err(VfsError::read_only(path.to_string()))
    }

    fn remove(&self, path: &VfsPath) -> VfsResult<()> {
        Err(VfsError::read_only(path.to_string()))
    }

    fn rename(&self, from: &VfsPath, _to: &VfsPath) -> VfsResult<()> {
        Err(VfsError::read_only(from.to_string()))
    }

    fn statfs(&self) -> VfsResult<StatFs> {
        Ok(StatFs {
            blocks: self.archive_len,
            bfree: 0,
            bavail: 0,
            bsize: 1,
            namelen: crate::path::NAME_MAX as u32,
        })
    }
}

/// MS-DOS timestamps carry no zone; they are taken as UTC.
fn dos_time_to_system(dt: zip::DateTime) -> Option<SystemTime> {
    let days = days_from_civil(i64::from(dt.year()), u32::from(dt.month()), u32::from(dt.day()));
    let secs = days * 86_400
        + i64::from(dt.hour()) * 3_600
        + i64::from(dt.minute()) * 60
        + i64::from(dt.second());
    let secs = u64::try_from(secs).ok()?;
    UNIX_EPOCH.checked_add(Duration::from_secs(secs))
}

/// Days since 1970-01-01 for a proleptic Gregorian date.
fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let m = i64::from(month);
    let doy = (153 * (if m > 2 { m - 3 } else { m + 9 }) + 2) / 5 + i64::from(day) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::VolumeRegistry;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn archive() -> Arc<[u8]> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let stamp = zip::DateTime::from_date_and_time(2024, 1, 2, 3, 4, 6).unwrap();
        let options = SimpleFileOptions::default().last_modified_time(stamp);
        writer.start_file("boot/grub.cfg", options).unwrap();
        writer.write_all(b"set default=0\n").unwrap();
        writer.add_directory("boot/themes/", options).unwrap();
        writer.start_file("README", options).unwrap();
        writer.write_all(&[b'r'; 300]).unwrap();
        writer.finish().unwrap().into_inner().into()
    }

    fn mount() -> Box<dyn VolumeOps> {
        let volumes = VolumeRegistry::new();
        ZipDriver
            .mount(
                MountRoot::Archive(archive()),
                &MountOptions::new(),
                &MountContext::new(&volumes),
            )
            .unwrap()
    }

    fn p(s: &str) -> VfsPath {
        VfsPath::parse(s).unwrap()
    }

    #[test]
    fn test_list_and_stat() {
        let volume = mount();
        assert_eq!(
            volume.list(&VfsPath::root()).unwrap(),
            vec![DirEntry::file("README"), DirEntry::directory("boot")]
        );
        assert_eq!(
            volume.list(&p("/boot")).unwrap(),
            vec![DirEntry::file("grub.cfg"), DirEntry::directory("themes")]
        );

        let attr = volume.stat(&p("/README")).unwrap();
        assert_eq!(attr.size, 300);
        assert_eq!(
            attr.mtime,
            Some(UNIX_EPOCH + Duration::from_secs(1_704_164_646))
        );
    }

    #[test]
    fn test_open_decompresses() {
        let volume = mount();
        let mut file = volume.open(&p("/boot/grub.cfg"), OpenFlags::read()).unwrap();
        let mut buf = vec![0u8; 64];
        let n = file.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"set default=0\n");
        assert!(matches!(
            volume.open(&p("/boot"), OpenFlags::read()),
            Err(VfsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_read_only() {
        let volume = mount();
        assert!(matches!(
            volume.open(&p("/README"), OpenFlags::write()),
            Err(VfsError::ReadOnly(_))
        ));
        assert!(matches!(volume.mkdir(&p("/x")), Err(VfsError::ReadOnly(_))));
    }

    #[test]
    fn test_garbage_rejected() {
        let volumes = VolumeRegistry::new();
        let result = ZipDriver.mount(
            MountRoot::Archive(Arc::from(&b"not a zip"[..])),
            &MountOptions::new(),
            &MountContext::new(&volumes),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_inflated_size_not_trusted() {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        writer.start_file("vmlinuz", options).unwrap();
        writer.write_all(b"kernel").unwrap();
        let mut bytes = writer.finish().unwrap().into_inner();

        // Rewrite the uncompressed size in the central directory record.
        let pos = bytes
            .windows(4)
            .position(|w| w == b"PK\x01\x02")
            .unwrap();
        bytes[pos + 24..pos + 28].copy_from_slice(&0xFFFF_FFF0u32.to_le_bytes());

        let volumes = VolumeRegistry::new();
        let volume = ZipDriver
            .mount(
                MountRoot::Archive(bytes.into()),
                &MountOptions::new(),
                &MountContext::new(&volumes),
            )
            .unwrap();
        assert_eq!(volume.stat(&p("/vmlinuz")).unwrap().size, 0xFFFF_FFF0);

        if let Ok(mut file) = volume.open(&p("/vmlinuz"), OpenFlags::read()) {
            let mut buf = vec![0u8; 16];
            let n = file.read_at(0, &mut buf).unwrap();
            assert_eq!(&buf[..n], b"kernel");
        }
    }

    #[test]
    fn test_civil_days() {
        assert_eq!(days_from_civil(1970, 1, 1), 0);
        assert_eq!(days_from_civil(2000, 3, 1), 11_017);
        assert_eq!(days_from_civil(2024, 1, 1), 19_723);
    }
}
