//! Embedded resource backend.
//!
//! Serves a fixed table of files compiled into the binary (usually with
//! `include_bytes!`) or loaded once from a host directory. Directories are
//! implied by the file paths. The volume is read-only.

use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use tracing::debug;

use crate::driver::{FileOps, FsDriver, MountContext, MountOptions, MountRoot, VolumeOps};
use crate::drivers::{Blob, BlobFile, TreeIndex, TreeNode};
use crate::error::{VfsError, VfsResult};
use crate::path::VfsPath;
use crate::types::{Capabilities, DirEntry, FileAttr, OpenFlags, StatFs};

/// Registry name of the assets driver.
pub const DRIVER_NAME: &str = "assets";

#[derive(Debug, Clone)]
struct Asset {
    data: Blob,
    mtime: Option<SystemTime>,
}

/// Path to bytes table served by the assets driver.
#[derive(Debug, Clone, Default)]
pub struct AssetTable {
    tree: TreeIndex<Asset>,
}

impl AssetTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(path, bytes)` pairs baked into the binary.
    pub fn from_static(entries: &[(&str, &'static [u8])]) -> VfsResult<Self> {
        let mut table = Self::new();
        for (path, data) in entries {
            table.insert(path, Blob::Static(*data))?;
        }
        Ok(table)
    }

    /// Load every regular file under a host directory.
    pub fn load_dir(dir: impl AsRef<Path>) -> VfsResult<Self> {
        let dir = dir.as_ref();
        let mut table = Self::new();
        table.load_into(dir, &VfsPath::root())?;
        debug!(dir = %dir.display(), files = table.len(), "loaded asset directory");
        Ok(table)
    }

    fn load_into(&mut self, dir: &Path, at: &VfsPath) -> VfsResult<()> {
        let mut entries = std::fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = at.join(&name)?;
            let meta = entry.metadata()?;
            if meta.is_dir() {
                self.tree.insert_dir(&path)?;
                self.load_into(&entry.path(), &path)?;
            } else if meta.is_file() {
                let data = std::fs::read(entry.path())?;
                self.tree.insert_file(
                    &path,
                    Asset {
                        data: data.into(),
                        mtime: meta.modified().ok(),
                    },
                )?;
            }
        }
        Ok(())
    }

    /// Add or replace a file.
    pub fn insert(&mut self, path: &str, data: impl Into<Blob>) -> VfsResult<()> {
        self.insert_with_mtime(path, data, None)
    }

    /// Add or replace a file with a modification time.
    pub fn insert_with_mtime(
        &mut self,
        path: &str,
        data: impl Into<Blob>,
        mtime: Option<SystemTime>,
    ) -> VfsResult<()> {
        let path = VfsPath::parse(path)?;
        self.tree.insert_file(
            &path,
            Asset {
                data: data.into(),
                mtime,
            },
        )
    }

    /// Number of files.
    pub fn len(&self) -> usize {
        self.tree.file_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Driver for [`AssetTable`] volumes.
#[derive(Debug, Default)]
pub struct AssetDriver;

impl FsDriver for AssetDriver {
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
        match root {
            MountRoot::Assets(table) => Ok(Box::new(AssetVolume { table })),
            other => Err(other.mismatch(DRIVER_NAME, "assets")),
        }
    }
}

struct AssetVolume {
    table: Arc<AssetTable>,
}

impl VolumeOps for AssetVolume {
    fn open(&self, path: &VfsPath, flags: OpenFlags) -> VfsResult<Box<dyn FileOps>> {
        if flags.is_mutating() {
            return Err(VfsError::read_only(path.to_string()));
        }
        match self.table.tree.get(path)? {
            TreeNode::File(asset) => Ok(Box::new(BlobFile::new(asset.data.clone(), asset.mtime))),
            TreeNode::Dir => Err(VfsError::invalid(format!("{path} is a directory"))),
        }
    }

    fn stat(&self, path: &VfsPath) -> VfsResult<FileAttr> {
        Ok(match self.table.tree.get(path)? {
            TreeNode::File(asset) => FileAttr::file(asset.data.len() as u64).with_mtime(asset.mtime),
            TreeNode::Dir => FileAttr::directory(),
        })
    }

    fn list(&self, path: &VfsPath) -> VfsResult<Vec<DirEntry>> {
        self.table.tree.list(path)
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
            blocks: self.table.len() as u64,
            bfree: 0,
            bavail: 0,
            bsize: 1,
            namelen: crate::path::NAME_MAX as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::VolumeRegistry;

    static SPLASH: [u8; 1024] = [0xAB; 1024];

    fn mount(table: AssetTable) -> Box<dyn VolumeOps> {
        let volumes = VolumeRegistry::new();
        AssetDriver
            .mount(
                MountRoot::Assets(Arc::new(table)),
                &MountOptions::new(),
                &MountContext::new(&volumes),
            )
            .unwrap()
    }

    fn p(s: &str) -> VfsPath {
        VfsPath::parse(s).unwrap()
    }

    #[test]
    fn test_static_table() {
        let table = AssetTable::from_static(&[
            ("splash.png", &SPLASH[..]),
            ("fonts/mono.psf", &b"psf2"[..]),
        ])
        .unwrap();
        assert_eq!(table.len(), 2);
        let volume = mount(table);

        let attr = volume.stat(&p("/splash.png")).unwrap();
        assert_eq!(attr.size, 1024);
        assert!(volume.stat(&p("/fonts")).unwrap().is_dir());

        let mut file = volume.open(&p("/splash.png"), OpenFlags::read()).unwrap();
        let mut buf = vec![0u8; 2048];
        assert_eq!(file.read_at(0, &mut buf).unwrap(), 1024);
        assert_eq!(file.read_at(1024, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_mutations_are_read_only() {
        let volume = mount(AssetTable::from_static(&[("a", &b"x"[..])]).unwrap());
        assert!(matches!(
            volume.open(&p("/a"), OpenFlags::write()),
            Err(VfsError::ReadOnly(_))
        ));
        assert!(matches!(volume.mkdir(&p("/d")), Err(VfsError::ReadOnly(_))));
        assert!(matches!(volume.remove(&p("/a")), Err(VfsError::ReadOnly(_))));
    }

    #[test]
    fn test_load_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("img")).unwrap();
        std::fs::write(dir.path().join("img/logo.png"), b"png").unwrap();
        std::fs::create_dir(dir.path().join("empty")).unwrap();

        let volume = mount(AssetTable::load_dir(dir.path()).unwrap());
        let names: Vec<_> = volume
            .list(&VfsPath::root())
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["empty", "img"]);
        assert!(volume.stat(&p("/img/logo.png")).unwrap().mtime.is_some());
    }

    #[test]
    fn test_wrong_root_rejected() {
        let volumes = VolumeRegistry::new();
        let result = AssetDriver.mount(
            MountRoot::None,
            &MountOptions::new(),
            &MountContext::new(&volumes),
        );
        assert!(matches!(result, Err(VfsError::InvalidArgument(_))));
    }
}
