//! Layer backends.
//!
//! | Driver     | Root                  | Capabilities            |
//! |------------|-----------------------|-------------------------|
//! | `assets`   | [`AssetTable`]        | read-only               |
//! | `posix`    | host directory        | all                     |
//! | `socket`   | host directory        | read, write, list, stat |
//! | `uefi`     | `SimpleFileSystem`    | all                     |
//! | `zip`      | archive bytes         | read-only               |
//! | `overlay`  | upper + lower volumes | derived from layers     |
//! | `template` | one volume            | derived from the volume |

pub mod assets;
pub mod overlay;
#[cfg(unix)]
pub mod posix;
#[cfg(unix)]
pub mod socket;
pub mod template;
pub mod uefi;
#[cfg(feature = "zip")]
pub mod zip;

use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::Arc;
use std::time::SystemTime;

use crate::driver::FileOps;
use crate::error::{VfsError, VfsResult};
use crate::path::VfsPath;
use crate::types::{DirEntry, FileAttr, FileType};

pub use assets::{AssetDriver, AssetTable};
pub use overlay::OverlayDriver;
#[cfg(unix)]
pub use posix::PosixDriver;
#[cfg(unix)]
pub use socket::SocketDriver;
pub use template::{TemplateDriver, TemplateVars};
pub use uefi::UefiDriver;
#[cfg(feature = "zip")]
pub use self::zip::ZipDriver;

/// Immutable file contents, borrowed from the binary or shared.
#[derive(Clone)]
pub enum Blob {
    Static(&'static [u8]),
    Shared(Arc<[u8]>),
}

impl Deref for Blob {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Blob::Static(bytes) => bytes,
            Blob::Shared(bytes) => &bytes[..],
        }
    }
}

impl From<Vec<u8>> for Blob {
    fn from(bytes: Vec<u8>) -> Self {
        Blob::Shared(bytes.into())
    }
}

impl From<&'static [u8]> for Blob {
    fn from(bytes: &'static [u8]) -> Self {
        Blob::Static(bytes)
    }
}

impl std::fmt::Debug for Blob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Blob({} bytes)", self.len())
    }
}

/// Open state for a read-only in-memory file.
pub(crate) struct BlobFile {
    data: Blob,
    mtime: Option<SystemTime>,
}

impl BlobFile {
    pub(crate) fn new(data: Blob, mtime: Option<SystemTime>) -> Self {
        Self { data, mtime }
    }
}

impl FileOps for BlobFile {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> VfsResult<usize> {
        Ok(copy_at(&self.data, offset, buf))
    }

    fn size(&mut self) -> VfsResult<u64> {
        Ok(self.data.len() as u64)
    }

    fn stat(&mut self) -> VfsResult<FileAttr> {
        Ok(FileAttr::file(self.data.len() as u64).with_mtime(self.mtime))
    }
}

/// Copy from `data` at `offset` into `buf`; 0 at or past the end.
pub(crate) fn copy_at(data: &[u8], offset: u64, buf: &mut [u8]) -> usize {
    let Ok(start) = usize::try_from(offset) else {
        return 0;
    };
    if start >= data.len() {
        return 0;
    }
    let n = buf.len().min(data.len() - start);
    buf[..n].copy_from_slice(&data[start..start + n]);
    n
}

/// A node in a [`TreeIndex`].
#[derive(Debug, Clone)]
pub(crate) enum TreeNode<T> {
    Dir,
    File(T),
}

/// Path index for read-only trees whose directories are implied by the
/// files inside them (asset tables, archives).
#[derive(Debug, Clone)]
pub(crate) struct TreeIndex<T> {
    nodes: BTreeMap<VfsPath, TreeNode<T>>,
}

impl<T> Default for TreeIndex<T> {
    fn default() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(VfsPath::root(), TreeNode::Dir);
        Self { nodes }
    }
}

impl<T> TreeIndex<T> {
    /// Add a directory and its missing parents.
    pub(crate) fn insert_dir(&mut self, path: &VfsPath) -> VfsResult<()> {
        let mut current = VfsPath::root();
        for seg in path.segments() {
            current = current.join(seg)?;
            match self.nodes.get(&current) {
                Some(TreeNode::File(_)) => {
                    return Err(VfsError::invalid(format!("{current} is both file and directory")));
                }
                Some(TreeNode::Dir) => {}
                None => {
                    self.nodes.insert(current.clone(), TreeNode::Dir);
                }
            }
        }
        Ok(())
    }

    /// Add a file, creating its parent directories. Replaces an existing file.
    pub(crate) fn insert_file(&mut self, path: &VfsPath, value: T) -> VfsResult<()> {
        let parent = path
            .parent()
            .ok_or_else(|| VfsError::invalid("cannot store a file at the root"))?;
        self.insert_dir(&parent)?;
        if let Some(TreeNode::Dir) = self.nodes.get(path) {
            return Err(VfsError::invalid(format!("{path} is both file and directory")));
        }
        self.nodes.insert(path.clone(), TreeNode::File(value));
        Ok(())
    }

    pub(crate) fn get(&self, path: &VfsPath) -> VfsResult<&TreeNode<T>> {
        self.nodes
            .get(path)
            .ok_or_else(|| VfsError::not_found(path.to_string()))
    }

    /// Number of files.
    pub(crate) fn file_count(&self) -> usize {
        self.nodes
            .values()
            .filter(|n| matches!(n, TreeNode::File(_)))
            .count()
    }

    /// Sorted children of a directory.
    pub(crate) fn list(&self, path: &VfsPath) -> VfsResult<Vec<DirEntry>> {
        match self.get(path)? {
            TreeNode::Dir => {}
            TreeNode::File(_) => {
                return Err(VfsError::invalid(format!("{path} is not a directory")));
            }
        }
        let depth = path.depth() + 1;
        let entries = self
            .nodes
            .range(path.clone()..)
            .take_while(|(p, _)| p.starts_with(path))
            .filter(|(p, _)| p.depth() == depth)
            .filter_map(|(p, node)| {
                let name = p.file_name()?;
                let kind = match node {
                    TreeNode::Dir => FileType::Directory,
                    TreeNode::File(_) => FileType::File,
                };
                Some(DirEntry::new(name, kind))
            })
            .collect();
        Ok(entries)
    }
}
