//! In-memory file-system protocol.
//!
//! A RAM disk speaking [`SimpleFileSystem`]. Firmware builds use it for
//! initrd-style scratch volumes; everywhere else it stands in for real
//! media. All data is lost when the last reference is dropped.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;

use super::{
    EfiFileInfo, EfiFileSystemInfo, EfiResult, EfiStatus, FILE_DIRECTORY, FILE_MODE_CREATE,
    FILE_MODE_WRITE, FileProtocol, SimpleFileSystem,
};
use crate::error::{VfsError, VfsResult};
use crate::path::VfsPath;

const BLOCK_SIZE: u32 = 512;

/// Largest file the RAM disk will hold, matching the FAT32 ceiling.
const MAX_FILE_SIZE: usize = u32::MAX as usize;

/// Grow or shrink `data` to `len` bytes, failing instead of aborting when
/// the allocation cannot be satisfied.
fn resize_file(data: &mut Vec<u8>, len: usize) -> EfiResult<()> {
    if len > MAX_FILE_SIZE {
        return Err(EfiStatus::VOLUME_FULL);
    }
    if len > data.len() {
        data.try_reserve_exact(len - data.len())
            .map_err(|_| EfiStatus::OUT_OF_RESOURCES)?;
    }
    data.resize(len, 0);
    Ok(())
}

/// Entry in the memory filesystem.
#[derive(Debug, Clone)]
enum Entry {
    File { data: Vec<u8>, mtime: SystemTime },
    Directory { mtime: SystemTime },
}

impl Entry {
    fn is_dir(&self) -> bool {
        matches!(self, Entry::Directory { .. })
    }

    fn info(&self, name: &str) -> EfiFileInfo {
        match self {
            Entry::File { data, mtime } => EfiFileInfo {
                file_name: name.to_string(),
                file_size: data.len() as u64,
                attribute: 0,
                modification_time: Some(*mtime),
            },
            Entry::Directory { mtime } => EfiFileInfo {
                file_name: name.to_string(),
                file_size: 0,
                attribute: FILE_DIRECTORY,
                modification_time: Some(*mtime),
            },
        }
    }
}

#[derive(Debug)]
struct Disk {
    /// Keyed by normalized segments; the root is the empty vector.
    entries: RwLock<BTreeMap<Vec<String>, Entry>>,
    read_only: bool,
    label: String,
}

impl Disk {
    fn children(entries: &BTreeMap<Vec<String>, Entry>, dir: &[String]) -> Vec<(String, Entry)> {
        entries
            .range(dir.to_vec()..)
            .take_while(|(k, _)| k.starts_with(dir))
            .filter(|(k, _)| k.len() == dir.len() + 1)
            .map(|(k, e)| (k[dir.len()].clone(), e.clone()))
            .collect()
    }
}

/// In-memory [`SimpleFileSystem`].
#[derive(Debug, Clone)]
pub struct MemoryFileSystem {
    disk: Arc<Disk>,
}

impl Default for MemoryFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFileSystem {
    /// Create an empty, writable RAM disk.
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(
            Vec::new(),
            Entry::Directory {
                mtime: SystemTime::now(),
            },
        );
        Self {
            disk: Arc::new(Disk {
                entries: RwLock::new(entries),
                read_only: false,
                label: "RAMDISK".to_string(),
            }),
        }
    }

    /// Mark the media write-protected. Call before sharing the disk.
    pub fn with_read_only(self, read_only: bool) -> Self {
        self.rebuild(|disk| disk.read_only = read_only)
    }

    /// Set the volume label.
    pub fn with_label(self, label: impl Into<String>) -> Self {
        let label = label.into();
        self.rebuild(|disk| disk.label = label)
    }

    fn rebuild(self, f: impl FnOnce(&mut Disk)) -> Self {
        let mut disk = Disk {
            entries: RwLock::new(self.disk.entries.read().clone()),
            read_only: self.disk.read_only,
            label: self.disk.label.clone(),
        };
        f(&mut disk);
        Self {
            disk: Arc::new(disk),
        }
    }

    /// Seed a file, creating parent directories. Accepts `/` or `\` separators.
    pub fn insert_file(&self, path: &str, data: Vec<u8>) -> VfsResult<()> {
        let key = seed_key(path)?;
        if key.is_empty() {
            return Err(VfsError::invalid("cannot store a file at the root"));
        }
        let mut entries = self.disk.entries.write();
        ensure_dirs(&mut entries, &key[..key.len() - 1])?;
        if entries.get(&key).is_some_and(Entry::is_dir) {
            return Err(VfsError::already_exists(path.to_string()));
        }
        entries.insert(
            key,
            Entry::File {
                data,
                mtime: SystemTime::now(),
            },
        );
        Ok(())
    }

    /// Seed a directory and its parents.
    pub fn insert_dir(&self, path: &str) -> VfsResult<()> {
        let key = seed_key(path)?;
        ensure_dirs(&mut self.disk.entries.write(), &key)
    }

    /// Number of regular files on the disk.
    pub fn file_count(&self) -> usize {
        self.disk
            .entries
            .read()
            .values()
            .filter(|e| !e.is_dir())
            .count()
    }
}

fn seed_key(path: &str) -> VfsResult<Vec<String>> {
    Ok(VfsPath::parse(&path.replace('\\', "/"))?.segments().to_vec())
}

fn ensure_dirs(entries: &mut BTreeMap<Vec<String>, Entry>, dir: &[String]) -> VfsResult<()> {
    for depth in 1..=dir.len() {
        let key = dir[..depth].to_vec();
        match entries.get(&key) {
            Some(Entry::File { .. }) => {
                return Err(VfsError::invalid(format!("{} is a file", key.join("/"))));
            }
            Some(Entry::Directory { .. }) => {}
            None => {
                entries.insert(
                    key,
                    Entry::Directory {
                        mtime: SystemTime::now(),
                    },
                );
            }
        }
    }
    Ok(())
}

/// Resolve a firmware name against `base`.
fn join_efi(base: &[String], name: &str) -> Vec<String> {
    let mut out = if name.starts_with('\\') {
        Vec::new()
    } else {
        base.to_vec()
    };
    for part in name.split('\\') {
        match part {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            seg => out.push(seg.to_string()),
        }
    }
    out
}

impl SimpleFileSystem for MemoryFileSystem {
    fn open_volume(&self) -> EfiResult<Box<dyn FileProtocol>> {
        Ok(Box::new(MemoryFile {
            disk: Arc::clone(&self.disk),
            key: Vec::new(),
            writable: false,
            position: 0,
        }))
    }
}

struct MemoryFile {
    disk: Arc<Disk>,
    key: Vec<String>,
    writable: bool,
    /// Byte offset for files, entry index for directories.
    position: u64,
}

impl MemoryFile {
    fn name(&self) -> String {
        self.key.last().cloned().unwrap_or_else(|| "\\".to_string())
    }
}

impl FileProtocol for MemoryFile {
    fn open(&mut self, name: &str, mode: u64, attributes: u64) -> EfiResult<Box<dyn FileProtocol>> {
        let writable = mode & FILE_MODE_WRITE != 0;
        if writable && self.disk.read_only {
            return Err(EfiStatus::WRITE_PROTECTED);
        }
        let key = join_efi(&self.key, name);

        let mut entries = self.disk.entries.write();
        if !name.starts_with('\\') && !entries.get(&self.key).is_some_and(Entry::is_dir) {
            return Err(EfiStatus::NOT_FOUND);
        }
        if !entries.contains_key(&key) {
            if mode & FILE_MODE_CREATE == 0 || key.is_empty() {
                return Err(EfiStatus::NOT_FOUND);
            }
            if !entries.get(&key[..key.len() - 1]).is_some_and(Entry::is_dir) {
                return Err(EfiStatus::NOT_FOUND);
            }
            let mtime = SystemTime::now();
            let entry = if attributes & FILE_DIRECTORY != 0 {
                Entry::Directory { mtime }
            } else {
                Entry::File {
                    data: Vec::new(),
                    mtime,
                }
            };
            entries.insert(key.clone(), entry);
        }
        drop(entries);

        Ok(Box::new(MemoryFile {
            disk: Arc::clone(&self.disk),
            key,
            writable,
            position: 0,
        }))
    }

    fn delete(self: Box<Self>) -> EfiResult<()> {
        if !self.writable || self.key.is_empty() {
            return Err(EfiStatus::WARN_DELETE_FAILURE);
        }
        let mut entries = self.disk.entries.write();
        if !Disk::children(&entries, &self.key).is_empty() {
            return Err(EfiStatus::WARN_DELETE_FAILURE);
        }
        entries
            .remove(&self.key)
            .map(|_| ())
            .ok_or(EfiStatus::NOT_FOUND)
    }

    fn read(&mut self, buf: &mut [u8]) -> EfiResult<usize> {
        let entries = self.disk.entries.read();
        match entries.get(&self.key) {
            Some(Entry::File { data, .. }) => {
                let n = crate::drivers::copy_at(data, self.position, buf);
                self.position += n as u64;
                Ok(n)
            }
            Some(Entry::Directory { .. }) => Err(EfiStatus::UNSUPPORTED),
            None => Err(EfiStatus::NOT_FOUND),
        }
    }

    fn read_entry(&mut self) -> EfiResult<Option<EfiFileInfo>> {
        let entries = self.disk.entries.read();
        match entries.get(&self.key) {
            Some(Entry::Directory { .. }) => {}
            Some(Entry::File { .. }) => return Err(EfiStatus::INVALID_PARAMETER),
            None => return Err(EfiStatus::NOT_FOUND),
        }
        let children = Disk::children(&entries, &self.key);
        let next = children
            .get(self.position as usize)
            .map(|(name, entry)| entry.info(name));
        if next.is_some() {
            self.position += 1;
        }
        Ok(next)
    }

    fn write(&mut self, buf: &[u8]) -> EfiResult<usize> {
        if !self.writable {
            return Err(EfiStatus::ACCESS_DENIED);
        }
        let mut entries = self.disk.entries.write();
        match entries.get_mut(&self.key) {
            Some(Entry::File { data, mtime }) => {
                let start = usize::try_from(self.position).map_err(|_| EfiStatus::VOLUME_FULL)?;
                let end = start.checked_add(buf.len()).ok_or(EfiStatus::VOLUME_FULL)?;
                if end > data.len() {
                    resize_file(data, end)?;
                }
                data[start..end].copy_from_slice(buf);
                *mtime = SystemTime::now();
                self.position = end as u64;
                Ok(buf.len())
            }
            Some(Entry::Directory { .. }) => Err(EfiStatus::UNSUPPORTED),
            None => Err(EfiStatus::NOT_FOUND),
        }
    }

    fn get_position(&mut self) -> EfiResult<u64> {
        Ok(self.position)
    }

    fn set_position(&mut self, position: u64) -> EfiResult<()> {
        let entries = self.disk.entries.read();
        match entries.get(&self.key) {
            Some(Entry::File { data, .. }) => {
                self.position = if position == u64::MAX {
                    data.len() as u64
                } else {
                    position
                };
                Ok(())
            }
            Some(Entry::Directory { .. }) if position == 0 => {
                self.position = 0;
                Ok(())
            }
            Some(Entry::Directory { .. }) => Err(EfiStatus::UNSUPPORTED),
            None => Err(EfiStatus::NOT_FOUND),
        }
    }

    fn get_info(&mut self) -> EfiResult<EfiFileInfo> {
        let entries = self.disk.entries.read();
        entries
            .get(&self.key)
            .map(|entry| entry.info(&self.name()))
            .ok_or(EfiStatus::NOT_FOUND)
    }

    fn set_info(&mut self, info: &EfiFileInfo) -> EfiResult<()> {
        if !self.writable {
            return Err(EfiStatus::ACCESS_DENIED);
        }
        let mut entries = self.disk.entries.write();
        let entry = entries.get_mut(&self.key).ok_or(EfiStatus::NOT_FOUND)?;

        if let Entry::File { data, mtime } = entry {
            if data.len() as u64 != info.file_size {
                let size = usize::try_from(info.file_size).map_err(|_| EfiStatus::VOLUME_FULL)?;
                resize_file(data, size)?;
                *mtime = SystemTime::now();
            }
        }

        if info.file_name != self.name() {
            let parent = &self.key[..self.key.len().saturating_sub(1)];
            let target = join_efi(parent, &info.file_name);
            if target.is_empty() || target.starts_with(&self.key) {
                return Err(EfiStatus::INVALID_PARAMETER);
            }
            if entries.contains_key(&target) {
                return Err(EfiStatus::ACCESS_DENIED);
            }
            if !entries.get(&target[..target.len() - 1]).is_some_and(Entry::is_dir) {
                return Err(EfiStatus::NOT_FOUND);
            }
            let moved: Vec<_> = entries
                .range(self.key.clone()..)
                .take_while(|(k, _)| k.starts_with(&self.key))
                .map(|(k, _)| k.clone())
                .collect();
            for old in moved {
                if let Some(entry) = entries.remove(&old) {
                    let mut new = target.clone();
                    new.extend_from_slice(&old[self.key.len()..]);
                    entries.insert(new, entry);
                }
            }
            self.key = target;
        }
        Ok(())
    }

    fn get_fs_info(&mut self) -> EfiResult<EfiFileSystemInfo> {
        let entries = self.disk.entries.read();
        let used: u64 = entries
            .values()
            .map(|e| match e {
                Entry::File { data, .. } => (data.len() as u64).div_ceil(u64::from(BLOCK_SIZE)),
                Entry::Directory { .. } => 1,
            })
            .sum::<u64>()
            * u64::from(BLOCK_SIZE);
        Ok(EfiFileSystemInfo {
            read_only: self.disk.read_only,
            volume_size: used,
            free_space: 0,
            block_size: BLOCK_SIZE,
            volume_label: self.disk.label.clone(),
        })
    }
}
