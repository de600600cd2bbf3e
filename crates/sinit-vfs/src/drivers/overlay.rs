//! Union backend: a writable upper volume over a read-only lower one.
//!
//! Lookups try upper first, then lower. Every change lands in upper:
//!
//! - Opening a lower-only file for writing copies it (and any missing
//!   parent directories) into upper first.
//! - Deleting something lower provides leaves a whiteout, an empty file
//!   named `.wh.<name>` beside it in upper. A whited-out path and
//!   everything below it is invisible.
//! - A directory created over a whiteout is marked opaque with a
//!   `.wh..wh..opq` file so the old lower contents stay hidden.
//!
//! Marker files never appear in listings, and names starting with `.wh.`
//! cannot be used through the overlay.

use std::collections::BTreeSet;

use tracing::debug;

use crate::driver::{FileOps, FsDriver, MountContext, MountOptions, MountRoot, VolumeOps};
use crate::error::{VfsError, VfsResult};
use crate::path::VfsPath;
use crate::types::{Capabilities, DirEntry, FileAttr, OpenFlags, StatFs};
use crate::volume::{PinnedVolume, Volume};

/// Registry name of the overlay driver.
pub const DRIVER_NAME: &str = "overlay";

const WHITEOUT_PREFIX: &str = ".wh.";
const OPAQUE_MARKER: &str = ".wh..wh..opq";
const COPY_CHUNK: usize = 64 * 1024;

/// Driver for upper-over-lower unions.
#[derive(Debug, Default)]
pub struct OverlayDriver;

impl FsDriver for OverlayDriver {
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
        ctx: &MountContext<'_>,
    ) -> VfsResult<Box<dyn VolumeOps>> {
        let MountRoot::Layers { upper, lower } = root else {
            return Err(root.mismatch(DRIVER_NAME, "layers"));
        };
        if upper == lower {
            return Err(VfsError::invalid("overlay upper and lower must differ"));
        }
        let upper = ctx.pin(&upper)?;
        let lower = ctx.pin(&lower)?;

        let browse = Capabilities::READ | Capabilities::SEEK | Capabilities::LIST | Capabilities::STAT;
        let caps = (upper.capabilities() & lower.capabilities() & browse)
            | (upper.capabilities() & Capabilities::MUTATING);
        debug!(upper = upper.name(), lower = lower.name(), ?caps, "overlay");
        Ok(Box::new(OverlayVolume { upper, lower, caps }))
    }
}

struct OverlayVolume {
    upper: PinnedVolume,
    lower: PinnedVolume,
    caps: Capabilities,
}

fn stat_opt(volume: &Volume, path: &VfsPath) -> VfsResult<Option<FileAttr>> {
    match volume.stat(path) {
        Ok(attr) => Ok(Some(attr)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

fn is_marker(name: &str) -> bool {
    name.starts_with(WHITEOUT_PREFIX)
}

fn whiteout_of(path: &VfsPath) -> VfsResult<VfsPath> {
    let parent = path.parent().unwrap_or_default();
    let name = path.file_name().unwrap_or_default();
    parent.join(&format!("{WHITEOUT_PREFIX}{name}"))
}

fn check_name(path: &VfsPath) -> VfsResult<()> {
    if path.segments().iter().any(|s| is_marker(s)) {
        return Err(VfsError::invalid(format!("{path}: reserved overlay name")));
    }
    Ok(())
}

impl OverlayVolume {
    /// True if a whiteout or opaque directory in upper hides `path` in lower.
    fn hidden(&self, path: &VfsPath) -> VfsResult<bool> {
        let mut prefix = VfsPath::root();
        for (i, seg) in path.segments().iter().enumerate() {
            prefix = prefix.join(seg)?;
            if stat_opt(&self.upper, &whiteout_of(&prefix)?)?.is_some() {
                return Ok(true);
            }
            if i + 1 < path.depth() && self.is_opaque(&prefix)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn is_opaque(&self, dir: &VfsPath) -> VfsResult<bool> {
        Ok(stat_opt(&self.upper, &dir.join(OPAQUE_MARKER)?)?.is_some())
    }

    fn in_lower(&self, path: &VfsPath) -> VfsResult<Option<FileAttr>> {
        if self.hidden(path)? {
            return Ok(None);
        }
        stat_opt(&self.lower, path)
    }

    fn merged_stat(&self, path: &VfsPath) -> VfsResult<Option<FileAttr>> {
        if let Some(attr) = stat_opt(&self.upper, path)? {
            return Ok(Some(attr));
        }
        self.in_lower(path)
    }

    fn require_parent_dir(&self, path: &VfsPath) -> VfsResult<VfsPath> {
        let parent = path.parent().unwrap_or_default();
        match self.merged_stat(&parent)? {
            Some(attr) if attr.is_dir() => Ok(parent),
            Some(_) => Err(VfsError::invalid(format!("{parent} is not a directory"))),
            None => Err(VfsError::not_found(parent.to_string())),
        }
    }

    /// Create `dir` and its ancestors in upper where only lower has them.
    fn copy_up_dirs(&self, dir: &VfsPath) -> VfsResult<()> {
        let mut prefix = VfsPath::root();
        for seg in dir.segments() {
            prefix = prefix.join(seg)?;
            match stat_opt(&self.upper, &prefix)? {
                Some(attr) if attr.is_dir() => {}
                Some(_) => return Err(VfsError::invalid(format!("{prefix} is not a directory"))),
                None => self.upper.mkdir(&prefix)?,
            }
        }
        Ok(())
    }

    fn copy_up_file(&self, path: &VfsPath) -> VfsResult<()> {
        let parent = path.parent().unwrap_or_default();
        self.copy_up_dirs(&parent)?;
        let mut src = self.lower.open_file(path, OpenFlags::read())?;
        let mut dst = self.upper.open_file(path, OpenFlags::create_truncate())?;
        let mut buf = vec![0u8; COPY_CHUNK];
        let mut offset = 0u64;
        loop {
            let n = src.read_at(offset, &mut buf)?;
            if n == 0 {
                break;
            }
            let mut written = 0;
            while written < n {
                let w = dst.write_at(offset + written as u64, &buf[written..n])?;
                if w == 0 {
                    return Err(VfsError::io(None, "copy-up wrote zero bytes"));
                }
                written += w;
            }
            offset += n as u64;
        }
        dst.flush()?;
        debug!(path = %path, bytes = offset, "copied up");
        Ok(())
    }

    fn touch(&self, path: &VfsPath) -> VfsResult<()> {
        self.upper.open_file(path, OpenFlags::create_truncate())?.flush()
    }

    fn add_whiteout(&self, path: &VfsPath) -> VfsResult<()> {
        let parent = path.parent().unwrap_or_default();
        self.copy_up_dirs(&parent)?;
        self.touch(&whiteout_of(path)?)
    }

    /// Remove a whiteout at `path`. Returns true if there was one.
    fn clear_whiteout(&self, path: &VfsPath) -> VfsResult<bool> {
        let marker = whiteout_of(path)?;
        if stat_opt(&self.upper, &marker)?.is_none() {
            return Ok(false);
        }
        self.upper.remove(&marker)?;
        Ok(true)
    }

    /// Delete marker files inside an upper directory so it can be removed.
    fn purge_markers(&self, dir: &VfsPath) -> VfsResult<()> {
        for entry in self.upper.list(dir)? {
            if is_marker(&entry.name) {
                self.upper.remove(&dir.join(&entry.name)?)?;
            }
        }
        Ok(())
    }

    fn merged_list(&self, path: &VfsPath) -> VfsResult<Vec<DirEntry>> {
        let upper = stat_opt(&self.upper, path)?;
        let lower = self.in_lower(path)?;
        let is_dir = match (&upper, &lower) {
            (Some(attr), _) => attr.is_dir(),
            (None, Some(attr)) => attr.is_dir(),
            (None, None) => return Err(VfsError::not_found(path.to_string())),
        };
        if !is_dir {
            return Err(VfsError::invalid(format!("{path} is not a directory")));
        }

        let mut names = BTreeSet::new();
        let mut whiteouts = BTreeSet::new();
        let mut entries = Vec::new();
        let mut opaque = false;
        if upper.is_some() {
            for entry in self.upper.list(path)? {
                if entry.name == OPAQUE_MARKER {
                    opaque = true;
                } else if let Some(name) = entry.name.strip_prefix(WHITEOUT_PREFIX) {
                    whiteouts.insert(name.to_string());
                } else {
                    names.insert(entry.name.clone());
                    entries.push(entry);
                }
            }
        }
        if !opaque && lower.as_ref().is_some_and(FileAttr::is_dir) {
            for entry in self.lower.list(path)? {
                if !names.contains(&entry.name) && !whiteouts.contains(&entry.name) {
                    entries.push(entry);
                }
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

impl VolumeOps for OverlayVolume {
    fn open(&self, path: &VfsPath, flags: OpenFlags) -> VfsResult<Box<dyn FileOps>> {
        check_name(path)?;
        if stat_opt(&self.upper, path)?.is_some() {
            return self.upper.open_file(path, flags);
        }
        let lower = self.in_lower(path)?;

        if !flags.is_mutating() {
            return match lower {
                Some(_) => self.lower.open_file(path, flags),
                None => Err(VfsError::not_found(path.to_string())),
            };
        }

        match lower {
            Some(_) if flags.exclusive => Err(VfsError::already_exists(path.to_string())),
            Some(attr) if attr.is_dir() => Err(VfsError::invalid(format!("{path} is a directory"))),
            Some(_) => {
                if flags.truncate {
                    self.copy_up_dirs(&path.parent().unwrap_or_default())?;
                } else {
                    self.copy_up_file(path)?;
                }
                self.upper.open_file(path, OpenFlags { create: true, ..flags })
            }
            None if !flags.create => Err(VfsError::not_found(path.to_string())),
            None => {
                let parent = self.require_parent_dir(path)?;
                self.copy_up_dirs(&parent)?;
                self.clear_whiteout(path)?;
                self.upper.open_file(path, flags)
            }
        }
    }

    fn stat(&self, path: &VfsPath) -> VfsResult<FileAttr> {
        check_name(path)?;
        self.merged_stat(path)?
            .ok_or_else(|| VfsError::not_found(path.to_string()))
    }

    fn list(&self, path: &VfsPath) -> VfsResult<Vec<DirEntry>> {
        check_name(path)?;
        self.merged_list(path)
    }

    fn mkdir(&self, path: &VfsPath) -> VfsResult<()> {
        check_name(path)?;
        if self.merged_stat(path)?.is_some() {
            return Err(VfsError::already_exists(path.to_string()));
        }
        let parent = self.require_parent_dir(path)?;
        self.copy_up_dirs(&parent)?;
        let was_whited_out = self.clear_whiteout(path)?;
        self.upper.mkdir(path)?;
        if was_whited_out || stat_opt(&self.lower, path)?.is_some() {
            self.touch(&path.join(OPAQUE_MARKER)?)?;
        }
        Ok(())
    }

    fn remove(&self, path: &VfsPath) -> VfsResult<()> {
        check_name(path)?;
        let upper = stat_opt(&self.upper, path)?;
        let lower = self.in_lower(path)?;
        let attr = upper
            .as_ref()
            .or(lower.as_ref())
            .ok_or_else(|| VfsError::not_found(path.to_string()))?;

        if attr.is_dir() && !self.merged_list(path)?.is_empty() {
            return Err(VfsError::busy(format!("directory {path} is not empty")));
        }
        if let Some(attr) = &upper {
            if attr.is_dir() {
                self.purge_markers(path)?;
            }
            self.upper.remove(path)?;
        }
        if lower.is_some() {
            self.add_whiteout(path)?;
        }
        Ok(())
    }

    fn rename(&self, from: &VfsPath, to: &VfsPath) -> VfsResult<()> {
        check_name(from)?;
        check_name(to)?;
        let upper = stat_opt(&self.upper, from)?;
        let lower = self.in_lower(from)?;
        let attr = upper
            .as_ref()
            .or(lower.as_ref())
            .cloned()
            .ok_or_else(|| VfsError::not_found(from.to_string()))?;
        if self.merged_stat(to)?.is_some() {
            return Err(VfsError::already_exists(to.to_string()));
        }

        if lower.is_some() {
            if attr.is_dir() {
                return Err(VfsError::unsupported(format!(
                    "rename of lower directory {from}"
                )));
            }
            if upper.is_none() {
                self.copy_up_file(from)?;
            }
        }

        let parent = self.require_parent_dir(to)?;
        self.copy_up_dirs(&parent)?;
        let was_whited_out = self.clear_whiteout(to)?;
        self.upper.rename(from, to)?;
        if attr.is_dir() && (was_whited_out || stat_opt(&self.lower, to)?.is_some()) {
            self.touch(&to.join(OPAQUE_MARKER)?)?;
        }
        if lower.is_some() {
            self.add_whiteout(from)?;
        }
        Ok(())
    }

    fn statfs(&self) -> VfsResult<StatFs> {
        self.upper.statfs()
    }

    fn capabilities(&self) -> Option<Capabilities> {
        Some(self.caps)
    }
}
