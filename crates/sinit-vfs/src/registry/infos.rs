//! Volume-info registry.
//!
//! Descriptive records about bootable or browsable devices discovered by
//! the platform layer. Boot menus read these; nothing in the VFS mounts
//! from them automatically.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{VfsError, VfsResult};
use crate::locked::{Locked, VOLUME_INFO_LOCK};

/// Partition-table details for a volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionInfo {
    /// Index in the partition table, starting at 1.
    pub index: u32,
    pub label: Option<String>,
    pub uuid: Option<String>,
    /// First byte on the device.
    pub start: u64,
    /// Length in bytes.
    pub size: u64,
}

/// A discovered volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    /// Stable identifier, unique in the registry.
    pub id: String,
    /// Device node or firmware path.
    pub device: PathBuf,
    /// Human-readable title for menus.
    pub title: String,
    /// Filesystem type as probed, e.g. `"vfat"`.
    pub fs_type: Option<String>,
    #[serde(default)]
    pub partition: Option<PartitionInfo>,
    #[serde(default)]
    pub removable: bool,
    #[serde(default)]
    pub read_only: bool,
    /// Icon resource, usually a `res://` path.
    #[serde(default)]
    pub icon: Option<String>,
}

impl VolumeInfo {
    /// New record with only the required fields set.
    pub fn new(id: impl Into<String>, device: impl Into<PathBuf>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            device: device.into(),
            title: title.into(),
            fs_type: None,
            partition: None,
            removable: false,
            read_only: false,
            icon: None,
        }
    }

    /// Set the filesystem type, e.g. `vfat`.
    pub fn with_fs_type(mut self, fs_type: impl Into<String>) -> Self {
        self.fs_type = Some(fs_type.into());
        self
    }

    /// Attach partition table details.
    pub fn with_partition(mut self, partition: PartitionInfo) -> Self {
        self.partition = Some(partition);
        self
    }

    /// Set the icon name shown by boot menus.
    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    /// Mark the device as removable media.
    pub fn removable(mut self, removable: bool) -> Self {
        self.removable = removable;
        self
    }

    /// Mark the device as write protected.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}

/// Discovered volumes in insertion order.
pub struct VolumeInfoRegistry {
    infos: Locked<Vec<VolumeInfo>>,
}

impl Default for VolumeInfoRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl VolumeInfoRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            infos: Locked::new(VOLUME_INFO_LOCK, Vec::new()),
        }
    }

    /// Add a record, replacing any existing record with the same id in place.
    pub fn add(&self, info: VolumeInfo) {
        debug!(id = %info.id, device = %info.device.display(), "volume info");
        self.infos.with(|infos| {
            match infos.iter_mut().find(|existing| existing.id == info.id) {
                Some(existing) => *existing = info,
                None => infos.push(info),
            }
        });
    }

    /// Remove a record by id.
    pub fn remove(&self, id: &str) -> VfsResult<VolumeInfo> {
        self.infos
            .with(|infos| {
                let pos = infos.iter().position(|info| info.id == id)?;
                Some(infos.remove(pos))
            })
            .ok_or_else(|| VfsError::not_found(format!("volume info {id}")))
    }

    /// Replace every record, as after a device rescan.
    pub fn replace_all(&self, infos: Vec<VolumeInfo>) {
        let count = infos.len();
        self.infos.with(|current| *current = infos);
        debug!(count, "volume infos replaced");
    }

    /// Drop every record.
    pub fn clear(&self) {
        self.infos.with(Vec::clear);
    }

    /// Snapshot of every record.
    pub fn list(&self) -> Vec<VolumeInfo> {
        self.infos.with(|infos| infos.clone())
    }

    /// Record with the given id.
    pub fn get(&self, id: &str) -> Option<VolumeInfo> {
        self.infos
            .with(|infos| infos.iter().find(|info| info.id == id).cloned())
    }

    /// First record matching `pred`.
    pub fn find(&self, pred: impl Fn(&VolumeInfo) -> bool) -> Option<VolumeInfo> {
        self.infos
            .with(|infos| infos.iter().find(|info| pred(info)).cloned())
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.infos.with(|infos| infos.len())
    }

    /// True when no records are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn esp() -> VolumeInfo {
        VolumeInfo::new("esp", "/dev/sda1", "EFI System")
            .with_fs_type("vfat")
            .with_partition(PartitionInfo {
                index: 1,
                label: Some("ESP".into()),
                uuid: None,
                start: 1 << 20,
                size: 512 << 20,
            })
    }

    #[test]
    fn test_add_replaces_same_id() {
        let registry = VolumeInfoRegistry::new();
        registry.add(esp());
        registry.add(VolumeInfo::new("usb", "/dev/sdb", "USB stick").removable(true));
        registry.add(esp().with_icon("res:///icons/disk.png"));

        let list = registry.list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, "esp");
        assert_eq!(list[0].icon.as_deref(), Some("res:///icons/disk.png"));
    }

    #[test]
    fn test_remove_and_find() {
        let registry = VolumeInfoRegistry::new();
        registry.add(esp());
        registry.add(VolumeInfo::new("usb", "/dev/sdb", "USB stick").removable(true));

        let usb = registry.find(|info| info.removable).unwrap();
        assert_eq!(usb.id, "usb");

        registry.remove("usb").unwrap();
        assert!(registry.get("usb").is_none());
        assert!(matches!(registry.remove("usb"), Err(VfsError::NotFound(_))));
    }

    #[test]
    fn test_replace_all() {
        let registry = VolumeInfoRegistry::new();
        registry.add(esp());
        registry.replace_all(vec![VolumeInfo::new("nvme", "/dev/nvme0n1p2", "Linux")]);
        assert_eq!(registry.len(), 1);
        assert!(registry.get("esp").is_none());
        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_value(esp()).unwrap();
        assert_eq!(json["fs_type"], "vfat");
        assert_eq!(json["partition"]["index"], 1);
        let back: VolumeInfo = serde_json::from_value(json).unwrap();
        assert_eq!(back, esp());
    }
}
