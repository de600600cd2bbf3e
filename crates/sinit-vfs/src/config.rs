//! Mount tables in RON.
//!
//! ```ron
//! (
//!     platform: hosted,
//!     default_volume: Some("/"),
//!     variables: { "entry": "linux" },
//!     mounts: [
//!         (name: "res", driver: "assets", root: Assets("share/sinit")),
//!         (name: "/", driver: "posix", root: Directory("/sysroot")),
//!         (name: "/run", driver: "socket", root: Directory("/run/sinit")),
//!         (name: "cfg", driver: "template", root: Wrap(volume: "/")),
//!     ],
//! )
//! ```
//!
//! Mounts run in order, so layer volumes must come after the volumes
//! they wrap. Relative host paths are taken from the config file's
//! directory when loaded with [`VfsConfig::load`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::driver::{MountOptions, MountRoot};
use crate::drivers::{AssetTable, TemplateVars};
use crate::error::VfsError;
use crate::init::Platform;
use crate::registry::VolumeInfo;
use crate::vfs::Vfs;

/// Errors from loading or applying a mount table.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("mount {name}: {source}")]
    Mount {
        name: String,
        #[source]
        source: VfsError,
    },
    #[error(transparent)]
    Vfs(#[from] VfsError),
}

/// Backing root of one mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RootSpec {
    None,
    /// Host directory.
    Directory(PathBuf),
    /// Archive file, read into memory at mount time.
    Archive(PathBuf),
    /// Host directory loaded into an asset table.
    Assets(PathBuf),
    Layers { upper: String, lower: String },
    Wrap { volume: String },
}

/// One entry of the mount table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSpec {
    pub name: String,
    pub driver: String,
    pub root: RootSpec,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

/// Whole-VFS configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VfsConfig {
    #[serde(default)]
    pub platform: Platform,
    #[serde(default)]
    pub default_volume: Option<String>,
    /// Initial template bindings, shared by every template mount.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub mounts: Vec<MountSpec>,
    /// Known storage units, published in the volume-info registry.
    #[serde(default)]
    pub devices: Vec<VolumeInfo>,
    /// Directory relative host paths are resolved against.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl VfsConfig {
    /// Load a RON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_ron(&text)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    /// Parse RON text.
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(text)?)
    }

    fn host_path(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    fn mount_root(&self, spec: &RootSpec) -> Result<MountRoot, ConfigError> {
        Ok(match spec {
            RootSpec::None => MountRoot::None,
            RootSpec::Directory(dir) => MountRoot::Directory(self.host_path(dir)),
            RootSpec::Archive(file) => {
                let bytes = std::fs::read(self.host_path(file))?;
                MountRoot::Archive(Arc::from(bytes))
            }
            RootSpec::Assets(dir) => {
                MountRoot::Assets(Arc::new(AssetTable::load_dir(self.host_path(dir))?))
            }
            RootSpec::Layers { upper, lower } => MountRoot::Layers {
                upper: upper.clone(),
                lower: lower.clone(),
            },
            RootSpec::Wrap { volume } => MountRoot::Wrap {
                volume: volume.clone(),
            },
        })
    }
}

impl Vfs {
    /// Build a VFS from a mount table.
    ///
    /// Drivers for the configured platform are registered, then every
    /// mount runs in order. If one fails, everything already mounted is
    /// torn down again and the error is returned.
    pub fn from_config(config: &VfsConfig) -> Result<Vfs, ConfigError> {
        let vfs = Vfs::init(config.platform)?;
        if let Err(e) = apply(&vfs, config) {
            warn!(error = %e, "config failed, shutting down");
            vfs.shutdown();
            return Err(e);
        }
        info!(volumes = config.mounts.len(), "vfs configured");
        Ok(vfs)
    }
}

fn apply(vfs: &Vfs, config: &VfsConfig) -> Result<(), ConfigError> {
    let vars: TemplateVars = config.variables.clone().into_iter().collect();
    for spec in &config.mounts {
        let root = config.mount_root(&spec.root)?;
        let options = MountOptions {
            read_only: spec.read_only,
            variables: vars.clone(),
            extra: spec.options.clone(),
        };
        vfs.mount(&spec.name, &spec.driver, root, options)
            .map_err(|source| ConfigError::Mount {
                name: spec.name.clone(),
                source,
            })?;
    }
    vfs.set_default_volume(config.default_volume.as_deref())?;
    vfs.volume_infos().replace_all(config.devices.clone());
    Ok(())
}
