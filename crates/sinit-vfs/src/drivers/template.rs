//! Variable-substituting backend.
//!
//! Wraps another mounted volume and rewrites every path before handing
//! it on. `${name}` is replaced from the mount's [`TemplateVars`];
//! `${name:-fallback}` uses `fallback` when `name` is unbound. The table
//! is shared, so a boot script can retarget the volume at runtime:
//!
//! ```text
//! cfg://loader.conf  ->  template(wrap = "/boot/${entry:-default}")
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use regex::{Captures, Regex};
use tracing::debug;

use crate::driver::{FileOps, FsDriver, MountContext, MountOptions, MountRoot, VolumeOps};
use crate::error::{VfsError, VfsResult};
use crate::path::VfsPath;
use crate::types::{Capabilities, DirEntry, FileAttr, OpenFlags, StatFs};
use crate::volume::PinnedVolume;

/// Registry name of the template driver.
pub const DRIVER_NAME: &str = "template";

const PLACEHOLDER: &str = r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}";

fn placeholder_regex() -> VfsResult<Regex> {
    Regex::new(PLACEHOLDER).map_err(|e| VfsError::invalid(format!("placeholder pattern: {e}")))
}

/// Shared substitution table.
///
/// Clones share storage: a value set through any clone is seen by every
/// template volume mounted with it.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    inner: Arc<RwLock<BTreeMap<String, String>>>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name`, replacing any previous value.
    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.write().insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.inner.read().get(name).cloned()
    }

    /// Unbind `name`, returning the old value.
    pub fn remove(&self, name: &str) -> Option<String> {
        self.inner.write().remove(name)
    }

    /// Snapshot of every binding.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.inner.read().clone()
    }

    /// Expand the placeholders in `input`.
    pub fn expand(&self, input: &str) -> VfsResult<String> {
        self.expand_with(&placeholder_regex()?, input)
    }

    fn expand_with(&self, re: &Regex, input: &str) -> VfsResult<String> {
        if !input.contains("${") {
            return Ok(input.to_string());
        }
        let vars = self.inner.read();
        let mut missing = None;
        let out = re.replace_all(input, |caps: &Captures<'_>| {
            let name = &caps[1];
            match (vars.get(name), caps.get(2)) {
                (Some(value), _) => value.clone(),
                (None, Some(fallback)) => fallback.as_str().to_string(),
                (None, None) => {
                    missing.get_or_insert_with(|| name.to_string());
                    String::new()
                }
            }
        });
        match missing {
            Some(name) => Err(VfsError::UndefinedVariable(name)),
            None => Ok(out.into_owned()),
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TemplateVars {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let map = iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }
}

/// Driver for path-templated views of another volume.
#[derive(Debug, Default)]
pub struct TemplateDriver;

impl FsDriver for TemplateDriver {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::all()
    }

    fn mount(
        &self,
        root: MountRoot,
        options: &MountOptions,
        ctx: &MountContext<'_>,
    ) -> VfsResult<Box<dyn VolumeOps>> {
        let MountRoot::Wrap { volume } = root else {
            return Err(root.mismatch(DRIVER_NAME, "wrap"));
        };
        let inner = ctx.pin(&volume)?;
        debug!(volume = inner.name(), "template");
        Ok(Box::new(TemplateVolume {
            inner,
            vars: options.variables.clone(),
            re: placeholder_regex()?,
        }))
    }
}

struct TemplateVolume {
    inner: PinnedVolume,
    vars: TemplateVars,
    re: Regex,
}

impl TemplateVolume {
    fn expand(&self, path: &VfsPath) -> VfsResult<VfsPath> {
        let raw = path.to_string();
        let expanded = self.vars.expand_with(&self.re, &raw)?;
        if expanded == raw {
            return Ok(path.clone());
        }
        VfsPath::parse(&expanded)
    }
}

impl VolumeOps for TemplateVolume {
    fn open(&self, path: &VfsPath, flags: OpenFlags) -> VfsResult<Box<dyn FileOps>> {
        self.inner.open_file(&self.expand(path)?, flags)
    }

    fn stat(&self, path: &VfsPath) -> VfsResult<FileAttr> {
        self.inner.stat(&self.expand(path)?)
    }

    fn list(&self, path: &VfsPath) -> VfsResult<Vec<DirEntry>> {
        self.inner.list(&self.expand(path)?)
    }

    fn mkdir(&self, path: &VfsPath) -> VfsResult<()> {
        self.inner.mkdir(&self.expand(path)?)
    }

    fn remove(&self, path: &VfsPath) -> VfsResult<()> {
        self.inner.remove(&self.expand(path)?)
    }

    fn rename(&self, from: &VfsPath, to: &VfsPath) -> VfsResult<()> {
        self.inner.rename(&self.expand(from)?, &self.expand(to)?)
    }

    fn statfs(&self) -> VfsResult<StatFs> {
        self.inner.statfs()
    }

    fn capabilities(&self) -> Option<Capabilities> {
        Some(self.inner.capabilities())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::assets::{AssetDriver, AssetTable};
    use crate::vfs::Vfs;

    #[test]
    fn test_expand() {
        let vars: TemplateVars = [("arch", "x86_64"), ("entry", "linux")].into_iter().collect();
        assert_eq!(vars.expand("/boot/${entry}/${arch}").unwrap(), "/boot/linux/x86_64");
        assert_eq!(vars.expand("${flavor:-generic}.cfg").unwrap(), "generic.cfg");
        assert_eq!(vars.expand("${arch:-none}").unwrap(), "x86_64");
        assert_eq!(vars.expand("no placeholders").unwrap(), "no placeholders");
        assert_eq!(vars.expand("${}").unwrap(), "${}");
    }

    #[test]
    fn test_undefined_variable() {
        let vars = TemplateVars::new();
        match vars.expand("/boot/${entry}") {
            Err(VfsError::UndefinedVariable(name)) => assert_eq!(name, "entry"),
            other => panic!("expected UndefinedVariable, got {other:?}"),
        }
    }

    #[test]
    fn test_clones_share_bindings() {
        let vars = TemplateVars::new();
        let other = vars.clone();
        other.set("entry", "rescue");
        assert_eq!(vars.get("entry").as_deref(), Some("rescue"));
        assert_eq!(vars.remove("entry").as_deref(), Some("rescue"));
        assert!(other.snapshot().is_empty());
    }

    fn setup(vars: &TemplateVars) -> (Vfs, Arc<crate::Volume>) {
        let vfs = Vfs::new();
        vfs.register_driver(Arc::new(AssetDriver)).unwrap();
        vfs.register_driver(Arc::new(TemplateDriver)).unwrap();

        let mut table = AssetTable::new();
        table.insert("linux/cmdline", b"quiet".to_vec()).unwrap();
        table.insert("rescue/cmdline", b"single".to_vec()).unwrap();
        vfs.mount("entries", "assets", MountRoot::Assets(Arc::new(table)), MountOptions::new())
            .unwrap();
        let volume = vfs
            .mount(
                "cfg",
                "template",
                MountRoot::Wrap {
                    volume: "entries".into(),
                },
                MountOptions::new().with_variables(vars.clone()),
            )
            .unwrap();
        (vfs, volume)
    }

    fn read(volume: &crate::Volume, path: &str) -> VfsResult<Vec<u8>> {
        let mut file = volume.open_file(&VfsPath::parse(path)?, OpenFlags::read())?;
        let mut buf = vec![0u8; 64];
        let n = file.read_at(0, &mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    #[test]
    fn test_runtime_rebinding() {
        let vars = TemplateVars::new();
        let (_vfs, volume) = setup(&vars);

        assert!(matches!(
            read(&volume, "/${entry}/cmdline"),
            Err(VfsError::UndefinedVariable(_))
        ));
        assert_eq!(read(&volume, "/${entry:-linux}/cmdline").unwrap(), b"quiet");

        vars.set("entry", "rescue");
        assert_eq!(read(&volume, "/${entry}/cmdline").unwrap(), b"single");
        assert_eq!(
            volume.capabilities(),
            Capabilities::READ_ONLY,
            "template inherits the wrapped volume's capabilities"
        );
    }

    #[test]
    fn test_wrapped_volume_pinned() {
        let vars = TemplateVars::new();
        let (vfs, _volume) = setup(&vars);
        assert!(matches!(vfs.unmount("entries", false), Err(VfsError::Busy(_))));
        vfs.unmount("cfg", false).unwrap();
        vfs.unmount("entries", false).unwrap();
    }
}
