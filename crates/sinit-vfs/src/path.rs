//! Logical path parsing and normalization.
//!
//! Callers hand the VFS arbitrary strings. Two shapes are understood:
//!
//! - `name://rest` names a volume explicitly (`res:///splash.png`).
//! - anything else is an absolute path routed by longest mount prefix
//!   (`/boot/overlay/vendor`). A path without a leading `/` is taken as
//!   relative to `/`.

use std::fmt;

use crate::error::{VfsError, VfsResult};

/// Longest accepted path component, in bytes.
pub const NAME_MAX: usize = 255;

/// A normalized, absolute path inside one volume.
///
/// `.` segments are dropped and `..` pops the previous segment, clamped at
/// the root. Segments never contain `/` or NUL.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VfsPath {
    segments: Vec<String>,
}

impl VfsPath {
    /// The volume root.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse and normalize a slash-separated path.
    pub fn parse(raw: &str) -> VfsResult<Self> {
        let mut segments: Vec<String> = Vec::new();
        for part in raw.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                name => {
                    check_segment(name)?;
                    segments.push(name.to_string());
                }
            }
        }
        Ok(Self { segments })
    }

    /// Returns true for the volume root.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Path segments, outermost first.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Last segment, or `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Parent directory, or `None` for the root.
    pub fn parent(&self) -> Option<VfsPath> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Append one already-validated child name.
    pub fn join(&self, name: &str) -> VfsResult<VfsPath> {
        let mut joined = self.clone();
        for part in name.split('/').filter(|p| !p.is_empty() && *p != ".") {
            if part == ".." {
                joined.segments.pop();
            } else {
                check_segment(part)?;
                joined.segments.push(part.to_string());
            }
        }
        Ok(joined)
    }

    /// Returns true if `self` equals `prefix` or lies below it.
    pub fn starts_with(&self, prefix: &VfsPath) -> bool {
        self.segments.len() >= prefix.segments.len()
            && self.segments[..prefix.segments.len()] == prefix.segments[..]
    }

    /// Strip a leading prefix, returning the remainder as a path.
    pub fn strip_prefix(&self, prefix: &VfsPath) -> Option<VfsPath> {
        if !self.starts_with(prefix) {
            return None;
        }
        Some(Self {
            segments: self.segments[prefix.segments.len()..].to_vec(),
        })
    }

    /// Number of segments.
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// The path without its leading slash (`a/b`, or empty for the root).
    pub fn relative(&self) -> String {
        self.segments.join("/")
    }
}

impl fmt::Display for VfsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for seg in &self.segments {
            write!(f, "/{seg}")?;
        }
        Ok(())
    }
}

fn check_segment(name: &str) -> VfsResult<()> {
    if name.contains('\0') {
        return Err(VfsError::invalid("path segment contains NUL"));
    }
    if name.len() > NAME_MAX {
        return Err(VfsError::invalid(format!(
            "path segment longer than {NAME_MAX} bytes"
        )));
    }
    Ok(())
}

/// A caller path split into an optional explicit volume and an in-volume path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// Volume named by a `name://` prefix, if any.
    pub volume: Option<String>,
    /// Normalized path.
    pub path: VfsPath,
}

impl Location {
    /// Parse a caller-supplied path string.
    pub fn parse(raw: &str) -> VfsResult<Self> {
        if raw.contains('\0') {
            return Err(VfsError::invalid("path contains NUL"));
        }
        if let Some((scheme, rest)) = raw.split_once("://") {
            if is_volume_scheme(scheme) {
                return Ok(Self {
                    volume: Some(scheme.to_string()),
                    path: VfsPath::parse(rest)?,
                });
            }
        }
        Ok(Self {
            volume: None,
            path: VfsPath::parse(raw)?,
        })
    }
}

/// Scheme-style volume names: a letter followed by letters, digits, `-`, `_`, `.`, `+`.
fn is_volume_scheme(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+'))
}

/// Normalize a volume name for registration.
///
/// Names beginning with `/` are mount points and get path normalization
/// (`/boot/` and `/boot` are the same volume). Other names must be valid
/// scheme names so that `name://` addresses them.
pub fn normalize_volume_name(name: &str) -> VfsResult<String> {
    if name.is_empty() {
        return Err(VfsError::invalid("empty volume name"));
    }
    if name.contains('\0') {
        return Err(VfsError::invalid("volume name contains NUL"));
    }
    if name.starts_with('/') {
        return Ok(VfsPath::parse(name)?.to_string());
    }
    if !is_volume_scheme(name) {
        return Err(VfsError::invalid(format!("bad volume name: {name}")));
    }
    Ok(name.to_string())
}
