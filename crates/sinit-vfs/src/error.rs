//! VFS error types.
//!
//! Every backend translates its native failures into [`VfsError`] before
//! the value crosses the dispatcher, so callers only ever match on this
//! taxonomy.

use std::io;
use thiserror::Error;

/// VFS error type.
#[derive(Debug, Error)]
pub enum VfsError {
    /// File, directory or registry entry not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Path already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A driver with this name is already registered.
    #[error("driver already registered: {0}")]
    AlreadyRegistered(String),

    /// A volume with this name is already mounted (or being mounted).
    #[error("volume name in use: {0}")]
    NameInUse(String),

    /// Resource is in use (open handles, dependent volumes, non-empty directory).
    #[error("resource busy: {0}")]
    Busy(String),

    /// The driver does not implement the requested capability.
    #[error("operation not supported: {0}")]
    Unsupported(String),

    /// Volume is read-only.
    #[error("read-only volume: {0}")]
    ReadOnly(String),

    /// Malformed path, offset or argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Handle was closed, or its volume was force-unmounted.
    #[error("invalid handle")]
    InvalidHandle,

    /// No driver registered under this name.
    #[error("driver not found: {0}")]
    DriverNotFound(String),

    /// No mounted volume owns this path.
    #[error("no such volume: {0}")]
    NoSuchVolume(String),

    /// Opaque backend I/O failure.
    ///
    /// `code` carries the underlying OS errno or firmware status for
    /// diagnostics.
    #[error("I/O failure: {message}")]
    Io { code: Option<i64>, message: String },

    /// Allocation failed in the backend.
    #[error("out of memory")]
    OutOfMemory,

    /// Template placeholder has no bound value and no default.
    #[error("undefined template variable: {0}")]
    UndefinedVariable(String),
}

impl VfsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create a Busy error.
    pub fn busy(what: impl Into<String>) -> Self {
        Self::Busy(what.into())
    }

    /// Create an Unsupported error.
    pub fn unsupported(op: impl Into<String>) -> Self {
        Self::Unsupported(op.into())
    }

    /// Create a ReadOnly error.
    pub fn read_only(what: impl Into<String>) -> Self {
        Self::ReadOnly(what.into())
    }

    /// Create an InvalidArgument error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a NoSuchVolume error.
    pub fn no_such_volume(path: impl Into<String>) -> Self {
        Self::NoSuchVolume(path.into())
    }

    /// Create an Io error with an optional backend code.
    pub fn io(code: Option<i64>, message: impl Into<String>) -> Self {
        Self::Io {
            code,
            message: message.into(),
        }
    }

    /// Returns true for `NotFound`.
    ///
    /// Layer backends use this to decide whether to fall through to the
    /// next layer.
    pub fn is_not_found(&self) -> bool {
        matches!(self, VfsError::NotFound(_))
    }
}

/// Translate host I/O errors by kind, keeping the raw errno.
impl From<io::Error> for VfsError {
    fn from(e: io::Error) -> Self {
        let msg = e.to_string();
        match e.kind() {
            io::ErrorKind::NotFound => VfsError::NotFound(msg),
            io::ErrorKind::AlreadyExists => VfsError::AlreadyExists(msg),
            io::ErrorKind::ReadOnlyFilesystem | io::ErrorKind::PermissionDenied => {
                VfsError::ReadOnly(msg)
            }
            io::ErrorKind::DirectoryNotEmpty | io::ErrorKind::ResourceBusy => {
                VfsError::Busy(msg)
            }
            io::ErrorKind::InvalidInput
            | io::ErrorKind::NotADirectory
            | io::ErrorKind::IsADirectory => VfsError::InvalidArgument(msg),
            io::ErrorKind::Unsupported => VfsError::Unsupported(msg),
            io::ErrorKind::OutOfMemory => VfsError::OutOfMemory,
            _ => VfsError::Io {
                code: e.raw_os_error().map(i64::from),
                message: msg,
            },
        }
    }
}

#[cfg(feature = "zip")]
impl From<zip::result::ZipError> for VfsError {
    fn from(e: zip::result::ZipError) -> Self {
        use zip::result::ZipError;
        match e {
            ZipError::FileNotFound => VfsError::NotFound("archive entry".into()),
            ZipError::Io(e) => VfsError::from(e),
            ZipError::UnsupportedArchive(msg) => VfsError::Unsupported(msg.to_string()),
            other => VfsError::io(None, other.to_string()),
        }
    }
}

/// Convert VfsError to std::io::Error for compatibility.
impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        let kind = match &e {
            VfsError::NotFound(_) | VfsError::NoSuchVolume(_) | VfsError::DriverNotFound(_) => {
                io::ErrorKind::NotFound
            }
            VfsError::AlreadyExists(_)
            | VfsError::AlreadyRegistered(_)
            | VfsError::NameInUse(_) => io::ErrorKind::AlreadyExists,
            VfsError::Busy(_) => io::ErrorKind::ResourceBusy,
            VfsError::Unsupported(_) => io::ErrorKind::Unsupported,
            VfsError::ReadOnly(_) => io::ErrorKind::ReadOnlyFilesystem,
            VfsError::InvalidArgument(_)
            | VfsError::InvalidHandle
            | VfsError::UndefinedVariable(_) => io::ErrorKind::InvalidInput,
            VfsError::OutOfMemory => io::ErrorKind::OutOfMemory,
            VfsError::Io { code: Some(code), .. } => {
                if let Ok(raw) = i32::try_from(*code) {
                    return io::Error::from_raw_os_error(raw);
                }
                io::ErrorKind::Other
            }
            VfsError::Io { code: None, .. } => io::ErrorKind::Other,
        };
        io::Error::new(kind, e)
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_kind_translation() {
        let e: VfsError = io::Error::from(io::ErrorKind::NotFound).into();
        assert!(e.is_not_found());

        let e: VfsError = io::Error::from(io::ErrorKind::DirectoryNotEmpty).into();
        assert!(matches!(e, VfsError::Busy(_)));

        let e: VfsError = io::Error::from(io::ErrorKind::ReadOnlyFilesystem).into();
        assert!(matches!(e, VfsError::ReadOnly(_)));
    }

    #[test]
    fn test_raw_os_error_kept() {
        let e: VfsError = io::Error::from_raw_os_error(5).into();
        match e {
            VfsError::Io { code, .. } => assert_eq!(code, Some(5)),
            other => panic!("expected Io, got {other:?}"),
        }
    }

    #[test]
    fn test_into_io_error() {
        let e: io::Error = VfsError::read_only("res").into();
        assert_eq!(e.kind(), io::ErrorKind::ReadOnlyFilesystem);

        let e: io::Error = VfsError::InvalidHandle.into();
        assert_eq!(e.kind(), io::ErrorKind::InvalidInput);
    }
}
