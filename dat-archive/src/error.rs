//! Errors returned from archive operations.

use std::{borrow::Cow, sync::Arc};

/// Result type of all archive operations.
pub type Result<T, E = ArchiveError> = std::result::Result<T, E>;

/// The stable kind of an [`ArchiveError`].
///
/// Callers should branch on this rather than on error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr)]
pub enum ErrorKind {
    /// The operation deadline passed.
    Timeout,
    /// The archive can not be written to.
    ArchiveNotWritable,
    /// The path is reserved and can not be modified directly.
    ProtectedFileNotWritable,
    /// The path is malformed.
    InvalidPath,
    /// Nothing exists at the path.
    NotFound,
    /// An argument was malformed.
    InvalidArgument,
    /// `create` was pointed at a non empty location.
    CreateConflict,
    /// `load` was pointed at a location without an archive folder.
    LoadMissing,
    /// A file was expected, something else was found.
    NotAFile,
    /// A folder was expected, something else was found.
    NotAFolder,
    /// An entry already exists at the path.
    AlreadyExists,
    /// The folder still has entries.
    DirectoryNotEmpty,
    /// The operation is not available for this archive.
    NotSupported,
    /// A name could not be resolved to an archive key.
    NameNotResolved,
    /// The storage or replication engine failed.
    Engine,
}

/// Error of an archive operation.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum ArchiveError {
    /// The operation did not finish before its deadline.
    #[error("Timed out{}", phase.as_ref().map(|p| format!(" while {p}")).unwrap_or_default())]
    Timeout {
        /// The last phase the operation announced before the deadline passed.
        phase: Option<String>,
    },
    /// The archive is not owned by us, or the session is pinned to a historic version.
    #[error("Cannot write to this archive: {0}")]
    ArchiveNotWritable(Cow<'static, str>),
    /// Direct mutation of the manifest.
    #[error("Protected file is not writable: {path}")]
    ProtectedFileNotWritable {
        /// The offending path.
        path: String,
    },
    /// The path is malformed.
    #[error("Invalid path {path:?}: {reason}")]
    InvalidPath {
        /// The offending path.
        path: String,
        /// What is wrong with it.
        reason: &'static str,
    },
    /// Nothing exists at the path.
    #[error("File not found: {path}")]
    NotFound {
        /// The path which was looked up.
        path: String,
    },
    /// An argument was malformed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(Cow<'static, str>),
    /// `create` was pointed at a location that already has content.
    #[error("Cannot create Dat archive. ({0})")]
    CreateConflict(Cow<'static, str>),
    /// `load` was pointed at a location that has no folder.
    #[error("Cannot load Dat archive. ({0})")]
    LoadMissing(Cow<'static, str>),
    /// A file was expected.
    #[error("Not a file: {path}")]
    NotAFile {
        /// The offending path.
        path: String,
    },
    /// A folder was expected.
    #[error("Not a folder: {path}")]
    NotAFolder {
        /// The offending path.
        path: String,
    },
    /// An entry already exists at the path.
    #[error("Entry already exists: {path}")]
    AlreadyExists {
        /// The offending path.
        path: String,
    },
    /// The folder still has entries and a recursive removal was not requested.
    #[error("Directory is not empty: {path}")]
    DirectoryNotEmpty {
        /// The offending path.
        path: String,
    },
    /// The operation is not available.
    #[error("Not supported: {0}")]
    NotSupported(Cow<'static, str>),
    /// A name did not resolve to an archive key.
    #[error("Failed to resolve {name}: {reason}")]
    NameNotResolved {
        /// The name which was looked up.
        name: String,
        /// Why resolution failed.
        reason: String,
    },
    /// The storage or replication engine failed.
    #[error("{0:#}")]
    Engine(Arc<anyhow::Error>),
}

impl ArchiveError {
    /// The stable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::ArchiveNotWritable(_) => ErrorKind::ArchiveNotWritable,
            Self::ProtectedFileNotWritable { .. } => ErrorKind::ProtectedFileNotWritable,
            Self::InvalidPath { .. } => ErrorKind::InvalidPath,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::CreateConflict(_) => ErrorKind::CreateConflict,
            Self::LoadMissing(_) => ErrorKind::LoadMissing,
            Self::NotAFile { .. } => ErrorKind::NotAFile,
            Self::NotAFolder { .. } => ErrorKind::NotAFolder,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::DirectoryNotEmpty { .. } => ErrorKind::DirectoryNotEmpty,
            Self::NotSupported(_) => ErrorKind::NotSupported,
            Self::NameNotResolved { .. } => ErrorKind::NameNotResolved,
            Self::Engine(_) => ErrorKind::Engine,
        }
    }

    /// Not the owner of the archive.
    pub fn not_owner() -> Self {
        Self::ArchiveNotWritable("Not the owner".into())
    }

    /// The session is pinned to a historic version.
    pub fn historic_version() -> Self {
        Self::ArchiveNotWritable("Cannot modify a historic version".into())
    }

    pub(crate) fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub(crate) fn invalid_path(path: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason,
        }
    }
}

impl From<anyhow::Error> for ArchiveError {
    fn from(err: anyhow::Error) -> Self {
        Self::Engine(Arc::new(err))
    }
}

impl From<std::io::Error> for ArchiveError {
    fn from(err: std::io::Error) -> Self {
        Self::Engine(Arc::new(err.into()))
    }
}

impl From<dat_archive_base::LocatorError> for ArchiveError {
    fn from(err: dat_archive_base::LocatorError) -> Self {
        Self::InvalidArgument(err.to_string().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_phase() {
        let err = ArchiveError::Timeout {
            phase: Some("reading file".into()),
        };
        assert_eq!(err.to_string(), "Timed out while reading file");
        assert_eq!(
            ArchiveError::Timeout { phase: None }.to_string(),
            "Timed out"
        );
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn engine_errors_keep_context() {
        let err: ArchiveError = anyhow::anyhow!("disk full").context("appending block").into();
        assert_eq!(err.kind(), ErrorKind::Engine);
        assert_eq!(err.to_string(), "appending block: disk full");
        let cloned = err.clone();
        assert_eq!(cloned.to_string(), err.to_string());
    }

    #[test]
    fn kinds_are_stable_strings() {
        assert_eq!(ErrorKind::ArchiveNotWritable.to_string(), "ArchiveNotWritable");
        assert_eq!(
            ArchiveError::historic_version().kind().as_ref(),
            "ArchiveNotWritable"
        );
    }
}
