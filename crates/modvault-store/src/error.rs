//! Store error types.

use serde::{Deserialize, Serialize};

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Malformed module path.
    #[error("invalid module path '{path}': {detail}")]
    InvalidPath { path: String, detail: String },

    /// Malformed version string.
    #[error("invalid version '{version}': {detail}")]
    InvalidVersion { version: String, detail: String },

    /// Archive violates the module layout rules.
    #[error("invalid module archive: {detail}")]
    InvalidArchive { detail: String },

    /// Request parameters that could address files outside the canonical set.
    #[error("invalid request: {detail}")]
    InvalidRequest { detail: String },

    /// The archive manifest declares a different module path.
    #[error("module path mismatch: requested '{requested}', manifest declares '{declared}'")]
    ModuleIdentityMismatch { requested: String, declared: String },

    /// Requested module, version or file does not exist.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// Another ingest for the same module path holds the lock.
    #[error("module '{path}' is busy with another upload, retry later")]
    Conflict { path: String },

    /// The caller cancelled the operation before it committed.
    #[error("operation cancelled")]
    Cancelled,

    /// Underlying storage failure (disk full, permission denied, ...).
    #[error("storage failure: {detail}")]
    Storage { detail: String },
}

/// Coarse classification of a [`StoreError`], stable for callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidPath,
    InvalidVersion,
    InvalidArchive,
    InvalidRequest,
    ModuleIdentityMismatch,
    NotFound,
    Conflict,
    Cancelled,
    Storage,
}

/// User-visible error payload: a kind and a message, nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::InvalidPath { .. } => ErrorKind::InvalidPath,
            StoreError::InvalidVersion { .. } => ErrorKind::InvalidVersion,
            StoreError::InvalidArchive { .. } => ErrorKind::InvalidArchive,
            StoreError::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            StoreError::ModuleIdentityMismatch { .. } => ErrorKind::ModuleIdentityMismatch,
            StoreError::NotFound { .. } => ErrorKind::NotFound,
            StoreError::Conflict { .. } => ErrorKind::Conflict,
            StoreError::Cancelled => ErrorKind::Cancelled,
            StoreError::Storage { .. } => ErrorKind::Storage,
        }
    }

    /// Build the structured payload handed to the service layer.
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind(),
            message: self.to_string(),
        }
    }

    pub(crate) fn invalid_path(path: &str, detail: impl Into<String>) -> Self {
        StoreError::InvalidPath {
            path: path.to_string(),
            detail: detail.into(),
        }
    }

    pub(crate) fn invalid_version(version: &str, detail: impl Into<String>) -> Self {
        StoreError::InvalidVersion {
            version: version.to_string(),
            detail: detail.into(),
        }
    }

    pub(crate) fn invalid_archive(detail: impl Into<String>) -> Self {
        StoreError::InvalidArchive {
            detail: detail.into(),
        }
    }

    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        StoreError::NotFound { what: what.into() }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => StoreError::not_found("no such file or directory"),
            _ => StoreError::Storage {
                detail: err.kind().to_string(),
            },
        }
    }
}

impl From<zip::result::ZipError> for StoreError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(io) => io.into(),
            other => StoreError::invalid_archive(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Storage {
            detail: format!("malformed JSON record: {err}"),
        }
    }
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
