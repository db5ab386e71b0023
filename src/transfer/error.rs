use crate::connection::VuId;
use crate::registry::RegistryError;
use crate::transfer::types::TransferDirection;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("No session for {0}")]
    SessionNotFound(VuId),

    #[error("Session for {0} was closed")]
    SessionClosed(VuId),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("{} is outside {}", .path.display(), .root.display())]
    OutsideSandbox { path: PathBuf, root: PathBuf },

    #[error("Local file {}: {source}", .path.display())]
    LocalFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Remote file {path}: {source}")]
    RemoteFile {
        path: String,
        source: std::io::Error,
    },

    #[error("Permission denied: {path}")]
    PermissionDenied { path: String },

    #[error("{direction} failed after {bytes} bytes: {source}")]
    Stream {
        direction: TransferDirection,
        bytes: u64,
        source: std::io::Error,
    },
}

impl TransferError {
    /// Short label used for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            TransferError::SessionNotFound(_) => "session_not_found",
            TransferError::SessionClosed(_) => "session_closed",
            TransferError::InvalidPath(_) => "invalid_path",
            TransferError::OutsideSandbox { .. } => "outside_sandbox",
            TransferError::LocalFile { .. } => "local_file",
            TransferError::RemoteFile { .. } => "remote_file",
            TransferError::PermissionDenied { .. } => "permission_denied",
            TransferError::Stream { .. } => "stream",
        }
    }
}

impl From<RegistryError> for TransferError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::SessionNotFound(vu) => TransferError::SessionNotFound(vu),
        }
    }
}

pub type TransferResult<T> = Result<T, TransferError>;
