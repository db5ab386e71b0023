use crate::config::ConfigError;
use crate::connection::{ConnectionError, VuId};
use crate::registry::{CloseError, RegistryError};
use crate::transfer::TransferError;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SftpError {
    #[error("Connection failed: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Transfer failed: {0}")]
    Transfer(TransferError),

    #[error(transparent)]
    Close(#[from] CloseError),

    #[error(transparent)]
    BulkConnect(#[from] BulkConnectError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("No session for {0}")]
    SessionNotFound(VuId),

    #[error("Cannot assign {requested} more VU identifier(s); identifiers exhausted")]
    VuIdsExhausted { requested: u64 },

    #[error("Background task failed: {0}")]
    Task(String),
}

impl SftpError {
    pub fn is_session_not_found(&self) -> bool {
        matches!(self, SftpError::SessionNotFound(_))
    }
}

impl From<TransferError> for SftpError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::SessionNotFound(vu) => SftpError::SessionNotFound(vu),
            other => SftpError::Transfer(other),
        }
    }
}

impl From<RegistryError> for SftpError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::SessionNotFound(vu) => SftpError::SessionNotFound(vu),
        }
    }
}

/// A bulk connect that did not connect every VU.
///
/// Sessions the batch had already opened are closed again before this is
/// returned.
#[derive(Debug)]
pub struct BulkConnectError {
    pub failures: Vec<(VuId, ConnectionError)>,
    pub rolled_back: Vec<VuId>,
    pub not_attempted: Vec<VuId>,
}

impl BulkConnectError {
    pub fn failed_vus(&self) -> Vec<VuId> {
        self.failures.iter().map(|(vu, _)| *vu).collect()
    }

    pub fn first_failure(&self) -> Option<&(VuId, ConnectionError)> {
        self.failures.first()
    }
}

impl fmt::Display for BulkConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.failures.first() {
            Some((vu, err)) => write!(
                f,
                "Bulk connect failed for {} VU(s), first {}: {}",
                self.failures.len(),
                vu,
                err
            )?,
            None => f.write_str("Bulk connect failed")?,
        }
        write!(
            f,
            " ({} rolled back, {} not attempted)",
            self.rolled_back.len(),
            self.not_attempted.len()
        )
    }
}

impl std::error::Error for BulkConnectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.failures
            .first()
            .map(|(_, err)| err as &(dyn std::error::Error + 'static))
    }
}

pub type SftpResult<T> = Result<T, SftpError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_not_found_collapses() {
        let from_transfer = SftpError::from(TransferError::SessionNotFound(VuId(4)));
        let from_registry = SftpError::from(RegistryError::SessionNotFound(VuId(4)));
        assert!(from_transfer.is_session_not_found());
        assert!(from_registry.is_session_not_found());

        let other = SftpError::from(TransferError::InvalidPath("..".into()));
        assert!(!other.is_session_not_found());
    }

    #[test]
    fn test_bulk_error_display() {
        let err = BulkConnectError {
            failures: vec![(
                VuId(3),
                ConnectionError::Timeout {
                    host: "sftp".into(),
                    port: 22,
                    timeout: Duration::from_secs(1),
                },
            )],
            rolled_back: vec![VuId(1), VuId(2)],
            not_attempted: vec![VuId(4)],
        };
        let rendered = err.to_string();
        assert!(rendered.contains("VU[00003]"));
        assert!(rendered.contains("2 rolled back"));
        assert!(rendered.contains("1 not attempted"));
        assert_eq!(err.failed_vus(), vec![VuId(3)]);
        assert!(std::error::Error::source(&err).is_some());
    }
}
