use crate::connection::VuId;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("No session for {0}")]
    SessionNotFound(VuId),
}

/// Closing one session failed. The entry is gone from the registry either way.
#[derive(Error, Debug)]
#[error("Closing session {session_id} of {vu} failed: {source}")]
pub struct CloseError {
    pub vu: VuId,
    pub session_id: Uuid,
    #[source]
    pub source: std::io::Error,
}

pub type RegistryResult<T> = Result<T, RegistryError>;
