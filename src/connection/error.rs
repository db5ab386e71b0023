use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Credential error: {0}")]
    Credentials(String),

    #[error("Failed to resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        source: std::io::Error,
    },

    #[error("TCP connection to {host}:{port} failed: {source}")]
    Connect {
        host: String,
        port: u16,
        source: std::io::Error,
    },

    #[error("Connection to {host}:{port} timed out after {timeout:?}")]
    Timeout {
        host: String,
        port: u16,
        timeout: Duration,
    },

    #[error("SSH handshake with {host}:{port} failed: {reason}")]
    Handshake {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("Host key verification for {host}:{port} failed: {reason}")]
    HostKey {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("Authentication as {user} on {host}:{port} failed: {reason}")]
    Authentication {
        host: String,
        port: u16,
        user: String,
        reason: String,
    },

    #[error("SFTP subsystem on {host}:{port} failed: {reason}")]
    Subsystem {
        host: String,
        port: u16,
        reason: String,
    },
}

impl ConnectionError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ConnectionError::Timeout { .. })
    }

    /// Short label used for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            ConnectionError::InvalidTarget(_) => "invalid_target",
            ConnectionError::Credentials(_) => "credentials",
            ConnectionError::Resolve { .. } => "resolve",
            ConnectionError::Connect { .. } => "connect",
            ConnectionError::Timeout { .. } => "timeout",
            ConnectionError::Handshake { .. } => "handshake",
            ConnectionError::HostKey { .. } => "host_key",
            ConnectionError::Authentication { .. } => "authentication",
            ConnectionError::Subsystem { .. } => "subsystem",
        }
    }
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;
