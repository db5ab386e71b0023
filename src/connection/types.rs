use crate::connection::error::{ConnectionError, ConnectionResult};
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use zeroize::Zeroizing;

/// Identifier of one virtual user for the duration of a test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VuId(pub u64);

impl VuId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for VuId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for VuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VU[{:05}]", self.0)
    }
}

/// A validated host and port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectTarget {
    host: String,
    port: u16,
}

impl ConnectTarget {
    pub fn new(host: impl Into<String>, port: u16) -> ConnectionResult<Self> {
        let host = host.into();
        let host = host.trim();
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        if host.is_empty() {
            return Err(ConnectionError::InvalidTarget("host is empty".into()));
        }
        if host.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(ConnectionError::InvalidTarget(format!(
                "host {host:?} contains whitespace or control characters"
            )));
        }
        if port == 0 {
            return Err(ConnectionError::InvalidTarget("port 0 is not connectable".into()));
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// Parses the string form load-test scripts pass around.
    pub fn parse(host: &str, port: &str) -> ConnectionResult<Self> {
        let port_str = port.trim();
        if port_str.is_empty() {
            return Err(ConnectionError::InvalidTarget("port is empty".into()));
        }
        let port = port_str.parse::<u16>().map_err(|e| {
            ConnectionError::InvalidTarget(format!("port {port_str:?} is not a valid port: {e}"))
        })?;
        Self::new(host, port)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Credentials supplied to a connect call.
#[derive(Clone)]
pub enum Credentials {
    Password(SecretString),
    Key {
        path: PathBuf,
        passphrase: Option<SecretString>,
    },
}

impl Credentials {
    pub fn password(password: impl Into<String>) -> Self {
        Credentials::Password(SecretString::new(password.into()))
    }

    pub fn key(path: impl Into<PathBuf>, passphrase: Option<String>) -> Self {
        Credentials::Key {
            path: path.into(),
            passphrase: passphrase.map(SecretString::new),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Password(_) => f.write_str("Password([REDACTED])"),
            Credentials::Key { path, passphrase } => f
                .debug_struct("Key")
                .field("path", path)
                .field("passphrase", &passphrase.as_ref().map(|_| "[REDACTED]"))
                .finish(),
        }
    }
}

/// Credentials after local preparation, ready to hand to a [`Connector`].
///
/// [`Connector`]: crate::connection::Connector
pub enum AuthMethod {
    Password(SecretString),
    /// Unencrypted OpenSSH private key, decrypted in memory.
    KeyData(Zeroizing<String>),
    /// Key format libssh2 decrypts itself (legacy PEM).
    KeyFile {
        path: PathBuf,
        passphrase: Option<SecretString>,
    },
}

impl AuthMethod {
    pub fn name(&self) -> &'static str {
        match self {
            AuthMethod::Password(_) => "password",
            AuthMethod::KeyData(_) => "publickey",
            AuthMethod::KeyFile { .. } => "publickey-file",
        }
    }
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::KeyFile { path, .. } => {
                f.debug_struct("KeyFile").field("path", path).finish_non_exhaustive()
            }
            other => write!(f, "{}([REDACTED])", other.name()),
        }
    }
}

/// Snapshot of a session's metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub auth_method: String,
    pub connected_at: DateTime<Utc>,
    pub bytes_uploaded: u64,
    pub bytes_downloaded: u64,
    pub transfers: u64,
    pub closed: bool,
}
