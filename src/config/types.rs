use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Matches the setup window load tests use when connecting every VU up front.
pub const DEFAULT_BULK_CONNECT_TIMEOUT: Duration = Duration::from_secs(360);
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;
pub const DEFAULT_BULK_PARALLELISM: usize = 16;

/// How the server host key is checked during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostKeyPolicy {
    /// Require a matching entry in an OpenSSH known_hosts file.
    KnownHosts(PathBuf),
    /// Skip verification entirely. Test environments only.
    AcceptAny,
}

impl HostKeyPolicy {
    /// `~/.ssh/known_hosts` of the current user.
    pub fn user_known_hosts() -> Self {
        let path = dirs::home_dir()
            .map(|home| home.join(".ssh").join("known_hosts"))
            .unwrap_or_else(|| PathBuf::from(".ssh/known_hosts"));
        HostKeyPolicy::KnownHosts(path)
    }

    pub fn is_insecure(&self) -> bool {
        matches!(self, HostKeyPolicy::AcceptAny)
    }
}

impl Default for HostKeyPolicy {
    fn default() -> Self {
        Self::user_known_hosts()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectOptions {
    /// Upper bound for TCP dial, SSH handshake, authentication and SFTP
    /// subsystem start combined. Hostname resolution uses the system resolver
    /// and cannot be interrupted, so a stalled lookup can overrun this bound.
    pub connect_timeout: Duration,
    /// Blocking I/O timeout applied to an established session. `None` waits
    /// indefinitely.
    pub io_timeout: Option<Duration>,
    pub host_key: HostKeyPolicy,
    /// SSH keepalive interval in seconds, 0 disables keepalives.
    pub keepalive_interval_secs: u32,
    pub compress: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            io_timeout: None,
            host_key: HostKeyPolicy::default(),
            keepalive_interval_secs: 0,
            compress: false,
        }
    }
}

impl ConnectOptions {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_host_key(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key = policy;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub buffer_size: usize,
    /// When set, local transfer paths and key files must resolve inside this
    /// directory.
    pub local_root: Option<PathBuf>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            local_root: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub connect: ConnectOptions,
    pub transfer: TransferConfig,
    /// Budget for a whole `connect_vus` batch.
    pub bulk_connect_timeout: Duration,
    /// Concurrent connects used by the async bulk connect.
    pub bulk_connect_parallelism: usize,
    /// First identifier handed out by `connect_next` / `connect_vus`.
    pub first_vu_id: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            connect: ConnectOptions::default(),
            transfer: TransferConfig::default(),
            bulk_connect_timeout: DEFAULT_BULK_CONNECT_TIMEOUT,
            bulk_connect_parallelism: DEFAULT_BULK_PARALLELISM,
            first_vu_id: 1,
        }
    }
}

impl ManagerConfig {
    pub fn with_connect(mut self, connect: ConnectOptions) -> Self {
        self.connect = connect;
        self
    }

    pub fn with_transfer(mut self, transfer: TransferConfig) -> Self {
        self.transfer = transfer;
        self
    }

    pub fn with_bulk_connect_timeout(mut self, timeout: Duration) -> Self {
        self.bulk_connect_timeout = timeout;
        self
    }
}
