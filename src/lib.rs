//! VU-indexed SFTP session manager.
//!
//! Lets many concurrently executing virtual users of a load test each hold an
//! independent, authenticated SFTP connection, move files over it and tear it
//! down again. The load-generation runtime owns scheduling; this crate owns the
//! sessions.
//!
//! ```ignore
//! use vu_sftp::{Credentials, ManagerConfig, SessionManager, VuId};
//!
//! let manager = SessionManager::new(ManagerConfig::default());
//! let credentials = Credentials::key("keys/id_ed25519", Some("secret".into()));
//! let vus = manager.connect_vus(2, "sftp.local", "22", "loadtest", &credentials)?;
//! manager.upload(vus[0], "./testdata", "payload.bin", "/upload")?;
//! let report = manager.disconnect_vus();
//! assert!(report.is_clean());
//! ```

pub mod config;
pub mod connection;
pub mod logging;
pub mod manager;
pub mod metrics;
pub mod registry;
pub mod transfer;

pub use config::{ConfigError, ConnectOptions, HostKeyPolicy, ManagerConfig, TransferConfig};
pub use connection::{
    ConnectTarget, ConnectionError, Connector, Credentials, SessionFactory, SessionHandle,
    SessionInfo, VuId,
};
pub use manager::{AsyncSessionManager, BulkConnectError, SessionManager, SftpError, SftpResult};
pub use registry::{CloseError, RegistryError, SessionRegistry, TeardownReport};
pub use transfer::{TransferDirection, TransferEngine, TransferError, TransferOutcome, TransferRequest};
