pub mod error;
pub mod factory;
pub mod handle;
pub mod memory;
pub mod ssh;
pub mod types;

pub use error::{ConnectionError, ConnectionResult};
pub use factory::{prepare_auth, Connector, SessionFactory};
pub use handle::{RemoteFs, RemoteWriter, SessionHandle};
pub use memory::{MemoryConnector, MemoryServer};
pub use ssh::SshConnector;
pub use types::{AuthMethod, ConnectTarget, Credentials, SessionInfo, VuId};
