pub mod async_manager;
pub mod error;
pub mod manager;

pub use async_manager::AsyncSessionManager;
pub use error::{BulkConnectError, SftpError, SftpResult};
pub use manager::SessionManager;
