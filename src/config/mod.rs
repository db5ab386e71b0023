pub mod env;
pub mod error;
pub mod types;

pub use env::ScenarioEnv;
pub use error::{ConfigError, ConfigResult};
pub use types::{ConnectOptions, HostKeyPolicy, ManagerConfig, TransferConfig};
