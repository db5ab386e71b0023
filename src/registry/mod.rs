pub mod error;
pub mod store;
pub mod types;

pub use error::{CloseError, RegistryError, RegistryResult};
pub use store::SessionRegistry;
pub use types::{CloseFailure, Replaced, TeardownReport};
