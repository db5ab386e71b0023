pub mod engine;
pub mod error;
pub mod paths;
pub mod types;

pub use engine::TransferEngine;
pub use error::{TransferError, TransferResult};
pub use types::{TransferDirection, TransferOutcome, TransferRequest};
