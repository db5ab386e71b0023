//! Metrics for VU session and transfer activity
//!
//! Emitted through the `metrics` facade; nothing is recorded until the host
//! runtime installs a recorder.
//!
//! Key metrics exposed:
//! - Connects and connect failures by reason
//! - Active sessions and close failures
//! - Transfer counts, bytes and durations by direction

pub mod recorder;

pub use recorder::{
    init_metrics, record_close_failed, record_connect, record_connect_failed,
    record_session_closed, record_session_opened, TransferMetrics,
};
