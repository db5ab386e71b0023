//! Metrics recorder for VU SFTP operations

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize metric descriptions (call once at startup)
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    // Connection counters
    describe_counter!("vu_sftp_connects_total", "Sessions successfully established");
    describe_counter!(
        "vu_sftp_connect_failures_total",
        "Connect attempts that failed, by reason"
    );
    describe_histogram!(
        "vu_sftp_connect_duration_seconds",
        "Time from TCP dial to an open SFTP channel"
    );

    // Session lifecycle
    describe_counter!("vu_sftp_sessions_closed_total", "Sessions closed");
    describe_counter!(
        "vu_sftp_close_failures_total",
        "Session closes that reported an error"
    );
    describe_gauge!(
        "vu_sftp_active_sessions",
        "Sessions currently held in the registry"
    );

    // Transfers
    describe_counter!("vu_sftp_transfers_total", "Completed transfers by direction");
    describe_counter!(
        "vu_sftp_transfer_failures_total",
        "Failed transfers by direction and reason"
    );
    describe_counter!(
        "vu_sftp_transfer_bytes_total",
        "Bytes moved by completed transfers"
    );
    describe_histogram!(
        "vu_sftp_transfer_duration_seconds",
        "Whole-file transfer duration"
    );
}

// ============== Session Operations ==============

/// Record a successful connect
pub fn record_connect(duration: Duration) {
    counter!("vu_sftp_connects_total").increment(1);
    histogram!("vu_sftp_connect_duration_seconds").record(duration.as_secs_f64());
}

/// Record a failed connect
pub fn record_connect_failed(reason: &'static str) {
    counter!("vu_sftp_connect_failures_total", "reason" => reason).increment(1);
}

/// A handle entered the registry
pub fn record_session_opened() {
    gauge!("vu_sftp_active_sessions").increment(1.0);
}

/// A handle left the registry and was closed
pub fn record_session_closed() {
    counter!("vu_sftp_sessions_closed_total").increment(1);
    gauge!("vu_sftp_active_sessions").decrement(1.0);
}

pub fn record_close_failed() {
    counter!("vu_sftp_close_failures_total").increment(1);
}

// ============== Transfer Operations ==============

fn record_transfer_complete(direction: &'static str, duration: Duration, bytes: u64) {
    counter!("vu_sftp_transfers_total", "direction" => direction).increment(1);
    counter!("vu_sftp_transfer_bytes_total", "direction" => direction).increment(bytes);
    histogram!("vu_sftp_transfer_duration_seconds", "direction" => direction)
        .record(duration.as_secs_f64());
}

fn record_transfer_failed(direction: &'static str, reason: &'static str) {
    counter!(
        "vu_sftp_transfer_failures_total",
        "direction" => direction,
        "reason" => reason
    )
    .increment(1);
}

/// Times one transfer and records its outcome
pub struct TransferMetrics {
    direction: &'static str,
    start_time: Instant,
    bytes_transferred: u64,
}

impl TransferMetrics {
    pub fn start(direction: &'static str) -> Self {
        Self {
            direction,
            start_time: Instant::now(),
            bytes_transferred: 0,
        }
    }

    pub fn add_bytes(&mut self, bytes: u64) {
        self.bytes_transferred += bytes;
    }

    pub fn bytes(&self) -> u64 {
        self.bytes_transferred
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Mark transfer as complete, returning its duration
    pub fn complete(self) -> Duration {
        let duration = self.start_time.elapsed();
        record_transfer_complete(self.direction, duration, self.bytes_transferred);
        duration
    }

    pub fn fail(self, reason: &'static str) {
        record_transfer_failed(self.direction, reason);
    }
}
