use crate::connection::{SessionInfo, VuId};
use crate::registry::error::CloseError;
use serde::Serialize;
use uuid::Uuid;

/// A session that `put` displaced, and how closing it went.
#[derive(Debug)]
pub struct Replaced {
    pub previous: SessionInfo,
    pub close_result: Result<(), CloseError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CloseFailure {
    pub vu: VuId,
    pub session_id: Uuid,
    pub error: String,
}

impl From<&CloseError> for CloseFailure {
    fn from(err: &CloseError) -> Self {
        Self {
            vu: err.vu,
            session_id: err.session_id,
            error: err.source.to_string(),
        }
    }
}

/// Outcome of tearing down every session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TeardownReport {
    pub closed: Vec<VuId>,
    pub failures: Vec<CloseFailure>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Sessions removed, whether or not their close succeeded.
    pub fn removed(&self) -> usize {
        self.closed.len() + self.failures.len()
    }
}
