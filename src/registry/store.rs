use crate::connection::{SessionHandle, SessionInfo, VuId};
use crate::metrics;
use crate::registry::error::{CloseError, RegistryError, RegistryResult};
use crate::registry::types::{CloseFailure, Replaced, TeardownReport};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Maps each VU to its live session.
///
/// Entries are detached from the map before their handle is closed, so a slow
/// disconnect never holds a shard lock.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<VuId, Arc<SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `handle` for `vu`, closing whatever it replaces.
    ///
    /// The new handle is inserted first and the old one is closed afterwards,
    /// outside the shard lock, so `get(vu)` never observes a gap.
    pub fn put(&self, vu: VuId, handle: SessionHandle) -> Option<Replaced> {
        let previous = self.sessions.insert(vu, Arc::new(handle));
        metrics::record_session_opened();

        previous.map(|old| {
            let close_result = close_detached(vu, &old);
            Replaced {
                previous: old.info(),
                close_result,
            }
        })
    }

    pub fn get(&self, vu: VuId) -> RegistryResult<Arc<SessionHandle>> {
        self.sessions
            .get(&vu)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(RegistryError::SessionNotFound(vu))
    }

    /// Close and forget the session for `vu`. `Ok(false)` if there was none.
    pub fn remove(&self, vu: VuId) -> Result<bool, CloseError> {
        match self.sessions.remove(&vu) {
            Some((_, handle)) => close_detached(vu, &handle).map(|()| true),
            None => Ok(false),
        }
    }

    /// Close every session. Close failures are collected, never fatal.
    pub fn remove_all(&self) -> TeardownReport {
        let mut report = TeardownReport::default();

        for vu in self.ids() {
            let Some((_, handle)) = self.sessions.remove(&vu) else {
                continue;
            };
            match close_detached(vu, &handle) {
                Ok(()) => report.closed.push(vu),
                Err(e) => report.failures.push(CloseFailure::from(&e)),
            }
        }

        info!(
            closed = report.closed.len(),
            failed = report.failures.len(),
            "Tore down VU sessions"
        );
        report
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, vu: VuId) -> bool {
        self.sessions.contains_key(&vu)
    }

    /// Registered identifiers in ascending order.
    pub fn ids(&self) -> Vec<VuId> {
        let mut ids: Vec<VuId> = self.sessions.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn info(&self, vu: VuId) -> RegistryResult<SessionInfo> {
        self.get(vu).map(|handle| handle.info())
    }
}

fn close_detached(vu: VuId, handle: &SessionHandle) -> Result<(), CloseError> {
    metrics::record_session_closed();
    match handle.close() {
        Ok(_) => {
            info!(%vu, session = %handle.session_id(), "Session closed");
            Ok(())
        }
        Err(source) => {
            metrics::record_close_failed();
            warn!(%vu, session = %handle.session_id(), "Session close failed: {}", source);
            Err(CloseError {
                vu,
                session_id: handle.session_id(),
                source,
            })
        }
    }
}
