use crate::config::ManagerConfig;
use crate::connection::{
    ConnectTarget, ConnectionResult, Connector, Credentials, SessionFactory, SessionInfo,
    SshConnector, VuId,
};
use crate::manager::error::{BulkConnectError, SftpError, SftpResult};
use crate::metrics;
use crate::registry::{CloseError, SessionRegistry, TeardownReport};
use crate::transfer::{TransferEngine, TransferOutcome};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Owns every VU's session for one test run.
///
/// All operations take `&self`; share it between VU threads behind an `Arc`.
pub struct SessionManager {
    config: ManagerConfig,
    factory: SessionFactory,
    registry: Arc<SessionRegistry>,
    engine: TransferEngine,
    next_vu: AtomicU64,
}

impl SessionManager {
    /// Manager that dials real SSH servers.
    pub fn new(config: ManagerConfig) -> Self {
        Self::with_connector(config, Arc::new(SshConnector::new()))
    }

    pub fn with_connector(config: ManagerConfig, connector: Arc<dyn Connector>) -> Self {
        metrics::init_metrics();

        if config.connect.host_key.is_insecure() {
            warn!("Host key verification is disabled; any server key will be accepted");
        }

        let factory = SessionFactory::new(connector, config.connect.clone())
            .with_key_root(config.transfer.local_root.clone());
        let registry = Arc::new(SessionRegistry::new());
        let engine = TransferEngine::new(registry.clone(), config.transfer.clone());

        Self {
            next_vu: AtomicU64::new(config.first_vu_id),
            config,
            factory,
            registry,
            engine,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Connect `vu`, replacing (and closing) any session it already had.
    pub fn connect(
        &self,
        vu: VuId,
        host: &str,
        port: &str,
        user: &str,
        credentials: &Credentials,
    ) -> SftpResult<SessionInfo> {
        let target = ConnectTarget::parse(host, port)?;
        self.next_vu
            .fetch_max(vu.get().saturating_add(1), Ordering::SeqCst);
        let info = self.connect_within(
            vu,
            &target,
            user,
            credentials,
            self.config.connect.connect_timeout,
        )?;
        Ok(info)
    }

    /// Connect under the next unused identifier and return it.
    pub fn connect_next(
        &self,
        host: &str,
        port: &str,
        user: &str,
        credentials: &Credentials,
    ) -> SftpResult<VuId> {
        let target = ConnectTarget::parse(host, port)?;
        let vu = VuId(self.reserve(1)?);
        self.connect_within(
            vu,
            &target,
            user,
            credentials,
            self.config.connect.connect_timeout,
        )?;
        Ok(vu)
    }

    /// Connect `count` VUs with consecutive identifiers.
    ///
    /// Stops at the first failure and closes every session this call opened.
    /// The batch as a whole is bounded by `bulk_connect_timeout`.
    pub fn connect_vus(
        &self,
        count: usize,
        host: &str,
        port: &str,
        user: &str,
        credentials: &Credentials,
    ) -> SftpResult<Vec<VuId>> {
        let target = ConnectTarget::parse(host, port)?;
        if count == 0 {
            return Ok(Vec::new());
        }

        let start = self.reserve(count as u64)?;
        let ids: Vec<VuId> = (start..start + count as u64).map(VuId).collect();
        let deadline = Instant::now() + self.config.bulk_connect_timeout;
        let mut connected = Vec::with_capacity(count);

        for (idx, &vu) in ids.iter().enumerate() {
            let budget = self.budget(deadline);
            if let Err(e) = self.connect_within(vu, &target, user, credentials, budget) {
                warn!(%vu, "Bulk connect stopped: {}", e);
                let rolled_back = self.rollback(&connected);
                return Err(BulkConnectError {
                    failures: vec![(vu, e)],
                    rolled_back,
                    not_attempted: ids[idx + 1..].to_vec(),
                }
                .into());
            }
            connected.push(vu);
        }

        info!(count, first = %ids[0], addr = %target, "Connected VUs");
        Ok(connected)
    }

    pub fn upload(
        &self,
        vu: VuId,
        local_dir: impl Into<PathBuf>,
        filename: &str,
        remote_dir: &str,
    ) -> SftpResult<TransferOutcome> {
        Ok(self.engine.upload(vu, local_dir, filename, remote_dir)?)
    }

    pub fn download(
        &self,
        vu: VuId,
        remote_dir: &str,
        filename: &str,
        local_dir: impl Into<PathBuf>,
    ) -> SftpResult<TransferOutcome> {
        Ok(self.engine.download(vu, remote_dir, filename, local_dir)?)
    }

    /// Close and forget `vu`'s session. Unknown VUs are a no-op.
    pub fn disconnect(&self, vu: VuId) -> Result<(), CloseError> {
        if self.registry.remove(vu)? {
            info!(%vu, "VU disconnected");
        }
        Ok(())
    }

    /// Close every session, collecting close failures.
    pub fn disconnect_vus(&self) -> TeardownReport {
        self.registry.remove_all()
    }

    pub fn session_info(&self, vu: VuId) -> SftpResult<SessionInfo> {
        Ok(self.registry.info(vu)?)
    }

    pub fn is_connected(&self, vu: VuId) -> bool {
        self.registry
            .get(vu)
            .map(|handle| !handle.is_closed())
            .unwrap_or(false)
    }

    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    pub fn connected_vus(&self) -> Vec<VuId> {
        self.registry.ids()
    }

    /// Claim `count` consecutive identifiers, returning the first.
    ///
    /// Fails without claiming anything if the range would run past `u64::MAX`.
    pub(crate) fn reserve(&self, count: u64) -> SftpResult<u64> {
        self.next_vu
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |next| {
                next.checked_add(count)
            })
            .map_err(|_| SftpError::VuIdsExhausted { requested: count })
    }

    pub(crate) fn budget(&self, deadline: Instant) -> Duration {
        let remaining = deadline.saturating_duration_since(Instant::now());
        remaining.min(self.config.connect.connect_timeout)
    }

    pub(crate) fn connect_within(
        &self,
        vu: VuId,
        target: &ConnectTarget,
        user: &str,
        credentials: &Credentials,
        timeout: Duration,
    ) -> ConnectionResult<SessionInfo> {
        let handle = self
            .factory
            .connect_with_timeout(target, user, credentials, timeout)?;
        let info = handle.info();

        if let Some(replaced) = self.registry.put(vu, handle) {
            match replaced.close_result {
                Ok(()) => info!(
                    %vu,
                    previous = %replaced.previous.session_id,
                    "Replaced existing session"
                ),
                Err(e) => warn!(%vu, "Replaced session did not close cleanly: {}", e),
            }
        }

        info!(
            %vu,
            addr = %target,
            session = %info.session_id,
            auth = %info.auth_method,
            "VU connected"
        );
        Ok(info)
    }

    /// Close sessions opened by a failed batch.
    pub(crate) fn rollback(&self, vus: &[VuId]) -> Vec<VuId> {
        for &vu in vus {
            if let Err(e) = self.registry.remove(vu) {
                warn!(%vu, "Rollback close failed: {}", e);
            }
        }
        vus.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectOptions, HostKeyPolicy};
    use crate::connection::{ConnectionError, MemoryServer};

    fn manager(server: &MemoryServer) -> SessionManager {
        let config = ManagerConfig::default().with_connect(
            ConnectOptions::default()
                .with_connect_timeout(Duration::from_millis(200))
                .with_host_key(HostKeyPolicy::AcceptAny),
        );
        SessionManager::with_connector(config, Arc::new(server.connector()))
    }

    fn creds() -> Credentials {
        Credentials::password("pw")
    }

    #[test]
    fn test_connect_next_numbers_from_one() {
        let server = MemoryServer::new().with_user("vu", "pw");
        let manager = manager(&server);

        let a = manager.connect_next("sftp", "22", "vu", &creds()).unwrap();
        let b = manager.connect_next("sftp", "22", "vu", &creds()).unwrap();
        assert_eq!((a, b), (VuId(1), VuId(2)));
    }

    #[test]
    fn test_explicit_connect_advances_counter() {
        let server = MemoryServer::new().with_user("vu", "pw");
        let manager = manager(&server);

        manager.connect(VuId(10), "sftp", "22", "vu", &creds()).unwrap();
        let next = manager.connect_next("sftp", "22", "vu", &creds()).unwrap();
        assert_eq!(next, VuId(11));
    }

    #[test]
    fn test_invalid_port_rejected_before_dialing() {
        let server = MemoryServer::new().with_user("vu", "pw");
        let manager = manager(&server);

        let err = manager
            .connect(VuId(1), "sftp", "twenty-two", "vu", &creds())
            .unwrap_err();
        assert!(matches!(
            err,
            SftpError::Connection(ConnectionError::InvalidTarget(_))
        ));
        assert_eq!(server.opened_sessions(), 0);
        assert_eq!(manager.session_count(), 0);
    }

    #[test]
    fn test_connect_vus_contiguous() {
        let server = MemoryServer::new().with_user("vu", "pw");
        let manager = manager(&server);

        let ids = manager.connect_vus(3, "sftp", "22", "vu", &creds()).unwrap();
        assert_eq!(ids, vec![VuId(1), VuId(2), VuId(3)]);
        assert_eq!(manager.connected_vus(), ids);
        assert!(manager.is_connected(VuId(2)));
    }

    #[test]
    fn test_connect_vus_exhausted_budget() {
        let server = MemoryServer::new()
            .with_user("vu", "pw")
            .with_unreachable_host("blackhole");
        let manager = SessionManager::with_connector(
            ManagerConfig::default()
                .with_connect(
                    ConnectOptions::default().with_connect_timeout(Duration::from_millis(100)),
                )
                .with_bulk_connect_timeout(Duration::from_millis(150)),
            Arc::new(server.connector()),
        );

        let started = Instant::now();
        let err = manager
            .connect_vus(5, "blackhole", "22", "vu", &creds())
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(2));

        match err {
            SftpError::BulkConnect(bulk) => {
                assert_eq!(bulk.failed_vus(), vec![VuId(1)]);
                assert!(bulk.rolled_back.is_empty());
                assert_eq!(bulk.not_attempted.len(), 4);
            }
            other => panic!("Expected bulk connect error, got {}", other),
        }
        assert_eq!(manager.session_count(), 0);
    }

    #[test]
    fn test_exhausted_identifiers_rejected() {
        let server = MemoryServer::new().with_user("vu", "pw");
        let manager = manager(&server);
        manager
            .connect(VuId(u64::MAX), "sftp", "22", "vu", &creds())
            .unwrap();

        let err = manager
            .connect_vus(2, "sftp", "22", "vu", &creds())
            .unwrap_err();
        assert!(matches!(err, SftpError::VuIdsExhausted { requested: 2 }));

        let err = manager
            .connect_next("sftp", "22", "vu", &creds())
            .unwrap_err();
        assert!(matches!(err, SftpError::VuIdsExhausted { requested: 1 }));

        assert_eq!(manager.connected_vus(), vec![VuId(u64::MAX)]);
        assert_eq!(server.opened_sessions(), 1);
    }

    #[test]
    fn test_disconnect_unknown_is_noop() {
        let server = MemoryServer::new();
        let manager = manager(&server);
        assert!(manager.disconnect(VuId(42)).is_ok());
        assert!(manager.disconnect_vus().is_clean());
    }

    #[test]
    fn test_session_info_not_found() {
        let server = MemoryServer::new();
        let manager = manager(&server);
        assert!(manager
            .session_info(VuId(1))
            .unwrap_err()
            .is_session_not_found());
        assert!(!manager.is_connected(VuId(1)));
    }
}
