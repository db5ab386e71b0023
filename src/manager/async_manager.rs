//! Async adapter over [`SessionManager`].
//!
//! Every call runs on tokio's blocking pool, so an async runtime can drive
//! many VUs without parking its worker threads on libssh2 I/O.

use crate::connection::{ConnectTarget, ConnectionError, Credentials, SessionInfo, VuId};
use crate::manager::error::{BulkConnectError, SftpError, SftpResult};
use crate::manager::manager::SessionManager;
use crate::registry::TeardownReport;
use crate::transfer::TransferOutcome;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AsyncSessionManager {
    inner: Arc<SessionManager>,
}

impl AsyncSessionManager {
    pub fn new(manager: SessionManager) -> Self {
        Self {
            inner: Arc::new(manager),
        }
    }

    pub fn from_shared(manager: Arc<SessionManager>) -> Self {
        Self { inner: manager }
    }

    pub fn inner(&self) -> &Arc<SessionManager> {
        &self.inner
    }

    async fn blocking<T, F>(&self, f: F) -> SftpResult<T>
    where
        F: FnOnce(&SessionManager) -> SftpResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|e| SftpError::Task(e.to_string()))?
    }

    pub async fn connect(
        &self,
        vu: VuId,
        host: &str,
        port: &str,
        user: &str,
        credentials: &Credentials,
    ) -> SftpResult<SessionInfo> {
        let (host, port, user, credentials) = owned(host, port, user, credentials);
        self.blocking(move |m| m.connect(vu, &host, &port, &user, &credentials))
            .await
    }

    pub async fn connect_next(
        &self,
        host: &str,
        port: &str,
        user: &str,
        credentials: &Credentials,
    ) -> SftpResult<VuId> {
        let (host, port, user, credentials) = owned(host, port, user, credentials);
        self.blocking(move |m| m.connect_next(&host, &port, &user, &credentials))
            .await
    }

    /// Connect `count` VUs concurrently, at most `bulk_connect_parallelism`
    /// at a time.
    ///
    /// Unlike the blocking variant every VU is attempted; if any fail, all
    /// sessions from this batch are closed and every failure is reported.
    pub async fn connect_vus(
        &self,
        count: usize,
        host: &str,
        port: &str,
        user: &str,
        credentials: &Credentials,
    ) -> SftpResult<Vec<VuId>> {
        let target = Arc::new(ConnectTarget::parse(host, port)?);
        if count == 0 {
            return Ok(Vec::new());
        }

        let config = self.inner.config();
        let start = self.inner.reserve(count as u64)?;
        let deadline = Instant::now() + config.bulk_connect_timeout;
        let semaphore = Arc::new(Semaphore::new(config.bulk_connect_parallelism.max(1)));
        let user: Arc<str> = Arc::from(user);
        let credentials = Arc::new(credentials.clone());

        let mut tasks = JoinSet::new();
        for id in start..start + count as u64 {
            let vu = VuId(id);
            let inner = self.inner.clone();
            let semaphore = semaphore.clone();
            let target = target.clone();
            let user = user.clone();
            let credentials = credentials.clone();

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let result = tokio::task::spawn_blocking(move || {
                    let budget = inner.budget(deadline);
                    inner.connect_within(vu, &target, &user, &credentials, budget)
                })
                .await;
                (vu, result)
            });
        }

        let mut connected = Vec::with_capacity(count);
        let mut failures: Vec<(VuId, ConnectionError)> = Vec::new();
        let mut task_error = None;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((vu, Ok(Ok(_)))) => connected.push(vu),
                Ok((vu, Ok(Err(e)))) => failures.push((vu, e)),
                Ok((_, Err(e))) | Err(e) => task_error = Some(e.to_string()),
            }
        }

        connected.sort_unstable();
        if failures.is_empty() && task_error.is_none() {
            info!(count, first = %VuId(start), addr = %target, "Connected VUs");
            return Ok(connected);
        }

        failures.sort_by_key(|(vu, _)| *vu);
        warn!(
            failed = failures.len(),
            connected = connected.len(),
            "Bulk connect failed, rolling back"
        );
        let rolled_back = self
            .blocking(move |m| Ok(m.rollback(&connected)))
            .await?;

        match task_error {
            Some(e) if failures.is_empty() => Err(SftpError::Task(e)),
            _ => Err(BulkConnectError {
                failures,
                rolled_back,
                not_attempted: Vec::new(),
            }
            .into()),
        }
    }

    pub async fn upload(
        &self,
        vu: VuId,
        local_dir: impl Into<PathBuf>,
        filename: &str,
        remote_dir: &str,
    ) -> SftpResult<TransferOutcome> {
        let local_dir = local_dir.into();
        let filename = filename.to_string();
        let remote_dir = remote_dir.to_string();
        self.blocking(move |m| m.upload(vu, local_dir, &filename, &remote_dir))
            .await
    }

    pub async fn download(
        &self,
        vu: VuId,
        remote_dir: &str,
        filename: &str,
        local_dir: impl Into<PathBuf>,
    ) -> SftpResult<TransferOutcome> {
        let local_dir = local_dir.into();
        let filename = filename.to_string();
        let remote_dir = remote_dir.to_string();
        self.blocking(move |m| m.download(vu, &remote_dir, &filename, local_dir))
            .await
    }

    pub async fn disconnect(&self, vu: VuId) -> SftpResult<()> {
        self.blocking(move |m| Ok(m.disconnect(vu)?)).await
    }

    pub async fn disconnect_vus(&self) -> SftpResult<TeardownReport> {
        self.blocking(|m| Ok(m.disconnect_vus())).await
    }

    pub fn session_info(&self, vu: VuId) -> SftpResult<SessionInfo> {
        self.inner.session_info(vu)
    }

    pub fn is_connected(&self, vu: VuId) -> bool {
        self.inner.is_connected(vu)
    }

    pub fn session_count(&self) -> usize {
        self.inner.session_count()
    }

    pub fn connected_vus(&self) -> Vec<VuId> {
        self.inner.connected_vus()
    }
}

fn owned(
    host: &str,
    port: &str,
    user: &str,
    credentials: &Credentials,
) -> (String, String, String, Credentials) {
    (
        host.to_string(),
        port.to_string(),
        user.to_string(),
        credentials.clone(),
    )
}
