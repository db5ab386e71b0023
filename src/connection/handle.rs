use crate::connection::types::{ConnectTarget, SessionInfo};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use uuid::Uuid;

/// A remote file open for writing.
pub trait RemoteWriter: Write + Send {
    /// Flush and close the file, surfacing any error the server reports at
    /// close. Dropping a writer without calling this closes it silently.
    fn finish(self: Box<Self>) -> io::Result<()>;
}

/// Remote filesystem operations over one authenticated SFTP channel.
pub trait RemoteFs: Send {
    /// Create or truncate `path` for writing.
    fn create(&mut self, path: &str) -> io::Result<Box<dyn RemoteWriter>>;

    /// Open `path` for reading.
    fn open(&mut self, path: &str) -> io::Result<Box<dyn Read + Send>>;

    /// Shut down the SFTP channel and the SSH session beneath it.
    fn close(&mut self) -> io::Result<()>;
}

/// One live, authenticated SFTP connection.
///
/// The remote side sits behind a mutex so a handle is only ever driven by a
/// single operation at a time. `close` takes the remote out of the mutex,
/// which makes it exactly-once: later operations see a closed handle.
pub struct SessionHandle {
    session_id: Uuid,
    target: ConnectTarget,
    user: String,
    auth_method: &'static str,
    connected_at: DateTime<Utc>,
    remote: Mutex<Option<Box<dyn RemoteFs>>>,
    closed: AtomicBool,
    bytes_uploaded: AtomicU64,
    bytes_downloaded: AtomicU64,
    transfers: AtomicU64,
}

impl SessionHandle {
    pub fn new(
        target: ConnectTarget,
        user: impl Into<String>,
        auth_method: &'static str,
        remote: Box<dyn RemoteFs>,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            target,
            user: user.into(),
            auth_method,
            connected_at: Utc::now(),
            remote: Mutex::new(Some(remote)),
            closed: AtomicBool::new(false),
            bytes_uploaded: AtomicU64::new(0),
            bytes_downloaded: AtomicU64::new(0),
            transfers: AtomicU64::new(0),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn target(&self) -> &ConnectTarget {
        &self.target
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Run `f` against the live remote. `None` if the handle is closed.
    pub fn with_remote<T>(&self, f: impl FnOnce(&mut dyn RemoteFs) -> T) -> Option<T> {
        let mut guard = self.remote.lock();
        guard.as_mut().map(|remote| f(remote.as_mut()))
    }

    pub(crate) fn record_upload(&self, bytes: u64) {
        self.bytes_uploaded.fetch_add(bytes, Ordering::Relaxed);
        self.transfers.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_download(&self, bytes: u64) {
        self.bytes_downloaded.fetch_add(bytes, Ordering::Relaxed);
        self.transfers.fetch_add(1, Ordering::Relaxed);
    }

    /// Close the session. Returns `Ok(false)` if it was already closed.
    ///
    /// Waits for an in-flight operation on this handle to finish first.
    pub fn close(&self) -> io::Result<bool> {
        let remote = self.remote.lock().take();
        self.closed.store(true, Ordering::Release);
        match remote {
            Some(mut remote) => {
                remote.close()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.session_id.to_string(),
            host: self.target.host().to_string(),
            port: self.target.port(),
            user: self.user.clone(),
            auth_method: self.auth_method.to_string(),
            connected_at: self.connected_at,
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
            transfers: self.transfers.load(Ordering::Relaxed),
            closed: self.is_closed(),
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("session_id", &self.session_id)
            .field("target", &self.target)
            .field("user", &self.user)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if let Some(mut remote) = self.remote.get_mut().take() {
            if let Err(e) = remote.close() {
                tracing::warn!(session = %self.session_id, "Close on drop failed: {}", e);
            }
        }
    }
}
