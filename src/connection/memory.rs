//! In-process SFTP server used for dry runs and tests.
//!
//! Mirrors the server behaviour the manager depends on: password checks,
//! unreachable hosts that time out, missing or read-only directories, and
//! close failures.

use crate::config::ConnectOptions;
use crate::connection::error::{ConnectionError, ConnectionResult};
use crate::connection::factory::Connector;
use crate::connection::handle::{RemoteFs, RemoteWriter};
use crate::connection::types::{AuthMethod, ConnectTarget};
use parking_lot::Mutex;
use secrecy::ExposeSecret;
use std::collections::{HashMap, HashSet};
use std::io::{self, Cursor, Read, Write};
use std::sync::Arc;

#[derive(Default)]
struct ServerState {
    files: HashMap<String, Vec<u8>>,
    directories: HashSet<String>,
    readonly: HashSet<String>,
    users: HashMap<String, String>,
    unreachable: HashSet<String>,
    fail_close: bool,
    fail_file_close: bool,
    opened: u64,
    closed: u64,
}

#[derive(Clone)]
pub struct MemoryServer {
    state: Arc<Mutex<ServerState>>,
}

impl Default for MemoryServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryServer {
    pub fn new() -> Self {
        let mut state = ServerState::default();
        state.directories.insert("/".to_string());
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn with_directory(self, dir: &str) -> Self {
        self.state.lock().directories.insert(normalize(dir));
        self
    }

    /// A directory that exists but rejects writes.
    pub fn with_readonly_directory(self, dir: &str) -> Self {
        let dir = normalize(dir);
        {
            let mut state = self.state.lock();
            state.directories.insert(dir.clone());
            state.readonly.insert(dir);
        }
        self
    }

    /// Accept `user` with `password`. Key auth accepts any known user.
    pub fn with_user(self, user: &str, password: &str) -> Self {
        self.state
            .lock()
            .users
            .insert(user.to_string(), password.to_string());
        self
    }

    /// Connections to `host` hang until the connect timeout expires.
    pub fn with_unreachable_host(self, host: &str) -> Self {
        self.state.lock().unreachable.insert(host.to_string());
        self
    }

    pub fn set_fail_close(&self, fail: bool) {
        self.state.lock().fail_close = fail;
    }

    /// Make the server reject SFTP CLOSE on written files.
    pub fn set_fail_file_close(&self, fail: bool) {
        self.state.lock().fail_file_close = fail;
    }

    pub fn put_file(&self, path: &str, contents: impl Into<Vec<u8>>) {
        self.state.lock().files.insert(normalize(path), contents.into());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().files.get(&normalize(path)).cloned()
    }

    pub fn opened_sessions(&self) -> u64 {
        self.state.lock().opened
    }

    pub fn closed_sessions(&self) -> u64 {
        self.state.lock().closed
    }

    pub fn live_sessions(&self) -> u64 {
        let state = self.state.lock();
        state.opened - state.closed
    }

    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            server: self.clone(),
        }
    }
}

#[derive(Clone)]
pub struct MemoryConnector {
    server: MemoryServer,
}

impl Connector for MemoryConnector {
    fn connect(
        &self,
        target: &ConnectTarget,
        user: &str,
        auth: &AuthMethod,
        options: &ConnectOptions,
    ) -> ConnectionResult<Box<dyn RemoteFs>> {
        let unreachable = self.server.state.lock().unreachable.contains(target.host());
        if unreachable {
            std::thread::sleep(options.connect_timeout);
            return Err(ConnectionError::Timeout {
                host: target.host().to_string(),
                port: target.port(),
                timeout: options.connect_timeout,
            });
        }

        let mut state = self.server.state.lock();
        let accepted = match (state.users.get(user), auth) {
            (Some(expected), AuthMethod::Password(given)) => expected == given.expose_secret(),
            (Some(_), _) => true,
            (None, _) => false,
        };
        if !accepted {
            return Err(ConnectionError::Authentication {
                host: target.host().to_string(),
                port: target.port(),
                user: user.to_string(),
                reason: "access denied".into(),
            });
        }

        state.opened += 1;
        Ok(Box::new(MemoryRemote {
            server: self.server.clone(),
        }))
    }
}

struct MemoryRemote {
    server: MemoryServer,
}

impl RemoteFs for MemoryRemote {
    fn create(&mut self, path: &str) -> io::Result<Box<dyn RemoteWriter>> {
        let path = normalize(path);
        let parent = parent_of(&path);

        let mut state = self.server.state.lock();
        if !state.directories.contains(&parent) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such directory: {}", parent),
            ));
        }
        if state.readonly.contains(&parent) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("permission denied: {}", path),
            ));
        }
        state.files.insert(path.clone(), Vec::new());

        Ok(Box::new(MemoryWriter {
            server: self.server.clone(),
            path,
            buffer: Vec::new(),
        }))
    }

    fn open(&mut self, path: &str) -> io::Result<Box<dyn Read + Send>> {
        let path = normalize(path);
        let state = self.server.state.lock();
        let contents = state.files.get(&path).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no such file: {}", path))
        })?;
        Ok(Box::new(Cursor::new(contents)))
    }

    fn close(&mut self) -> io::Result<()> {
        let mut state = self.server.state.lock();
        state.closed += 1;
        if state.fail_close {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "connection reset during disconnect",
            ));
        }
        Ok(())
    }
}

/// Buffers writes and publishes them on flush and drop.
struct MemoryWriter {
    server: MemoryServer,
    path: String,
    buffer: Vec<u8>,
}

impl MemoryWriter {
    fn commit(&self) {
        self.server
            .state
            .lock()
            .files
            .insert(self.path.clone(), self.buffer.clone());
    }
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.commit();
        Ok(())
    }
}

impl RemoteWriter for MemoryWriter {
    fn finish(self: Box<Self>) -> io::Result<()> {
        self.commit();
        if self.server.state.lock().fail_file_close {
            return Err(io::Error::other(format!("close failed: {}", self.path)));
        }
        Ok(())
    }
}

impl Drop for MemoryWriter {
    fn drop(&mut self) {
        self.commit();
    }
}

fn normalize(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty() && *p != ".").collect();
    format!("/{}", parts.join("/"))
}

fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}
