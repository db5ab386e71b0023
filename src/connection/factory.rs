//! Connection factory.
//!
//! Validates everything that can be checked locally (target, user, key
//! material) before any network I/O, then hands the prepared credentials to a
//! [`Connector`] which owns the wire.

use crate::config::ConnectOptions;
use crate::connection::error::{ConnectionError, ConnectionResult};
use crate::connection::handle::{RemoteFs, SessionHandle};
use crate::connection::types::{AuthMethod, ConnectTarget, Credentials};
use crate::metrics;
use crate::transfer::paths;
use secrecy::ExposeSecret;
use ssh_key::{LineEnding, PrivateKey};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use zeroize::Zeroizing;

/// Establishes one authenticated SFTP channel.
pub trait Connector: Send + Sync {
    fn connect(
        &self,
        target: &ConnectTarget,
        user: &str,
        auth: &AuthMethod,
        options: &ConnectOptions,
    ) -> ConnectionResult<Box<dyn RemoteFs>>;
}

pub struct SessionFactory {
    connector: Arc<dyn Connector>,
    options: ConnectOptions,
    key_root: Option<PathBuf>,
}

impl SessionFactory {
    pub fn new(connector: Arc<dyn Connector>, options: ConnectOptions) -> Self {
        Self {
            connector,
            options,
            key_root: None,
        }
    }

    /// Restrict key files to paths inside `root`.
    pub fn with_key_root(mut self, root: Option<PathBuf>) -> Self {
        self.key_root = root;
        self
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    pub fn connect(
        &self,
        target: &ConnectTarget,
        user: &str,
        credentials: &Credentials,
    ) -> ConnectionResult<SessionHandle> {
        self.connect_with_timeout(target, user, credentials, self.options.connect_timeout)
    }

    /// Connect with an explicit budget instead of the configured timeout.
    pub fn connect_with_timeout(
        &self,
        target: &ConnectTarget,
        user: &str,
        credentials: &Credentials,
        timeout: Duration,
    ) -> ConnectionResult<SessionHandle> {
        let result = self.establish(target, user, credentials, timeout);
        if let Err(e) = &result {
            metrics::record_connect_failed(e.reason());
        }
        result
    }

    fn establish(
        &self,
        target: &ConnectTarget,
        user: &str,
        credentials: &Credentials,
        timeout: Duration,
    ) -> ConnectionResult<SessionHandle> {
        if user.trim().is_empty() {
            return Err(ConnectionError::Credentials("user name is empty".into()));
        }
        if timeout.is_zero() {
            return Err(ConnectionError::Timeout {
                host: target.host().to_string(),
                port: target.port(),
                timeout,
            });
        }

        let auth = prepare_auth(credentials, self.key_root.as_deref())?;

        let options = ConnectOptions {
            connect_timeout: timeout,
            ..self.options.clone()
        };

        let started = Instant::now();
        let remote = self.connector.connect(target, user, &auth, &options)?;
        metrics::record_connect(started.elapsed());

        Ok(SessionHandle::new(target.clone(), user, auth.name(), remote))
    }
}

/// Turn credentials into something a connector can use without further
/// filesystem access. Encrypted OpenSSH keys are decrypted here.
pub fn prepare_auth(
    credentials: &Credentials,
    key_root: Option<&Path>,
) -> ConnectionResult<AuthMethod> {
    match credentials {
        Credentials::Password(password) => {
            if password.expose_secret().is_empty() {
                return Err(ConnectionError::Credentials("password is empty".into()));
            }
            Ok(AuthMethod::Password(password.clone()))
        }
        Credentials::Key { path, passphrase } => {
            if let Some(root) = key_root {
                if !paths::is_within(path, root) {
                    return Err(ConnectionError::Credentials(format!(
                        "key file {} is outside {}",
                        path.display(),
                        root.display()
                    )));
                }
            }

            let pem = Zeroizing::new(std::fs::read_to_string(path).map_err(|e| {
                ConnectionError::Credentials(format!(
                    "failed to read key file {}: {}",
                    path.display(),
                    e
                ))
            })?);

            let key = match PrivateKey::from_openssh(pem.as_str()) {
                Ok(key) => key,
                Err(_) => {
                    return Ok(AuthMethod::KeyFile {
                        path: path.clone(),
                        passphrase: passphrase.clone(),
                    })
                }
            };

            let key = if key.is_encrypted() {
                let passphrase = passphrase.as_ref().ok_or_else(|| {
                    ConnectionError::Credentials(format!(
                        "key file {} is encrypted but no passphrase was supplied",
                        path.display()
                    ))
                })?;
                key.decrypt(passphrase.expose_secret().as_bytes())
                    .map_err(|e| {
                        ConnectionError::Credentials(format!(
                            "failed to decrypt key file {}: {}",
                            path.display(),
                            e
                        ))
                    })?
            } else {
                key
            };

            let decrypted = key.to_openssh(LineEnding::LF).map_err(|e| {
                ConnectionError::Credentials(format!(
                    "failed to encode key from {}: {}",
                    path.display(),
                    e
                ))
            })?;

            Ok(AuthMethod::KeyData(decrypted))
        }
    }
}
