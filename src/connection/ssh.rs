//! libssh2-backed connector.
//!
//! Every blocking step of session setup (TCP dial, handshake, authentication,
//! SFTP subsystem start) runs against one shared deadline derived from
//! `ConnectOptions::connect_timeout`.

use crate::config::{ConnectOptions, HostKeyPolicy};
use crate::connection::error::{ConnectionError, ConnectionResult};
use crate::connection::factory::Connector;
use crate::connection::handle::{RemoteFs, RemoteWriter};
use crate::connection::types::{AuthMethod, ConnectTarget};
use secrecy::ExposeSecret;
use ssh2::{
    CheckResult, ErrorCode, File, KnownHostFileKind, OpenFlags, OpenType, Session, Sftp,
};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::debug;

/// libssh2's `LIBSSH2_ERROR_TIMEOUT`.
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;

#[derive(Debug, Default, Clone, Copy)]
pub struct SshConnector;

impl SshConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for SshConnector {
    fn connect(
        &self,
        target: &ConnectTarget,
        user: &str,
        auth: &AuthMethod,
        options: &ConnectOptions,
    ) -> ConnectionResult<Box<dyn RemoteFs>> {
        let attempt = Attempt {
            target,
            timeout: options.connect_timeout,
            deadline: Instant::now() + options.connect_timeout,
        };

        let tcp = attempt.dial()?;

        let mut session = Session::new().map_err(|e| attempt.handshake_error(e))?;
        session.set_compress(options.compress);
        session.set_timeout(attempt.remaining_ms()?);
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|e| attempt.handshake_error(e))?;
        debug!(addr = %target, "SSH handshake complete");

        verify_host_key(&session, target, &options.host_key)?;

        session.set_timeout(attempt.remaining_ms()?);
        authenticate(&session, &attempt, user, auth)?;
        debug!(addr = %target, user, method = auth.name(), "Authenticated");

        session.set_timeout(attempt.remaining_ms()?);
        let sftp = session.sftp().map_err(|e| {
            if attempt.is_timeout(&e) {
                attempt.timeout_error()
            } else {
                ConnectionError::Subsystem {
                    host: target.host().to_string(),
                    port: target.port(),
                    reason: e.to_string(),
                }
            }
        })?;

        session.set_timeout(options.io_timeout.map(duration_ms).unwrap_or(0));
        if options.keepalive_interval_secs > 0 {
            session.set_keepalive(false, options.keepalive_interval_secs);
        }

        Ok(Box::new(SshRemote {
            session,
            sftp: Some(sftp),
        }))
    }
}

struct Attempt<'a> {
    target: &'a ConnectTarget,
    timeout: Duration,
    deadline: Instant,
}

impl Attempt<'_> {
    fn timeout_error(&self) -> ConnectionError {
        ConnectionError::Timeout {
            host: self.target.host().to_string(),
            port: self.target.port(),
            timeout: self.timeout,
        }
    }

    fn remaining(&self) -> ConnectionResult<Duration> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(self.timeout_error());
        }
        Ok(remaining)
    }

    /// libssh2 treats 0 as "no timeout", so never hand it a zero.
    fn remaining_ms(&self) -> ConnectionResult<u32> {
        Ok(duration_ms(self.remaining()?).max(1))
    }

    fn is_timeout(&self, e: &ssh2::Error) -> bool {
        matches!(e.code(), ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT))
            || Instant::now() >= self.deadline
    }

    fn handshake_error(&self, e: ssh2::Error) -> ConnectionError {
        if self.is_timeout(&e) {
            return self.timeout_error();
        }
        ConnectionError::Handshake {
            host: self.target.host().to_string(),
            port: self.target.port(),
            reason: e.to_string(),
        }
    }

    fn dial(&self) -> ConnectionResult<TcpStream> {
        let host = self.target.host();
        let port = self.target.port();

        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|source| ConnectionError::Resolve {
                host: host.to_string(),
                port,
                source,
            })?
            .collect();

        if addrs.is_empty() {
            return Err(ConnectionError::Resolve {
                host: host.to_string(),
                port,
                source: io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
            });
        }

        let mut last_error = None;
        for addr in addrs {
            let remaining = self.remaining()?;
            match TcpStream::connect_timeout(&addr, remaining) {
                Ok(stream) => {
                    // Best effort; a failure here only costs latency.
                    let _ = stream.set_nodelay(true);
                    return Ok(stream);
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut => return Err(self.timeout_error()),
                Err(e) => {
                    debug!(%addr, "TCP connect failed: {}", e);
                    last_error = Some(e);
                }
            }
        }

        Err(ConnectionError::Connect {
            host: host.to_string(),
            port,
            source: last_error
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "no address connected")),
        })
    }
}

fn duration_ms(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}

fn verify_host_key(
    session: &Session,
    target: &ConnectTarget,
    policy: &HostKeyPolicy,
) -> ConnectionResult<()> {
    let path = match policy {
        HostKeyPolicy::AcceptAny => return Ok(()),
        HostKeyPolicy::KnownHosts(path) => path,
    };

    let host_key_error = |reason: String| ConnectionError::HostKey {
        host: target.host().to_string(),
        port: target.port(),
        reason,
    };

    let (key, _) = session
        .host_key()
        .ok_or_else(|| host_key_error("server presented no host key".into()))?;

    let mut known_hosts = session
        .known_hosts()
        .map_err(|e| host_key_error(e.to_string()))?;
    known_hosts
        .read_file(path, KnownHostFileKind::OpenSSH)
        .map_err(|e| host_key_error(format!("cannot read {}: {}", path.display(), e)))?;

    match known_hosts.check_port(target.host(), target.port(), key) {
        CheckResult::Match => Ok(()),
        CheckResult::Mismatch => Err(host_key_error(format!(
            "host key does not match the entry in {}",
            path.display()
        ))),
        CheckResult::NotFound => Err(host_key_error(format!(
            "no entry for this host in {}",
            path.display()
        ))),
        CheckResult::Failure => Err(host_key_error("known_hosts lookup failed".into())),
    }
}

struct PasswordPrompt<'p> {
    password: &'p str,
}

impl ssh2::KeyboardInteractivePrompt for PasswordPrompt<'_> {
    fn prompt(
        &mut self,
        _username: &str,
        _instructions: &str,
        prompts: &[ssh2::Prompt],
    ) -> Vec<String> {
        prompts.iter().map(|_| self.password.to_string()).collect()
    }
}

fn authenticate(
    session: &Session,
    attempt: &Attempt<'_>,
    user: &str,
    auth: &AuthMethod,
) -> ConnectionResult<()> {
    let result = match auth {
        AuthMethod::Password(password) => {
            let password = password.expose_secret().as_str();
            match session.userauth_password(user, password) {
                Ok(()) => Ok(()),
                Err(e) if attempt.is_timeout(&e) => Err(e),
                Err(e) => {
                    debug!(user, "Password auth rejected, trying keyboard-interactive: {}", e);
                    let mut prompt = PasswordPrompt { password };
                    session.userauth_keyboard_interactive(user, &mut prompt)
                }
            }
        }
        AuthMethod::KeyData(private_key) => pubkey_memory(session, user, private_key),
        AuthMethod::KeyFile { path, passphrase } => session.userauth_pubkey_file(
            user,
            None,
            path,
            passphrase.as_ref().map(|p| p.expose_secret().as_str()),
        ),
    };

    let auth_error = |reason: String| ConnectionError::Authentication {
        host: attempt.target.host().to_string(),
        port: attempt.target.port(),
        user: user.to_string(),
        reason,
    };

    match result {
        Err(e) if attempt.is_timeout(&e) => Err(attempt.timeout_error()),
        Err(e) => Err(auth_error(e.to_string())),
        Ok(()) if !session.authenticated() => {
            Err(auth_error(format!("server did not accept {}", auth.name())))
        }
        Ok(()) => Ok(()),
    }
}

#[cfg(unix)]
fn pubkey_memory(session: &Session, user: &str, private_key: &str) -> Result<(), ssh2::Error> {
    session.userauth_pubkey_memory(user, None, private_key, None)
}

#[cfg(not(unix))]
fn pubkey_memory(_session: &Session, _user: &str, _private_key: &str) -> Result<(), ssh2::Error> {
    Err(ssh2::Error::new(
        ErrorCode::Session(-19),
        "in-memory private keys are not supported on this platform",
    ))
}

/// An authenticated SFTP channel plus the session that carries it.
struct SshRemote {
    session: Session,
    sftp: Option<Sftp>,
}

impl SshRemote {
    fn sftp(&self) -> io::Result<&Sftp> {
        self.sftp
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "SFTP channel closed"))
    }
}

impl RemoteWriter for File {
    fn finish(mut self: Box<Self>) -> io::Result<()> {
        self.flush()?;
        self.close().map_err(io::Error::from)
    }
}

impl RemoteFs for SshRemote {
    fn create(&mut self, path: &str) -> io::Result<Box<dyn RemoteWriter>> {
        let file = self.sftp()?.open_mode(
            Path::new(path),
            OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
            0o644,
            OpenType::File,
        )?;
        Ok(Box::new(file))
    }

    fn open(&mut self, path: &str) -> io::Result<Box<dyn Read + Send>> {
        let file = self.sftp()?.open(Path::new(path))?;
        Ok(Box::new(file))
    }

    fn close(&mut self) -> io::Result<()> {
        drop(self.sftp.take());
        self.session
            .disconnect(None, "VU session closed", None)
            .map_err(io::Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn options(timeout: Duration) -> ConnectOptions {
        ConnectOptions::default()
            .with_connect_timeout(timeout)
            .with_host_key(HostKeyPolicy::AcceptAny)
    }

    fn password() -> AuthMethod {
        AuthMethod::Password(secrecy::SecretString::new("secret".into()))
    }

    #[test]
    fn test_silent_server_times_out() {
        // Accepts TCP but never speaks SSH.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let target = ConnectTarget::new("127.0.0.1", port).unwrap();

        let started = Instant::now();
        let result = SshConnector::new().connect(
            &target,
            "tester",
            &password(),
            &options(Duration::from_millis(500)),
        );

        let err = result.err().expect("connect should fail");
        assert!(err.is_timeout(), "unexpected error: {}", err);
        assert!(started.elapsed() < Duration::from_secs(5));
        drop(listener);
    }

    #[test]
    fn test_refused_port_is_connect_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let target = ConnectTarget::new("127.0.0.1", port).unwrap();

        let result = SshConnector::new().connect(
            &target,
            "tester",
            &password(),
            &options(Duration::from_secs(2)),
        );

        match result {
            Err(ConnectionError::Connect { port: p, .. }) => assert_eq!(p, port),
            Err(other) => panic!("Expected connect error, got {}", other),
            Ok(_) => panic!("Expected connect error"),
        }
    }

    #[test]
    fn test_duration_ms_saturates() {
        assert_eq!(duration_ms(Duration::from_millis(1500)), 1500);
        assert_eq!(duration_ms(Duration::from_secs(u64::MAX)), u32::MAX);
    }
}
