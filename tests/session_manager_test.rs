use rand::RngCore;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use vu_sftp::config::{ConnectOptions, HostKeyPolicy};
use vu_sftp::connection::{
    AuthMethod, ConnectTarget, ConnectionError, ConnectionResult, Connector, MemoryConnector,
    MemoryServer, RemoteFs,
};
use vu_sftp::{Credentials, ManagerConfig, SessionManager, SftpError, TransferError, VuId};

const USER: &str = "loadtest";
const PASSWORD: &str = "correct-horse";

fn server() -> MemoryServer {
    MemoryServer::new()
        .with_user(USER, PASSWORD)
        .with_directory("/upload")
        .with_unreachable_host("10.255.255.1")
}

fn manager(server: &MemoryServer) -> SessionManager {
    let config = ManagerConfig::default().with_connect(
        ConnectOptions::default()
            .with_connect_timeout(Duration::from_millis(300))
            .with_host_key(HostKeyPolicy::AcceptAny),
    );
    SessionManager::with_connector(config, Arc::new(server.connector()))
}

/// Delegates to an in-memory server but rejects the dials listed in `reject`
/// (zero-based, in call order).
struct RejectingDials {
    inner: MemoryConnector,
    reject: HashSet<usize>,
    calls: AtomicUsize,
}

impl RejectingDials {
    fn new(server: &MemoryServer, reject: &[usize]) -> Self {
        Self {
            inner: server.connector(),
            reject: reject.iter().copied().collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

impl Connector for RejectingDials {
    fn connect(
        &self,
        target: &ConnectTarget,
        user: &str,
        auth: &AuthMethod,
        options: &ConnectOptions,
    ) -> ConnectionResult<Box<dyn RemoteFs>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.reject.contains(&call) {
            return Err(ConnectionError::Authentication {
                host: target.host().to_string(),
                port: target.port(),
                user: user.to_string(),
                reason: "too many sessions".into(),
            });
        }
        self.inner.connect(target, user, auth, options)
    }
}

fn creds() -> Credentials {
    Credentials::password(PASSWORD)
}

fn random_payload(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut data);
    data
}

/// Bulk connect then bulk disconnect leaves nothing behind
#[test]
fn test_connect_vus_then_disconnect_vus() {
    for n in [0usize, 1, 100] {
        let server = server();
        let manager = manager(&server);

        let vus = manager.connect_vus(n, "sftp.test", "22", USER, &creds()).unwrap();
        assert_eq!(vus.len(), n);
        assert_eq!(manager.session_count(), n);
        assert_eq!(server.live_sessions(), n as u64);

        let report = manager.disconnect_vus();
        assert!(report.is_clean());
        assert_eq!(report.closed, vus);
        assert_eq!(manager.session_count(), 0);
        assert_eq!(server.live_sessions(), 0);
        assert_eq!(server.closed_sessions(), n as u64);
        println!("✓ {} VUs connected and torn down", n);
    }
}

/// Upload then download returns byte-identical content
#[test]
fn test_round_trip_is_byte_identical() {
    let server = server();
    let manager = manager(&server);
    let local = TempDir::new().unwrap();
    let back = TempDir::new().unwrap();

    let payload = random_payload(256 * 1024 + 17);
    std::fs::write(local.path().join("payload.bin"), &payload).unwrap();

    let vu = manager.connect_next("sftp.test", "22", USER, &creds()).unwrap();
    let up = manager
        .upload(vu, local.path(), "payload.bin", "/upload")
        .unwrap();
    let down = manager
        .download(vu, "/upload", "payload.bin", back.path())
        .unwrap();

    assert_eq!(up.bytes, payload.len() as u64);
    assert_eq!(down.bytes, payload.len() as u64);
    assert_eq!(up.checksum, down.checksum);
    assert_eq!(std::fs::read(back.path().join("payload.bin")).unwrap(), payload);
}

/// Two VUs on their own threads never see each other's session
#[test]
fn test_concurrent_vus_are_isolated() {
    let server = server();
    let manager = Arc::new(manager(&server));
    let local = TempDir::new().unwrap();

    std::fs::write(local.path().join("one.txt"), b"from vu one").unwrap();
    std::fs::write(local.path().join("two.txt"), b"from vu two").unwrap();

    std::thread::scope(|scope| {
        for (id, file) in [(1u64, "one.txt"), (2, "two.txt")] {
            let manager = manager.clone();
            let dir = local.path().to_path_buf();
            scope.spawn(move || {
                let vu = VuId(id);
                let info = manager.connect(vu, "sftp.test", "22", USER, &creds()).unwrap();
                manager.upload(vu, dir, file, "/upload").unwrap();
                assert_eq!(manager.session_info(vu).unwrap().session_id, info.session_id);
            });
        }
    });

    let one = manager.session_info(VuId(1)).unwrap();
    let two = manager.session_info(VuId(2)).unwrap();
    assert_ne!(one.session_id, two.session_id);
    assert_eq!(one.transfers, 1);
    assert_eq!(two.transfers, 1);
    assert_eq!(server.file("/upload/one.txt").unwrap(), b"from vu one");
    assert_eq!(server.file("/upload/two.txt").unwrap(), b"from vu two");
}

/// Reconnecting a VU closes the old session and later transfers use the new one
#[test]
fn test_reconnect_mid_run() {
    let server = server();
    let manager = manager(&server);
    let local = TempDir::new().unwrap();
    std::fs::write(local.path().join("a.txt"), b"first").unwrap();

    let vu = VuId(5);
    let first = manager.connect(vu, "sftp.test", "22", USER, &creds()).unwrap();
    manager.upload(vu, local.path(), "a.txt", "/upload").unwrap();

    let second = manager.connect(vu, "sftp.test", "22", USER, &creds()).unwrap();
    assert_ne!(first.session_id, second.session_id);
    assert_eq!(server.closed_sessions(), 1);
    assert_eq!(manager.session_count(), 1);

    std::fs::write(local.path().join("a.txt"), b"second").unwrap();
    manager.upload(vu, local.path(), "a.txt", "/upload").unwrap();

    let info = manager.session_info(vu).unwrap();
    assert_eq!(info.session_id, second.session_id);
    assert_eq!(info.transfers, 1);
    assert_eq!(server.file("/upload/a.txt").unwrap(), b"second");
}

/// A never-connected VU gets SessionNotFound and the registry is untouched
#[test]
fn test_unknown_vu_leaves_registry_unchanged() {
    let server = server();
    let manager = manager(&server);
    manager.connect(VuId(1), "sftp.test", "22", USER, &creds()).unwrap();

    let err = manager
        .upload(VuId(99), "/no/such/dir", "a.txt", "/upload")
        .unwrap_err();
    assert!(err.is_session_not_found());

    let err = manager
        .download(VuId(99), "/upload", "a.txt", "/no/such/dir")
        .unwrap_err();
    assert!(matches!(err, SftpError::SessionNotFound(VuId(99))));

    assert_eq!(manager.connected_vus(), vec![VuId(1)]);
    assert!(manager.disconnect(VuId(99)).is_ok());
    assert_eq!(manager.session_count(), 1);
}

/// Connecting to an unreachable host fails within the configured bound
#[test]
fn test_unreachable_host_times_out() {
    let server = server();
    let manager = manager(&server);

    let started = Instant::now();
    let err = manager
        .connect(VuId(1), "10.255.255.1", "22", USER, &creds())
        .unwrap_err();
    let elapsed = started.elapsed();

    match err {
        SftpError::Connection(e) => assert!(e.is_timeout()),
        other => panic!("Expected connection timeout, got {}", other),
    }
    assert!(elapsed < Duration::from_secs(3), "took {:?}", elapsed);
    assert!(!manager.is_connected(VuId(1)));
}

/// A failing VU in a batch rolls back the sessions opened before it
#[test]
fn test_bulk_failure_rolls_back() {
    let server = server();
    let manager = manager(&server);

    // Occupy VU 1 with a session that must survive the failed batch.
    manager.connect_next("sftp.test", "22", USER, &creds()).unwrap();

    let err = manager
        .connect_vus(3, "sftp.test", "22", "intruder", &creds())
        .unwrap_err();
    match err {
        SftpError::BulkConnect(bulk) => {
            assert_eq!(bulk.failed_vus(), vec![VuId(2)]);
            assert!(bulk.rolled_back.is_empty());
            assert_eq!(bulk.not_attempted, vec![VuId(3), VuId(4)]);
        }
        other => panic!("Expected bulk connect error, got {}", other),
    }

    assert_eq!(manager.connected_vus(), vec![VuId(1)]);
    assert_eq!(server.live_sessions(), 1);
}

/// A failure partway through a batch closes the sessions opened before it
#[test]
fn test_bulk_failure_closes_earlier_sessions() {
    let server = server();
    let config = ManagerConfig::default().with_connect(
        ConnectOptions::default().with_host_key(HostKeyPolicy::AcceptAny),
    );
    let manager =
        SessionManager::with_connector(config, Arc::new(RejectingDials::new(&server, &[2])));

    let err = manager
        .connect_vus(4, "sftp.test", "22", USER, &creds())
        .unwrap_err();
    match err {
        SftpError::BulkConnect(bulk) => {
            assert_eq!(bulk.failed_vus(), vec![VuId(3)]);
            assert_eq!(bulk.rolled_back, vec![VuId(1), VuId(2)]);
            assert_eq!(bulk.not_attempted, vec![VuId(4)]);
        }
        other => panic!("Expected bulk connect error, got {}", other),
    }

    assert_eq!(manager.session_count(), 0);
    assert_eq!(server.opened_sessions(), 2);
    assert_eq!(server.live_sessions(), 0);
    println!("✓ Partial batch rolled back");
}

/// Close failures during teardown are reported and every entry is still removed
#[test]
fn test_teardown_collects_close_failures() {
    let server = server();
    let manager = manager(&server);
    manager.connect_vus(4, "sftp.test", "22", USER, &creds()).unwrap();

    server.set_fail_close(true);
    let report = manager.disconnect_vus();

    assert_eq!(report.failures.len(), 4);
    assert!(report.closed.is_empty());
    assert_eq!(manager.session_count(), 0);
    assert!(serde_json::to_string(&report).unwrap().contains("failures"));
}

/// Encrypted key without a passphrase fails locally, before any dial
#[test]
fn test_encrypted_key_without_passphrase() {
    let server = server();
    let manager = manager(&server);
    let key = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/id_ed25519_encrypted");

    let err = manager
        .connect(VuId(1), "sftp.test", "22", USER, &Credentials::key(key, None))
        .unwrap_err();
    assert!(matches!(
        err,
        SftpError::Connection(vu_sftp::ConnectionError::Credentials(_))
    ));
    assert_eq!(server.opened_sessions(), 0);
}

/// Encrypted OpenSSH key with the right passphrase authenticates
#[test]
fn test_encrypted_key_with_passphrase() {
    let server = server();
    let manager = manager(&server);
    let key = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/id_ed25519_encrypted");

    let info = manager
        .connect(
            VuId(1),
            "sftp.test",
            "22",
            USER,
            &Credentials::key(key, Some("load-test-passphrase".into())),
        )
        .unwrap();
    assert_eq!(info.auth_method, "publickey");
}

/// Transfer errors surface with their cause
#[test]
fn test_missing_remote_directory_is_reported() {
    let server = server();
    let manager = manager(&server);
    let local = TempDir::new().unwrap();
    std::fs::write(local.path().join("a.txt"), b"x").unwrap();

    let vu = manager.connect_next("sftp.test", "22", USER, &creds()).unwrap();
    let err = manager
        .upload(vu, local.path(), "a.txt", "/not-created")
        .unwrap_err();
    assert!(matches!(
        err,
        SftpError::Transfer(TransferError::RemoteFile { .. })
    ));
    assert!(manager.is_connected(vu));
}
