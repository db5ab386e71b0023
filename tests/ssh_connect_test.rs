use std::net::TcpListener;
use std::time::{Duration, Instant};
use vu_sftp::config::{ConnectOptions, HostKeyPolicy};
use vu_sftp::{Credentials, ManagerConfig, SessionManager, SftpError, VuId};

fn manager(timeout: Duration) -> SessionManager {
    SessionManager::new(
        ManagerConfig::default()
            .with_connect(
                ConnectOptions::default()
                    .with_connect_timeout(timeout)
                    .with_host_key(HostKeyPolicy::AcceptAny),
            )
            .with_bulk_connect_timeout(Duration::from_secs(5)),
    )
}

/// A server that accepts TCP but never speaks SSH hits the connect timeout
#[test]
fn test_silent_server_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port().to_string();
    let manager = manager(Duration::from_millis(500));

    let started = Instant::now();
    let err = manager
        .connect(VuId(1), "127.0.0.1", &port, "tester", &Credentials::password("pw"))
        .unwrap_err();
    let elapsed = started.elapsed();

    match err {
        SftpError::Connection(e) => assert!(e.is_timeout(), "unexpected error: {}", e),
        other => panic!("Expected connection error, got {}", other),
    }
    assert!(elapsed < Duration::from_secs(5), "took {:?}", elapsed);
    assert_eq!(manager.session_count(), 0);
    println!("✓ Silent server timed out after {:?}", elapsed);
}

/// An unroutable address fails within the bound and registers nothing
#[test]
fn test_unroutable_host_bounded() {
    let manager = manager(Duration::from_millis(500));

    let started = Instant::now();
    let result = manager.connect(
        VuId(1),
        "10.255.255.1",
        "22",
        "tester",
        &Credentials::password("pw"),
    );

    assert!(matches!(result, Err(SftpError::Connection(_))));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!manager.is_connected(VuId(1)));
}

/// Bulk connect against a silent server stops at the first VU
#[test]
fn test_bulk_connect_silent_server() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port().to_string();
    let manager = manager(Duration::from_millis(300));

    let err = manager
        .connect_vus(3, "127.0.0.1", &port, "tester", &Credentials::password("pw"))
        .unwrap_err();

    match err {
        SftpError::BulkConnect(bulk) => {
            assert_eq!(bulk.failed_vus(), vec![VuId(1)]);
            assert_eq!(bulk.not_attempted, vec![VuId(2), VuId(3)]);
        }
        other => panic!("Expected bulk connect error, got {}", other),
    }
    assert_eq!(manager.session_count(), 0);
}
