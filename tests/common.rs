#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use soledb::transport::Transport;
use soledb::{Connection, Role};

/// Installs a test-writer subscriber once; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn create_temp_db_file(name: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::TempDir::new().expect("create temp dir");
    let path = dir.path().join(name);
    (dir, path)
}

/// Spawns a leader on an ephemeral loopback port plus one follower dialed to
/// it, both over the same temp database file.
pub async fn spawn_pair(name: &str) -> (tempfile::TempDir, Connection, Connection) {
    init_tracing();
    let (dir, path) = create_temp_db_file(name);

    let leader = Connection::open(&format!(
        "Data Source={}; Endpoint=127.0.0.1:0",
        path.display()
    ))
    .await
    .expect("open leader connection");
    assert_eq!(leader.role(), Role::Leader);

    let addr = leader
        .local_addr()
        .await
        .expect("leader has a bound endpoint");

    let follower = connect_follower(&path, addr).await;
    (dir, leader, follower)
}

/// Dials an additional follower at the leader's address.
pub async fn connect_follower(path: &std::path::Path, addr: SocketAddr) -> Connection {
    let follower = Connection::open(&format!(
        "Data Source={}; Endpoint={}",
        path.display(),
        addr
    ))
    .await
    .expect("open follower connection");
    assert_eq!(follower.role(), Role::Follower);
    follower
}

/// A bare protocol client speaking directly to the leader, for wire-level
/// scenarios the facade hides.
pub async fn raw_transport(addr: SocketAddr) -> Arc<Transport> {
    let stream = tokio::net::TcpStream::connect(addr)
        .await
        .expect("dial leader");
    Transport::spawn(stream, None)
}

/// Polls `f` until it yields, panicking after `timeout`.
pub async fn eventually<T>(
    timeout: Duration,
    interval: Duration,
    mut f: impl FnMut() -> Option<T>,
) -> T {
    let start = std::time::Instant::now();
    loop {
        if let Some(v) = f() {
            return v;
        }
        if start.elapsed() > timeout {
            panic!("condition not met within {:?}", timeout);
        }
        tokio::time::sleep(interval).await;
    }
}
