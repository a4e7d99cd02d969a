//! Disconnection and Failover Tests
//!
//! - a waiter released with `Disconnected` when the transport dies mid-flight
//! - workers invalidated by a leadership transition
//! - a follower re-electing itself leader after the leader goes away

mod common;

use std::time::Duration;

use soledb::protocol::Message;
use soledb::{Error, Role};
use tokio::io::AsyncReadExt;

/// The transport closes between request and reply: the waiter releases with
/// `Disconnected`, and so does everything after it.
#[tokio::test(flavor = "multi_thread")]
async fn mid_flight_disconnect_releases_the_waiter() {
    common::init_tracing();

    // A fake leader that reads one request and hangs up.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut len = [0u8; 4];
        socket.read_exact(&mut len).await.unwrap();
        let mut payload = vec![0u8; u32::from_be_bytes(len) as usize];
        socket.read_exact(&mut payload).await.unwrap();
        drop(socket);
    });

    let transport = common::raw_transport(addr).await;
    let err = transport
        .send_and_wait(
            Message::CreateCommandRequest {
                sql: "SELECT 1".to_string(),
            },
            Some(Duration::from_secs(5)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Disconnected));

    transport.wait_closed().await;
    let err = transport
        .send(
            0,
            &Message::CreateCommandRequest {
                sql: "SELECT 1".to_string(),
            },
        )
        .unwrap_err();
    assert!(matches!(err, Error::Disconnected));
}

/// When the leader goes away the follower re-elects, wins the bind, and
/// serves its own commands; workers bound to the dead transport stay dead.
#[tokio::test(flavor = "multi_thread")]
async fn follower_takes_over_leadership() {
    let (_dir, leader, follower) = common::spawn_pair("failover.db").await;

    follower
        .command("CREATE TABLE t(x INTEGER)")
        .execute_non_query()
        .await
        .unwrap();

    // Bind a worker to the current (soon to be dead) transport.
    let mut stale = follower.command("INSERT INTO t VALUES(1)");
    assert_eq!(stale.execute_non_query().await.unwrap(), 1);

    leader.close().await;

    // The wait gate releases only once a fresh role is assigned.
    common::eventually(
        Duration::from_secs(10),
        Duration::from_millis(50),
        || (follower.role() == Role::Leader).then_some(()),
    )
    .await;

    let cancel = tokio_util::sync::CancellationToken::new();
    follower.wait_if_connecting(&cancel).await.unwrap();
    assert_eq!(follower.role(), Role::Leader);

    // The stale worker fails with Disconnected; a fresh command works and
    // sees the data written before the transition.
    let err = stale.execute_non_query().await.unwrap_err();
    assert!(matches!(err, Error::Disconnected));

    let mut count = follower
        .command("SELECT COUNT(*) FROM t")
        .execute_reader()
        .await
        .unwrap();
    assert!(count.read().await.unwrap());
    assert_eq!(count.get_int64(0).await.unwrap(), 1);

    follower.close().await;
}

/// Losing a follower leaves the leader untouched.
#[tokio::test(flavor = "multi_thread")]
async fn follower_departure_does_not_disturb_the_leader() {
    let (_dir, leader, follower) = common::spawn_pair("departure.db").await;

    follower
        .command("CREATE TABLE t(x INTEGER)")
        .execute_non_query()
        .await
        .unwrap();
    follower.close().await;

    leader
        .command("INSERT INTO t VALUES(7)")
        .execute_non_query()
        .await
        .unwrap();

    let mut reader = leader
        .command("SELECT x FROM t")
        .execute_reader()
        .await
        .unwrap();
    assert!(reader.read().await.unwrap());
    assert_eq!(reader.get_int32(0).await.unwrap(), 7);

    leader.close().await;
}

/// A command issued while the follower is between leaders blocks at the wait
/// gate and then succeeds against the new role.
#[tokio::test(flavor = "multi_thread")]
async fn commands_wait_through_the_transition() {
    let (_dir, leader, follower) = common::spawn_pair("transition.db").await;

    follower
        .command("CREATE TABLE t(x INTEGER)")
        .execute_non_query()
        .await
        .unwrap();

    leader.close().await;

    // Fire a command straight away; it may land before, during, or after
    // the transition, but it must either succeed or fail with Disconnected,
    // and a retry must eventually succeed.
    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    loop {
        match follower
            .command("INSERT INTO t VALUES(1)")
            .execute_non_query()
            .await
        {
            Ok(changes) => {
                assert_eq!(changes, 1);
                break;
            }
            Err(Error::Disconnected) => {
                assert!(
                    std::time::Instant::now() < deadline,
                    "follower never recovered"
                );
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }

    follower.close().await;
}
