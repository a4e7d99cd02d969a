//! Error Semantics Tests
//!
//! - leader-thrown SQL errors observed verbatim by followers
//! - facade validation: empty text, disposed objects, reader state
//! - the local and remote paths reporting failures identically

mod common;

use soledb::Error;

/// A leader SQL error with message `m` reaches the follower as a Server
/// error whose message equals `m`.
#[tokio::test(flavor = "multi_thread")]
async fn sql_error_messages_round_trip_verbatim() {
    let (_dir, leader, follower) = common::spawn_pair("badsql.db").await;

    let local_message = match leader.command("NOT SQL").execute_non_query().await {
        Err(Error::Server(message)) => message,
        other => panic!("expected a Server error, got {:?}", other),
    };
    let remote_message = match follower.command("NOT SQL").execute_non_query().await {
        Err(Error::Server(message)) => message,
        other => panic!("expected a Server error, got {:?}", other),
    };

    assert_eq!(local_message, remote_message);
    assert!(remote_message.contains("syntax error"), "{}", remote_message);

    follower.close().await;
    leader.close().await;
}

/// Runtime failures (not just prepare failures) also carry the leader's
/// message across.
#[tokio::test(flavor = "multi_thread")]
async fn constraint_violations_relay_their_message() {
    let (_dir, leader, follower) = common::spawn_pair("constraint.db").await;

    follower
        .command("CREATE TABLE t(x INTEGER PRIMARY KEY)")
        .execute_non_query()
        .await
        .unwrap();
    follower
        .command("INSERT INTO t VALUES(1)")
        .execute_non_query()
        .await
        .unwrap();

    let err = follower
        .command("INSERT INTO t VALUES(1)")
        .execute_non_query()
        .await
        .unwrap_err();
    match err {
        Error::Server(message) => {
            assert!(message.to_lowercase().contains("unique"), "{}", message)
        }
        other => panic!("expected a Server error, got {:?}", other),
    }

    follower.close().await;
    leader.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn type_mismatches_report_the_column() {
    let (_dir, leader, follower) = common::spawn_pair("mismatch.db").await;

    follower
        .command("CREATE TABLE t(n INTEGER)")
        .execute_non_query()
        .await
        .unwrap();
    follower
        .command("INSERT INTO t VALUES(5)")
        .execute_non_query()
        .await
        .unwrap();

    let mut reader = follower
        .command("SELECT n FROM t")
        .execute_reader()
        .await
        .unwrap();
    assert!(reader.read().await.unwrap());

    let err = reader.get_string(0).await.unwrap_err();
    match err {
        Error::Server(message) => {
            assert!(message.contains("cannot read"), "{}", message);
            assert!(message.contains("'n'"), "{}", message);
        }
        other => panic!("expected a Server error, got {:?}", other),
    }

    follower.close().await;
    leader.close().await;
}

/// Facade validation fires before any frame leaves the process.
#[tokio::test(flavor = "multi_thread")]
async fn local_validation_never_reaches_the_leader() {
    let (_dir, leader, follower) = common::spawn_pair("validation.db").await;

    // Empty and whitespace command text.
    for text in ["", "   "] {
        let err = follower.command(text).execute_non_query().await.unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
    }

    follower
        .command("CREATE TABLE t(x INTEGER)")
        .execute_non_query()
        .await
        .unwrap();

    // Column access before the first read.
    let mut reader = follower
        .command("SELECT x FROM t")
        .execute_reader()
        .await
        .unwrap();
    let err = reader.get_int32(0).await.unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)));

    // Column access past the last row.
    assert!(!reader.read().await.unwrap());
    let err = reader.get_int32(0).await.unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)));

    follower.close().await;
    leader.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn disposed_objects_fail_with_object_disposed() {
    let (_dir, leader, follower) = common::spawn_pair("disposed.db").await;

    let mut command = follower.command("SELECT 1");
    command.dispose();
    assert!(matches!(
        command.execute_non_query().await.unwrap_err(),
        Error::ObjectDisposed("Command")
    ));

    follower
        .command("CREATE TABLE t(x INTEGER)")
        .execute_non_query()
        .await
        .unwrap();
    let mut reader = follower
        .command("SELECT x FROM t")
        .execute_reader()
        .await
        .unwrap();
    reader.dispose();
    assert!(matches!(
        reader.read().await.unwrap_err(),
        Error::ObjectDisposed("Reader")
    ));

    follower.close().await;
    leader.close().await;
}
