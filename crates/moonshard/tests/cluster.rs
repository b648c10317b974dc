//! End-to-end tests: real shard listeners on `127.0.0.1`, real WebSocket
//! clients, and either the real authority or an in-memory session source.

use std::time::Duration;

use chrono::Utc;
use moonshard::{Cluster, MoonshardConfig};
use moonshard_authority::{AuthorityConfig, AuthorityServer};
use moonshard_protocol::{AuthorityReply, FileHeader, OnlineList, SessionRecord};
use moonshard_sync::{SessionSource, SyncError};
use moonshard_transport::{connect, ClientConnection, Connection, Frame};
use tokio::sync::watch;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A session source that always returns the same snapshot.
struct FixedSource(Vec<SessionRecord>);

impl SessionSource for FixedSource {
    async fn fetch_snapshot(&mut self) -> Result<Vec<SessionRecord>, SyncError> {
        Ok(self.0.clone())
    }

    async fn report_active(&mut self, _tokens: Vec<String>) -> Result<(), SyncError> {
        Ok(())
    }
}

fn record(user: &str) -> SessionRecord {
    SessionRecord {
        user_id: user.into(),
        session_token: format!("tok-{user}"),
        created_at: Utc::now(),
        client_address: "127.0.0.1".into(),
        is_active: true,
    }
}

fn config(storage: &std::path::Path) -> MoonshardConfig {
    let mut config = MoonshardConfig::default();
    config.cluster.host = "127.0.0.1".into();
    config.cluster.base_port = 0;
    config.timing.sync_interval_secs = 1;
    config.timing.cleanup_interval_secs = 1;
    config.timing.status_interval_secs = 60;
    config.storage.received_files = storage.to_path_buf();
    config.validated()
}

async fn launch_fixed(
    config: &MoonshardConfig,
    users: &[&str],
) -> (Cluster, watch::Sender<bool>) {
    let records: Vec<SessionRecord> = users.iter().map(|u| record(u)).collect();
    let (tx, rx) = watch::channel(false);
    let cluster = Cluster::launch_with(config, rx, |_| FixedSource(records.clone()))
        .await
        .unwrap();

    let sessions = cluster.shards()[0].state.sessions().clone();
    let tokens: Vec<String> = users.iter().map(|u| format!("tok-{u}")).collect();
    eventually(|| tokens.iter().all(|t| sessions.validate(t).is_ok())).await;
    (cluster, tx)
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..250 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached");
}

async fn recv(conn: &ClientConnection) -> Option<Frame> {
    tokio::time::timeout(Duration::from_secs(5), conn.recv())
        .await
        .expect("timed out waiting for a frame")
        .unwrap()
}

async fn recv_text(conn: &ClientConnection) -> String {
    match recv(conn).await {
        Some(Frame::Text(text)) => text,
        other => panic!("expected text, got {other:?}"),
    }
}

async fn login(cluster: &Cluster, token: &str) -> (ClientConnection, String) {
    let addr = cluster.shards()[0].addr;
    let conn = connect(&format!("ws://{addr}/")).await.unwrap();
    conn.send_text(&format!(r#"{{"type":"session_auth","token":"{token}"}}"#))
        .await
        .unwrap();
    let reply = recv_text(&conn).await;
    (conn, reply)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_login_list_and_relay_between_two_clients() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(tmp.path());
    let (cluster, shutdown) = launch_fixed(&config, &["alice", "bob"]).await;

    let (alice, reply) = login(&cluster, "tok-alice").await;
    assert_eq!(reply, "SESSION_OK:alice");
    let (bob, reply) = login(&cluster, "tok-bob").await;
    assert_eq!(reply, "SESSION_OK:bob");

    alice.send_text(r#"{"type":"list_online"}"#).await.unwrap();
    let list: OnlineList = serde_json::from_str(&recv_text(&alice).await).unwrap();
    assert_eq!(list.user_ids, vec!["alice", "bob"]);

    alice
        .send_text(r#"{"type":"file_send_begin","targetUserId":"bob","fileName":"../notes.txt","fileSize":11}"#)
        .await
        .unwrap();
    assert_eq!(recv_text(&alice).await, "file_receive_ready");
    alice.send_binary(b"hello ").await.unwrap();
    alice.send_binary(b"world").await.unwrap();
    alice.send_text(r#"{"type":"file_send_complete"}"#).await.unwrap();
    assert_eq!(recv_text(&alice).await, "FILE_SENT");

    let header: FileHeader = serde_json::from_str(&recv_text(&bob).await).unwrap();
    assert_eq!(header, FileHeader::new("alice", ".._notes.txt", 11));
    assert_eq!(recv(&bob).await, Some(Frame::Binary(b"hello world".to_vec())));

    shutdown.send(true).unwrap();
    cluster.wait().await;
}

#[tokio::test]
async fn test_size_mismatch_reports_failure_and_keeps_connection() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(tmp.path());
    let (cluster, _shutdown) = launch_fixed(&config, &["alice"]).await;

    let (alice, _) = login(&cluster, "tok-alice").await;
    alice
        .send_text(r#"{"type":"file_send_begin","targetUserId":"bob","fileName":"a.bin","fileSize":1000}"#)
        .await
        .unwrap();
    assert_eq!(recv_text(&alice).await, "file_receive_ready");
    alice.send_binary(&[7u8; 999]).await.unwrap();
    alice.send_text(r#"{"type":"file_send_complete"}"#).await.unwrap();
    assert_eq!(recv_text(&alice).await, "FILE_FAILED:Size mismatch");

    // Still usable afterwards, and nothing was written.
    alice.send_text(r#"{"type":"list_online"}"#).await.unwrap();
    assert!(recv_text(&alice).await.contains("online_list"));
    let shard_dir = tmp.path().join("Alpha");
    assert!(!shard_dir.exists() || std::fs::read_dir(&shard_dir).unwrap().count() == 0);
}

#[tokio::test]
async fn test_upload_for_absent_user_is_saved_server_only() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(tmp.path());
    let (cluster, _shutdown) = launch_fixed(&config, &["alice"]).await;

    let (alice, _) = login(&cluster, "tok-alice").await;
    alice
        .send_text(r#"{"type":"file_send_begin","targetUserId":"zed","fileName":"a.bin","fileSize":3}"#)
        .await
        .unwrap();
    recv_text(&alice).await;
    alice.send_binary(&[1, 2, 3]).await.unwrap();
    alice.send_text(r#"{"type":"file_send_complete"}"#).await.unwrap();
    assert_eq!(recv_text(&alice).await, "FILE_SENT_SERVER_ONLY");

    let dirs: Vec<_> = std::fs::read_dir(tmp.path().join("Alpha"))
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(dirs.len(), 1);
    assert_eq!(std::fs::read(dirs[0].join("a.bin")).unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_invalid_token_gets_session_invalid_and_close() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(tmp.path());
    let (cluster, _shutdown) = launch_fixed(&config, &["alice"]).await;

    let (conn, reply) = login(&cluster, "tok-mallory").await;
    assert_eq!(reply, "SESSION_INVALID");
    assert_eq!(recv(&conn).await, None);
}

#[tokio::test]
async fn test_idle_tcp_client_does_not_block_logins() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(tmp.path());
    let (cluster, _shutdown) = launch_fixed(&config, &["alice"]).await;

    let _idle = tokio::net::TcpStream::connect(cluster.shards()[0].addr)
        .await
        .unwrap();
    let (_alice, reply) = tokio::time::timeout(Duration::from_secs(3), login(&cluster, "tok-alice"))
        .await
        .expect("login must not wait behind a silent socket");
    assert_eq!(reply, "SESSION_OK:alice");
}

#[tokio::test]
async fn test_full_shard_queues_rejects_then_promotes() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = config(tmp.path());
    config.limits.max_connections = 1;
    config.limits.max_queued_connections = 1;
    config.timing.connection_grace_secs = 0;
    let (cluster, _shutdown) = launch_fixed(&config, &["alice", "bob", "carol"]).await;

    let (alice, reply) = login(&cluster, "tok-alice").await;
    assert_eq!(reply, "SESSION_OK:alice");
    let (bob, reply) = login(&cluster, "tok-bob").await;
    assert_eq!(reply, "SESSION_QUEUED");
    let (carol, reply) = login(&cluster, "tok-carol").await;
    assert_eq!(reply, "SERVER_FULL");
    assert_eq!(recv(&carol).await, None);

    alice.close().await.unwrap();
    assert_eq!(recv_text(&bob).await, "SESSION_OK:bob");
}

#[tokio::test]
async fn test_sessions_flow_from_real_authority_to_shard() {
    let tmp = tempfile::tempdir().unwrap();
    let authority = AuthorityServer::bind(AuthorityConfig {
        bind_addr: "127.0.0.1:0".into(),
        ..AuthorityConfig::default()
    })
    .await
    .unwrap();
    let authority_addr = authority.local_addr().unwrap();
    let directory = authority.directory();
    let (tx, rx) = watch::channel(false);
    tokio::spawn(authority.run(rx.clone()));

    // Player logs in at the authority and keeps that socket open.
    let auth = connect(&format!("ws://{authority_addr}/auth?userId=alice"))
        .await
        .unwrap();
    let reply: AuthorityReply = recv_text(&auth).await.parse().unwrap();
    let AuthorityReply::AuthSuccess(token) = reply else {
        panic!("expected AUTH_SUCCESS, got {reply:?}");
    };

    let mut config = config(tmp.path());
    config.upstream.authority_url = format!("ws://{authority_addr}/sessions");
    let cluster = Cluster::launch(&config, rx).await.unwrap();
    let sessions = cluster.shards()[0].state.sessions().clone();
    eventually(|| sessions.validate(&token).is_ok()).await;

    let (alice, reply) = login(&cluster, &token).await;
    assert_eq!(reply, "SESSION_OK:alice");

    // The shard reports the token back, so the authority keeps it even
    // after the auth socket closes and the session goes inactive.
    auth.close().await.unwrap();
    eventually(|| directory.get(&token).is_some_and(|r| !r.is_active)).await;
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert!(directory.run_cleanup_pass(Utc::now()).deleted.is_empty());

    // An inactive session is still good for a new connection.
    let (second, reply) = login(&cluster, &token).await;
    assert_eq!(reply, "SESSION_OK:alice");

    // Once no connection holds the token the authority may delete it.
    alice.close().await.unwrap();
    second.close().await.unwrap();
    eventually(|| sessions.tokens_in_use().is_empty()).await;
    eventually(|| directory.run_cleanup_pass(Utc::now()).deleted.contains(&token)).await;
    assert!(directory.get(&token).is_none());

    tx.send(true).unwrap();
    cluster.wait().await;
}
