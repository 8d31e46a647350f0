//! End-to-end behaviour of the connection manager against a local server.

mod common;

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{eventually, MockServer};
use lib_realtime::core::ProposalStatus;
use lib_realtime::{
    categories, BacklogStore, ConnectionManager, ConnectionState, CredentialSource, CredentialStore,
    MemoryBacklogStore, RealtimeConfig, RealtimeError,
};
use serde_json::json;

const WAIT: Duration = Duration::from_secs(5);

fn config(url: &str) -> RealtimeConfig {
    RealtimeConfig {
        url: url.to_string(),
        reconnect_base_ms: 50,
        reconnect_floor_ms: 10,
        reconnect_max_ms: 500,
        ..RealtimeConfig::default()
    }
}

async fn wait_connected(manager: &ConnectionManager) {
    let mut rx = manager.watch_state();
    tokio::time::timeout(WAIT, rx.wait_for(|s| s.state == ConnectionState::Connected))
        .await
        .expect("connected in time")
        .expect("state channel open");
}

fn counter() -> (Arc<AtomicUsize>, impl Fn(&[lib_realtime::WireMessage]) + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&count);
    (count, move |batch: &[lib_realtime::WireMessage]| {
        sink.fetch_add(batch.len(), Ordering::SeqCst);
    })
}

#[tokio::test]
async fn sent_message_is_tracked_until_acknowledged() {
    let mut server = MockServer::start().await;
    let store = Arc::new(MemoryBacklogStore::new());
    let manager = ConnectionManager::builder(config(&server.url))
        .backlog_store(store.clone())
        .build()
        .unwrap();

    manager.connect().unwrap();
    let mut conn = server.accept(WAIT).await;
    wait_connected(&manager).await;

    manager.send_chat_message("c1", "hi").unwrap();
    let sent = conn.recv_kind("message:send").await;
    assert_eq!(sent["data"]["content"], "hi");
    let cid = sent["correlationId"].as_str().expect("correlation id").to_string();
    assert!(!cid.is_empty());

    let m = &manager;
    eventually("pending ack recorded", || async move {
        m.stats().await.unwrap().pending_acks == 1
    })
    .await;
    assert_eq!(store.load().unwrap().len(), 1);

    conn.send_json(json!({"type": "message:sent", "data": {"correlationId": cid, "id": "m1"}}));
    eventually("ack cleared", || async move { m.stats().await.unwrap().pending_acks == 0 }).await;
    assert!(store.raw().is_none());
}

#[tokio::test]
async fn offline_send_is_persisted_and_flushed_when_back_online() {
    let mut server = MockServer::start().await;
    let store = Arc::new(MemoryBacklogStore::new());
    let manager = ConnectionManager::builder(config(&server.url))
        .backlog_store(store.clone())
        .start_offline(true)
        .build()
        .unwrap();

    manager.connect().unwrap();
    manager.send_chat_message("c1", "hi").unwrap();

    let stats = manager.stats().await.unwrap();
    assert_eq!(stats.queued, 1);
    assert_eq!(store.load().unwrap()[0].kind, "message:send");
    assert!(server.try_accept(Duration::from_millis(300)).await.is_none());

    manager.set_online(true).unwrap();
    let mut conn = server.accept(WAIT).await;
    let sent = conn.recv_kind("message:send").await;
    assert_eq!(sent["data"], json!({"conversationId": "c1", "content": "hi"}));
    assert!(sent["correlationId"].is_string());

    let m = &manager;
    eventually("message moved from queue to pending", || async move {
        let s = m.stats().await.unwrap();
        s.queued == 0 && s.pending_acks == 1
    })
    .await;
}

#[tokio::test]
async fn duplicate_push_is_dispatched_once() {
    let mut server = MockServer::start().await;
    let manager = ConnectionManager::builder(config(&server.url)).build().unwrap();
    let (count, cb) = counter();
    let _sub = manager.subscribe("proposal:accepted", cb);

    manager.connect().unwrap();
    let conn = server.accept(WAIT).await;
    wait_connected(&manager).await;

    let push = json!({"type": "proposal:accepted", "data": {"conversationId": "c1", "amount": 10}});
    conn.send_json(push.clone());
    conn.send_json(push);

    let m = &manager;
    eventually("conversation cache updated", || async move {
        m.conversation("c1")
            .await
            .unwrap()
            .is_some_and(|c| c.proposal_status == Some(ProposalStatus::Accepted))
    })
    .await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn repeated_state_updates_are_all_applied() {
    let mut server = MockServer::start().await;
    let manager = ConnectionManager::builder(config(&server.url)).build().unwrap();
    let (online_count, cb) = counter();
    let _sub = manager.subscribe("presence:online", cb);

    manager.connect().unwrap();
    let conn = server.accept(WAIT).await;
    wait_connected(&manager).await;

    conn.send_json(json!({"type": "presence:online", "data": {"userId": "u1"}}));
    conn.send_json(json!({"type": "presence:offline", "data": {"userId": "u1"}}));
    conn.send_json(json!({"type": "presence:online", "data": {"userId": "u1"}}));
    conn.send_json(json!({"type": "conversation:updated", "data": {"conversationId": "c1", "unreadCount": 2}}));
    conn.send_json(json!({"type": "conversation:updated", "data": {"conversationId": "c1", "unreadCount": 5}}));

    let m = &manager;
    eventually("second conversation update applied", || async move {
        m.conversation("c1").await.unwrap().is_some_and(|c| c.unread_count == 5)
    })
    .await;
    assert!(manager.presence("u1").await.unwrap().unwrap().online);
    let c = &online_count;
    eventually("both online events dispatched", || async move { c.load(Ordering::SeqCst) == 2 }).await;
}

#[tokio::test]
async fn new_messages_are_batched_and_confirmed() {
    let mut server = MockServer::start().await;
    let manager = ConnectionManager::builder(config(&server.url)).build().unwrap();
    let batches = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&batches);
    let _sub = manager.subscribe("message:new", move |batch| sink.lock().unwrap().push(batch.len()));

    manager.connect().unwrap();
    let mut conn = server.accept(WAIT).await;
    wait_connected(&manager).await;

    for id in ["m1", "m2", "m3"] {
        conn.send_json(json!({"type": "message:new", "data": {"id": id, "conversationId": "c1"}}));
    }
    let ack = conn.recv_kind("message:delivery_ack").await;
    assert_eq!(ack["data"]["messageId"], "m1");

    let b = &batches;
    eventually("batch delivered", || async move { !b.lock().unwrap().is_empty() }).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let total: usize = batches.lock().unwrap().iter().sum();
    assert_eq!(total, 3);
    assert!(batches.lock().unwrap().len() < 3, "events were not batched");
    assert_eq!(manager.conversation("c1").await.unwrap().unwrap().unread_count, 3);
}

#[tokio::test]
async fn auth_close_rereads_a_rotated_credential_without_backoff() {
    let mut server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let token_file = dir.path().join("token");
    fs::write(&token_file, "old-token").unwrap();

    let credentials = Arc::new(CredentialStore::new(CredentialSource::File(token_file.clone())));
    let manager = ConnectionManager::builder(RealtimeConfig {
        // Backoff would take far longer than the test waits.
        reconnect_base_ms: 20_000,
        reconnect_max_ms: 30_000,
        ..config(&server.url)
    })
    .credentials(credentials)
    .build()
    .unwrap();

    manager.connect().unwrap();
    let first = server.accept(WAIT).await;
    assert!(first.query.contains("token=old-token"));
    wait_connected(&manager).await;

    fs::write(&token_file, "new-token").unwrap();
    first.close(4001, "bye");

    let second = server.accept(Duration::from_secs(2)).await;
    assert!(second.query.contains("token=new-token"));
}

#[cfg(feature = "refresh")]
#[tokio::test]
async fn auth_close_refreshes_the_credential_over_http() {
    use lib_realtime::credentials::RefreshClient;

    let mut server = MockServer::start().await;
    let (refresh_url, http) = common::mock_http_once(200, r#"{"accessToken":"fresh","refreshToken":"r2"}"#);
    let dir = tempfile::tempdir().unwrap();
    let token_file = dir.path().join("token");
    fs::write(&token_file, "stale").unwrap();

    let credentials = Arc::new(
        CredentialStore::new(CredentialSource::File(token_file.clone()))
            .with_refresh(RefreshClient::new(&refresh_url, "r1".into()).unwrap()),
    );
    let manager = ConnectionManager::builder(RealtimeConfig {
        reconnect_base_ms: 20_000,
        reconnect_max_ms: 30_000,
        ..config(&server.url)
    })
    .credentials(credentials)
    .build()
    .unwrap();

    manager.connect().unwrap();
    let first = server.accept(WAIT).await;
    assert!(first.query.contains("token=stale"));
    wait_connected(&manager).await;

    first.close(4401, "token expired");
    let second = server.accept(Duration::from_secs(3)).await;
    assert!(second.query.contains("token=fresh"));
    assert_eq!(fs::read_to_string(&token_file).unwrap(), "fresh");

    let request_body = http.join().unwrap();
    assert!(request_body.contains(r#""refreshToken":"r1""#));
}

#[cfg(feature = "refresh")]
#[tokio::test]
async fn stalled_refresh_is_cut_off_by_the_handshake_timeout() {
    use lib_realtime::credentials::RefreshClient;

    let mut server = MockServer::start().await;
    let refresh_url = common::mock_http_silent();
    let credentials = Arc::new(
        CredentialStore::new(CredentialSource::Static("stale".into()))
            .with_refresh(RefreshClient::new(&refresh_url, "r1".into()).unwrap()),
    );
    let manager = ConnectionManager::builder(RealtimeConfig {
        handshake_timeout_ms: 300,
        ..config(&server.url)
    })
    .credentials(credentials)
    .build()
    .unwrap();

    manager.connect().unwrap();
    let first = server.accept(WAIT).await;
    wait_connected(&manager).await;

    // The refresh endpoint never answers; the attempt must still give up
    // and the following one goes out with the credential at hand.
    // A refresh request alone may take ten seconds per try.
    first.close(4401, "token expired");
    let second = server.accept(Duration::from_secs(3)).await;
    assert!(second.query.contains("token=stale"));
    wait_connected(&manager).await;
}

#[tokio::test]
async fn missed_pongs_close_and_reconnect() {
    let mut server = MockServer::start_with(false).await;
    let manager = ConnectionManager::builder(RealtimeConfig {
        heartbeat_interval_ms: 200,
        pong_timeout_ms: 100,
        max_missed_pongs: 2,
        ..config(&server.url)
    })
    .build()
    .unwrap();
    let statuses = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&statuses);
    let _sub = manager.subscribe(categories::CONNECTION_STATUS, move |batch| {
        for e in batch {
            sink.lock().unwrap().push(e.data.as_ref().unwrap()["connected"].as_bool().unwrap());
        }
    });

    manager.connect().unwrap();
    let mut first = server.accept(WAIT).await;
    first.recv_kind("ping").await;
    first.recv_kind("ping").await;

    let _second = server.accept(WAIT).await;
    let st = &statuses;
    eventually("status events", || async move { st.lock().unwrap().len() >= 3 }).await;
    assert_eq!(statuses.lock().unwrap()[..3], [true, false, true]);
}

#[tokio::test]
async fn answered_pings_keep_the_connection() {
    let mut server = MockServer::start().await;
    let manager = ConnectionManager::builder(RealtimeConfig {
        heartbeat_interval_ms: 100,
        pong_timeout_ms: 100,
        ..config(&server.url)
    })
    .build()
    .unwrap();

    manager.connect().unwrap();
    let mut conn = server.accept(WAIT).await;
    for _ in 0..3 {
        conn.recv_kind("ping").await;
    }
    assert!(server.try_accept(Duration::from_millis(200)).await.is_none());
    assert!(manager.is_connected());
}

#[tokio::test]
async fn hidden_client_waits_twice_as_long_for_a_pong() {
    let mut server = MockServer::start_with(false).await;
    let manager = ConnectionManager::builder(RealtimeConfig {
        heartbeat_interval_ms: 200,
        pong_timeout_ms: 200,
        max_missed_pongs: 1,
        ..config(&server.url)
    })
    .build()
    .unwrap();

    manager.connect().unwrap();
    let mut first = server.accept(WAIT).await;
    wait_connected(&manager).await;
    manager.set_visible(false).unwrap();

    first.recv_kind("ping").await;
    let pinged = std::time::Instant::now();
    let _second = server.accept(WAIT).await;

    // 400ms hidden deadline; a visible client would give up after 200ms.
    assert!(pinged.elapsed() >= Duration::from_millis(350), "gave up after {:?}", pinged.elapsed());
    assert!(!manager.snapshot().visible);
    wait_connected(&manager).await;
}

#[tokio::test]
async fn unacknowledged_message_is_retransmitted_then_dead_lettered() {
    let mut server = MockServer::start().await;
    let manager = ConnectionManager::builder(RealtimeConfig {
        ack_timeout_ms: 150,
        ack_sweep_interval_ms: 50,
        max_retransmits: 1,
        ..config(&server.url)
    })
    .build()
    .unwrap();
    let (dead, cb) = counter();
    let _sub = manager.subscribe(categories::DEAD_LETTER, cb);

    manager.connect().unwrap();
    let mut conn = server.accept(WAIT).await;
    wait_connected(&manager).await;

    manager.send_chat_message("c1", "anyone?").unwrap();
    let first = conn.recv_kind("message:send").await;
    let second = conn.recv_kind("message:send").await;
    assert_ne!(first["correlationId"], second["correlationId"]);
    assert_eq!(second["data"]["content"], "anyone?");

    let d = &dead;
    eventually("dead letter published", || async move { d.load(Ordering::SeqCst) == 1 }).await;
    let stats = manager.stats().await.unwrap();
    assert_eq!(stats.dead_lettered, 1);
    assert_eq!(stats.pending_acks, 0);
    assert_eq!(stats.queued, 0);
}

#[tokio::test]
async fn presence_interest_is_shared_and_restored_after_reconnect() {
    let mut server = MockServer::start().await;
    let manager = ConnectionManager::builder(config(&server.url)).build().unwrap();

    manager.connect().unwrap();
    let mut conn = server.accept(WAIT).await;
    wait_connected(&manager).await;

    manager.subscribe_presence("u1").unwrap();
    manager.subscribe_presence("u1").unwrap();
    let sub = conn.recv_kind("presence:subscribe").await;
    assert_eq!(sub["data"]["userIds"], json!(["u1"]));

    conn.send_json(json!({"type": "presence:online", "data": {"userId": "u1", "lastActive": "now"}}));
    let m = &manager;
    eventually("presence cached", || async move {
        m.presence("u1").await.unwrap().is_some_and(|p| p.online)
    })
    .await;

    manager.reconnect().unwrap();
    let mut again = server.accept(WAIT).await;
    let sub = again.recv_kind("presence:subscribe").await;
    assert_eq!(sub["data"]["userIds"], json!(["u1"]));
    drop(conn);
}

#[tokio::test]
async fn server_close_reconnects_and_resets_attempts() {
    let mut server = MockServer::start().await;
    let manager = ConnectionManager::builder(config(&server.url)).build().unwrap();

    manager.connect().unwrap();
    let first = server.accept(WAIT).await;
    wait_connected(&manager).await;
    first.close(1011, "restarting");

    let _second = server.accept(WAIT).await;
    wait_connected(&manager).await;
    assert_eq!(manager.snapshot().reconnect_attempts, 0);
}

#[tokio::test]
async fn stalled_handshake_times_out_into_backoff() {
    let (url, accepted) = common::silent_tcp_server().await;
    let manager = ConnectionManager::builder(RealtimeConfig {
        handshake_timeout_ms: 200,
        ..config(&url)
    })
    .build()
    .unwrap();

    manager.connect().unwrap();
    let m = &manager;
    eventually("first attempt timed out", || async move { m.snapshot().reconnect_attempts >= 1 }).await;
    let a = &accepted;
    eventually("second attempt", || async move { a.load(Ordering::SeqCst) >= 2 }).await;
    assert_ne!(manager.snapshot().state, ConnectionState::Connected);

    manager.disconnect().unwrap();
    eventually("attempts stopped", || async move {
        let snap = m.snapshot();
        snap.state == ConnectionState::Disconnected && snap.reconnect_delay.is_none()
    })
    .await;
}

#[tokio::test]
async fn foreground_signals_skip_the_pending_backoff() {
    let mut server = MockServer::start().await;
    let manager = ConnectionManager::builder(RealtimeConfig {
        reconnect_base_ms: 20_000,
        reconnect_floor_ms: 20_000,
        reconnect_max_ms: 30_000,
        ..config(&server.url)
    })
    .build()
    .unwrap();

    manager.connect().unwrap();
    let first = server.accept(WAIT).await;
    wait_connected(&manager).await;

    first.close(1011, "restarting");
    let m = &manager;
    eventually("reconnect scheduled", || async move {
        let snap = m.snapshot();
        snap.state == ConnectionState::Disconnected && snap.reconnect_delay.is_some()
    })
    .await;
    manager.set_visible(false).unwrap();
    assert!(server.try_accept(Duration::from_millis(300)).await.is_none());
    manager.set_visible(true).unwrap();
    let second = server.accept(Duration::from_secs(2)).await;
    wait_connected(&manager).await;

    second.close(1011, "restarting");
    eventually("reconnect scheduled again", || async move {
        m.snapshot().reconnect_delay.is_some()
    })
    .await;
    manager.focus().unwrap();
    let _third = server.accept(Duration::from_secs(2)).await;
    wait_connected(&manager).await;
}

#[tokio::test]
async fn disconnect_stops_automatic_reconnection() {
    let mut server = MockServer::start().await;
    let manager = ConnectionManager::builder(config(&server.url)).build().unwrap();

    manager.connect().unwrap();
    let mut conn = server.accept(WAIT).await;
    wait_connected(&manager).await;

    manager.disconnect().unwrap();
    assert!(conn.recv(Duration::from_millis(500)).await.is_none());
    assert!(server.try_accept(Duration::from_millis(500)).await.is_none());

    let snap = manager.snapshot();
    assert_eq!(snap.state, ConnectionState::Disconnected);
    assert!(!snap.auto_reconnect);
}

#[tokio::test]
async fn ban_is_terminal_and_purges_local_state() {
    let mut server = MockServer::start().await;
    let store = Arc::new(MemoryBacklogStore::new());
    let dir = tempfile::tempdir().unwrap();
    let token_file = dir.path().join("token");
    fs::write(&token_file, "t").unwrap();

    let manager = ConnectionManager::builder(config(&server.url))
        .backlog_store(store.clone())
        .credentials(Arc::new(CredentialStore::new(CredentialSource::File(token_file.clone()))))
        .build()
        .unwrap();
    let (banned, cb) = counter();
    let _sub = manager.subscribe(categories::USER_BANNED, cb);

    manager.connect().unwrap();
    let mut conn = server.accept(WAIT).await;
    wait_connected(&manager).await;
    manager.send_chat_message("c1", "hi").unwrap();
    conn.recv_kind("message:send").await;

    conn.send_json(json!({"type": "user:banned", "data": {"reason": "abuse"}}));
    tokio::time::timeout(WAIT, manager.closed()).await.expect("terminated");

    let b = &banned;
    eventually("ban delivered", || async move { b.load(Ordering::SeqCst) == 1 }).await;
    assert!(store.raw().is_none());
    assert!(!token_file.exists());
    assert!(matches!(manager.send_chat_message("c1", "again"), Err(RealtimeError::Closed)));
    assert!(server.try_accept(Duration::from_millis(300)).await.is_none());
}
