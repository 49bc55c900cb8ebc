//! Integration tests for end-to-end WebSocket collaboration.
//!
//! These tests start an in-process relay and connect real clients,
//! verifying the full sync pipeline.

mod common;

use common::{next_matching, TestRelay};
use cowrite_sync::{
    Applied, ClientConfig, ClientError, ClientHandle, ConnectionState, DeltaOp, EditSurface, Notice,
    SyncClient, SyncEngine, SyncEvent, TextBuffer,
};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

type RunResult = Result<SyncEngine<TextBuffer>, ClientError>;

struct Participant {
    handle: ClientHandle,
    events: mpsc::Receiver<SyncEvent>,
    task: JoinHandle<RunResult>,
}

impl Participant {
    async fn join(relay: &TestRelay, name: &str) -> Self {
        let config = ClientConfig::new(relay.url.clone(), name)
            .with_reconnect(Duration::from_millis(50), 3);
        let mut client = SyncClient::new(config, TextBuffer::new());
        let mut events = client.take_event_rx().unwrap();
        let handle = client.handle();
        let task = tokio::spawn(client.run());

        next_matching(&mut events, |e| *e == SyncEvent::Connected).await;
        next_matching(&mut events, |e| matches!(e, SyncEvent::DocumentReplaced { .. })).await;
        Self { handle, events, task }
    }

    async fn expect(&mut self, pred: impl FnMut(&SyncEvent) -> bool) -> SyncEvent {
        next_matching(&mut self.events, pred).await
    }

    async fn finish(self) -> RunResult {
        timeout(Duration::from_secs(5), self.task)
            .await
            .expect("client task did not stop")
            .expect("client task panicked")
    }
}

#[tokio::test]
async fn test_join_receives_document() {
    let relay = TestRelay::start("shared notes").await;
    let alice = Participant::join(&relay, "alice").await;

    assert_eq!(alice.handle.document().await.unwrap(), "shared notes");
    let join = relay.wait_for("NEWCLIENT").await;
    assert_eq!(join["clientName"], "alice");
}

#[tokio::test]
async fn test_two_participants_share_edits() {
    let relay = TestRelay::start("hello").await;
    let mut alice = Participant::join(&relay, "alice").await;
    relay.wait_for_clients(1).await;
    let mut bob = Participant::join(&relay, "bob").await;

    // Each side learns about the other.
    bob.expect(|e| matches!(e, SyncEvent::RosterChanged(r) if r.len() == 1 && r[0].name == "alice"))
        .await;
    alice
        .expect(|e| matches!(e, SyncEvent::RosterChanged(r) if r.len() == 1 && r[0].name == "bob"))
        .await;

    alice
        .handle
        .edit(vec![DeltaOp::retain(5), DeltaOp::insert(" world")])
        .await
        .unwrap();
    bob.expect(|e| *e == SyncEvent::RemoteEdit(Applied::Inserted { at: 5, len: 6 }))
        .await;
    assert_eq!(bob.handle.document().await.unwrap(), "hello world");
    assert_eq!(relay.document().await, "hello world");

    bob.handle.edit(vec![DeltaOp::delete(6)]).await.unwrap();
    alice
        .expect(|e| *e == SyncEvent::RemoteEdit(Applied::Deleted { from: 0, len: 6 }))
        .await;
    assert_eq!(alice.handle.document().await.unwrap(), "world");

    for participant in [alice, bob] {
        participant.handle.shutdown().await.unwrap();
        let engine = participant.finish().await.unwrap();
        assert_eq!(engine.connection_state(), ConnectionState::Disconnected);
        assert_eq!(engine.surface().text(), "world");
    }
}

#[tokio::test]
async fn test_cursor_moves_reach_peers() {
    let relay = TestRelay::start("line one\nline two").await;
    let alice = Participant::join(&relay, "alice").await;
    relay.wait_for_clients(1).await;
    let mut bob = Participant::join(&relay, "bob").await;

    alice.handle.move_cursor(Some(12)).await.unwrap();
    let event = bob
        .expect(|e| matches!(e, SyncEvent::CursorMoved { .. }))
        .await;

    match event {
        SyncEvent::CursorMoved { name, index, line, .. } => {
            assert_eq!(name, "alice");
            assert_eq!(index, Some(12));
            assert_eq!(line, Some(1));
        }
        other => panic!("Expected CursorMoved, got {other:?}"),
    }
}

#[tokio::test]
async fn test_ping_is_answered_with_pong() {
    let relay = TestRelay::start("").await;
    let _alice = Participant::join(&relay, "alice").await;
    relay.wait_for_clients(1).await;

    relay.broadcast(json!({"command": "PING"})).await;
    let pong = relay.wait_for("PONG").await;
    assert_eq!(pong, json!({"command": "PONG"}));
}

#[tokio::test]
async fn test_server_error_is_surfaced() {
    let relay = TestRelay::start("").await;
    let mut alice = Participant::join(&relay, "alice").await;
    relay.wait_for_clients(1).await;

    relay
        .send_to("alice", json!({"command": "ERROR", "message": "document is read-only"}))
        .await;
    alice
        .expect(|e| *e == SyncEvent::Notice(Notice::ServerError("document is read-only".into())))
        .await;
}

#[tokio::test]
async fn test_divergence_recovers_from_snapshot() {
    let relay = TestRelay::start("hello").await;
    let mut alice = Participant::join(&relay, "alice").await;
    relay.wait_for_clients(1).await;

    relay
        .send_to(
            "alice",
            json!({"command": "REMOVE", "clientName": "ghost", "startIndex": 2, "endIndex": 10}),
        )
        .await;

    alice.expect(|e| *e == SyncEvent::ResyncRequested).await;
    alice
        .expect(|e| *e == SyncEvent::DocumentReplaced { content: "hello".into() })
        .await;

    let requests = relay.received("REQUEST_DOCUMENT").await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["clientName"], "alice");
    assert_eq!(alice.handle.document().await.unwrap(), "hello");
}

#[tokio::test]
async fn test_clean_close_does_not_reconnect() {
    let relay = TestRelay::start("").await;
    let mut alice = Participant::join(&relay, "alice").await;
    relay.wait_for_clients(1).await;

    relay.close_cleanly("alice").await;
    alice
        .expect(|e| *e == SyncEvent::Notice(Notice::ConnectionClosed))
        .await;

    let handle = alice.handle.clone();
    let engine = alice.finish().await.unwrap();
    assert_eq!(engine.connection_state(), ConnectionState::Disconnected);
    assert_eq!(relay.received("NEWCLIENT").await.len(), 1);
    assert!(matches!(handle.document().await, Err(ClientError::Shutdown)));
}

#[tokio::test]
async fn test_dropped_connection_reconnects_and_rejoins() {
    let relay = TestRelay::start("draft").await;
    let mut alice = Participant::join(&relay, "alice").await;
    relay.wait_for_clients(1).await;

    relay.kill("alice").await;
    alice.expect(|e| *e == SyncEvent::Disconnected).await;
    alice
        .expect(|e| matches!(e, SyncEvent::Notice(Notice::Reconnecting { attempt: 1, max_attempts: 3 })))
        .await;
    alice.expect(|e| *e == SyncEvent::Connected).await;
    alice
        .expect(|e| *e == SyncEvent::DocumentReplaced { content: "draft".into() })
        .await;
    assert_eq!(relay.received("NEWCLIENT").await.len(), 2);

    alice
        .handle
        .edit(vec![DeltaOp::retain(5), DeltaOp::insert("!")])
        .await
        .unwrap();
    let add = relay.wait_for("ADD").await;
    assert_eq!(add["startIndex"], 5);
    assert_eq!(relay.document().await, "draft!");
}

#[tokio::test]
async fn test_reconnect_gives_up_after_max_attempts() {
    let relay = TestRelay::start("").await;
    let mut alice = Participant::join(&relay, "alice").await;
    relay.wait_for_clients(1).await;

    relay.shutdown().await;

    let mut attempts = Vec::new();
    loop {
        match alice.expect(|e| matches!(e, SyncEvent::Notice(_))).await {
            SyncEvent::Notice(Notice::Reconnecting { attempt, .. }) => attempts.push(attempt),
            SyncEvent::Notice(Notice::ReconnectFailed { attempts: total }) => {
                assert_eq!(total, 3);
                break;
            }
            _ => {}
        }
    }
    assert_eq!(attempts, vec![1, 2, 3]);

    let result = alice.finish().await;
    assert!(matches!(result, Err(ClientError::ReconnectExhausted { attempts: 3 })));
}
