//! In-process relay used by the end-to-end tests.
//!
//! Mirrors the behavior the client relies on: a join is answered with the
//! document and the roster of other participants, edits are applied to the
//! canonical document and fanned out to everyone except the sender, and
//! `REQUEST_DOCUMENT` is answered with a fresh snapshot.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use cowrite_sync::SyncEvent;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::AbortHandle;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;

#[derive(Default)]
struct RelayState {
    document: String,
    clients: HashMap<String, mpsc::UnboundedSender<Message>>,
    connection_of: HashMap<String, u64>,
    connections: HashMap<u64, AbortHandle>,
    received: Vec<Value>,
}

impl RelayState {
    fn broadcast_except(&self, sender: &str, value: &Value) {
        for (name, tx) in &self.clients {
            if name != sender {
                let _ = tx.send(Message::text(value.to_string()));
            }
        }
    }
}

pub struct TestRelay {
    pub url: String,
    state: Arc<Mutex<RelayState>>,
    accept: AbortHandle,
}

impl TestRelay {
    pub async fn start(document: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(Mutex::new(RelayState {
            document: document.to_owned(),
            ..RelayState::default()
        }));

        let accept_state = state.clone();
        let accept = tokio::spawn(async move {
            let mut next_id = 0u64;
            while let Ok((stream, _)) = listener.accept().await {
                let id = next_id;
                next_id += 1;
                let task = tokio::spawn(serve(stream, id, accept_state.clone()));
                accept_state.lock().await.connections.insert(id, task.abort_handle());
            }
        })
        .abort_handle();

        Self {
            url: format!("ws://127.0.0.1:{port}/ws"),
            state,
            accept,
        }
    }

    pub async fn document(&self) -> String {
        self.state.lock().await.document.clone()
    }

    /// Send a raw frame to every joined client.
    pub async fn broadcast(&self, frame: Value) {
        self.state.lock().await.broadcast_except("", &frame);
    }

    pub async fn send_to(&self, name: &str, frame: Value) {
        if let Some(tx) = self.state.lock().await.clients.get(name) {
            let _ = tx.send(Message::text(frame.to_string()));
        }
    }

    /// Close a client's socket with a proper close handshake.
    pub async fn close_cleanly(&self, name: &str) {
        if let Some(tx) = self.state.lock().await.clients.get(name) {
            let _ = tx.send(Message::Close(None));
        }
    }

    /// Drop a client's socket without a close handshake.
    pub async fn kill(&self, name: &str) {
        let state = self.state.lock().await;
        if let Some(handle) = state.connection_of.get(name).and_then(|id| state.connections.get(id)) {
            handle.abort();
        }
    }

    /// Stop accepting and drop every connection.
    pub async fn shutdown(&self) {
        self.accept.abort();
        for handle in self.state.lock().await.connections.values() {
            handle.abort();
        }
    }

    /// Frames received with the given command, oldest first.
    pub async fn received(&self, command: &str) -> Vec<Value> {
        self.state
            .lock()
            .await
            .received
            .iter()
            .filter(|v| v["command"] == command)
            .cloned()
            .collect()
    }

    /// Poll until at least one frame with `command` arrived.
    pub async fn wait_for(&self, command: &str) -> Value {
        for _ in 0..200 {
            if let Some(v) = self.received(command).await.into_iter().next_back() {
                return v;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("relay never received {command}");
    }

    pub async fn wait_for_clients(&self, count: usize) {
        for _ in 0..200 {
            if self.state.lock().await.clients.len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("fewer than {count} clients joined");
    }
}

async fn serve(stream: TcpStream, id: u64, state: Arc<Mutex<RelayState>>) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut writer, mut reader) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let mut name = String::new();

    loop {
        tokio::select! {
            outgoing = rx.recv() => {
                let Some(msg) = outgoing else { break };
                let closing = matches!(msg, Message::Close(_));
                if writer.send(msg).await.is_err() || closing {
                    break;
                }
            }
            incoming = reader.next() => {
                let Some(Ok(Message::Text(text))) = incoming else { break };
                let Ok(value) = serde_json::from_str::<Value>(text.as_str()) else { continue };
                handle_frame(&state, id, &tx, &mut name, value).await;
            }
        }
    }

    state.lock().await.clients.remove(&name);
}

async fn handle_frame(
    state: &Mutex<RelayState>,
    id: u64,
    tx: &mpsc::UnboundedSender<Message>,
    name: &mut String,
    value: Value,
) {
    let mut st = state.lock().await;
    st.received.push(value.clone());

    let sender = value["clientName"].as_str().unwrap_or_default().to_owned();
    match value["command"].as_str().unwrap_or_default() {
        "NEWCLIENT" => {
            let others: Vec<String> = st.clients.keys().cloned().collect();
            let _ = tx.send(Message::text(json!({"command": "DOCUMENT", "content": st.document}).to_string()));
            let _ = tx.send(Message::text(json!({"command": "CLIENTS_LIST", "clientList": others}).to_string()));
            st.broadcast_except(&sender, &value);
            st.clients.insert(sender.clone(), tx.clone());
            st.connection_of.insert(sender.clone(), id);
            *name = sender;
        }
        "ADD" => {
            let at = value["startIndex"].as_u64().unwrap_or(0) as usize;
            let content = value["content"].as_str().unwrap_or_default();
            let mut chars: Vec<char> = st.document.chars().collect();
            if at <= chars.len() && !content.is_empty() {
                chars.splice(at..at, content.chars());
                st.document = chars.into_iter().collect();
                st.broadcast_except(&sender, &value);
            }
        }
        "REMOVE" => {
            let from = value["startIndex"].as_u64().unwrap_or(0) as usize;
            let to = value["endIndex"].as_u64().unwrap_or(0) as usize;
            let mut chars: Vec<char> = st.document.chars().collect();
            if from <= to && to <= chars.len() {
                chars.drain(from..to);
                st.document = chars.into_iter().collect();
                st.broadcast_except(&sender, &value);
            }
        }
        "CURSOR_MOVE" => st.broadcast_except(&sender, &value),
        "REQUEST_DOCUMENT" => {
            let _ = tx.send(Message::text(json!({"command": "DOCUMENT", "content": st.document}).to_string()));
        }
        _ => {}
    }
}

/// Receive events until one matches, failing after five seconds.
pub async fn next_matching<F>(events: &mut mpsc::Receiver<SyncEvent>, mut pred: F) -> SyncEvent
where
    F: FnMut(&SyncEvent) -> bool,
{
    let deadline = Duration::from_secs(5);
    loop {
        match timeout(deadline, events.recv()).await {
            Ok(Some(event)) if pred(&event) => return event,
            Ok(Some(_)) => continue,
            Ok(None) => panic!("event channel closed"),
            Err(_) => panic!("timed out waiting for event"),
        }
    }
}
