//! WebSocket driver for a [`SyncEngine`].
//!
//! Provides:
//! - Connection lifecycle (connect, clean shutdown, bounded reconnect)
//! - Frame pump between the socket and the engine
//! - A command channel for local edits and an event channel for the UI
//!
//! Everything runs on one task: socket frames, local commands and reconnect
//! timers are handled one at a time to completion, so the engine needs no
//! locking.

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Duration;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::config::ClientConfig;
use crate::connection::CloseOutcome;
use crate::engine::{SyncEngine, SyncEvent};
use crate::surface::{DeltaOp, EditSurface, Source};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Requests from the application to the client task.
#[derive(Debug)]
pub enum ClientCommand {
    /// Apply a user edit to the owned surface and broadcast it, unless it
    /// touches a locked line.
    Edit(Vec<DeltaOp>),
    /// The surface already changed itself; broadcast if `source` is the user.
    SurfaceChanged { delta: Vec<DeltaOp>, source: Source },
    /// The local caret moved.
    Selection(Option<usize>),
    /// Read back the current document text.
    Snapshot(oneshot::Sender<String>),
    Shutdown,
}

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("client task has stopped")]
    Shutdown,
    #[error("unable to reconnect after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
    #[error("transport error: {0}")]
    Transport(#[from] tungstenite::Error),
}

/// Cloneable sender half for talking to a running [`SyncClient`].
#[derive(Debug, Clone)]
pub struct ClientHandle {
    commands: mpsc::Sender<ClientCommand>,
}

impl ClientHandle {
    pub async fn edit(&self, delta: Vec<DeltaOp>) -> Result<(), ClientError> {
        self.send(ClientCommand::Edit(delta)).await
    }

    pub async fn surface_changed(&self, delta: Vec<DeltaOp>, source: Source) -> Result<(), ClientError> {
        self.send(ClientCommand::SurfaceChanged { delta, source }).await
    }

    pub async fn move_cursor(&self, index: Option<usize>) -> Result<(), ClientError> {
        self.send(ClientCommand::Selection(index)).await
    }

    /// Current document text as the client sees it.
    pub async fn document(&self) -> Result<String, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.send(ClientCommand::Snapshot(reply)).await?;
        rx.await.map_err(|_| ClientError::Shutdown)
    }

    pub async fn shutdown(&self) -> Result<(), ClientError> {
        self.send(ClientCommand::Shutdown).await
    }

    async fn send(&self, command: ClientCommand) -> Result<(), ClientError> {
        self.commands.send(command).await.map_err(|_| ClientError::Shutdown)
    }
}

enum SessionEnd {
    Closed { clean: bool },
    Shutdown,
}

/// The sync client.
///
/// Owns the engine (and through it the surface) for the lifetime of
/// [`SyncClient::run`].
pub struct SyncClient<S> {
    server_url: String,
    engine: SyncEngine<S>,
    command_tx: mpsc::Sender<ClientCommand>,
    command_rx: mpsc::Receiver<ClientCommand>,
    event_tx: mpsc::Sender<SyncEvent>,
    event_rx: Option<mpsc::Receiver<SyncEvent>>,
}

impl<S: EditSurface> SyncClient<S> {
    pub fn new(config: ClientConfig, surface: S) -> Self {
        let (command_tx, command_rx) = mpsc::channel(config.command_capacity);
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity);
        let engine = SyncEngine::new(config.client_name.clone(), surface, config.reconnect_policy());
        Self {
            server_url: config.server_url,
            engine,
            command_tx,
            command_rx,
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    pub fn handle(&self) -> ClientHandle {
        ClientHandle { commands: self.command_tx.clone() }
    }

    /// Take the event receiver (can only be called once). Events are
    /// discarded until it is taken.
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    pub fn engine(&self) -> &SyncEngine<S> {
        &self.engine
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Connect and serve until shutdown, a clean close, or reconnection
    /// exhaustion. Returns the engine so the final state can be inspected.
    pub async fn run(mut self) -> Result<SyncEngine<S>, ClientError> {
        loop {
            self.engine.connect();
            log::info!("Connecting to {}", self.server_url);

            let end = match tokio_tungstenite::connect_async(self.server_url.as_str()).await {
                Ok((ws, _)) => self.drive(ws).await,
                Err(e) => {
                    self.engine.on_transport_error(e.to_string());
                    SessionEnd::Closed { clean: false }
                }
            };

            let clean = match end {
                SessionEnd::Shutdown => {
                    self.forward_events().await;
                    return Ok(self.engine);
                }
                SessionEnd::Closed { clean } => clean,
            };

            let outcome = self.engine.on_transport_close(clean);
            self.forward_events().await;

            match outcome {
                CloseOutcome::Closed => return Ok(self.engine),
                CloseOutcome::GaveUp { attempts } => {
                    return Err(ClientError::ReconnectExhausted { attempts })
                }
                CloseOutcome::Reconnect { attempt, delay } => {
                    log::info!("Reconnection attempt {attempt} in {delay:?}");
                    if !self.wait(delay).await {
                        return Ok(self.engine);
                    }
                }
            }
        }
    }

    /// Pump one open socket until it closes or shutdown is requested.
    async fn drive(&mut self, ws: WsStream) -> SessionEnd {
        let (mut writer, mut reader) = ws.split();
        self.engine.on_transport_open();

        loop {
            if let Err(e) = self.flush(&mut writer).await {
                self.engine.on_transport_error(e.to_string());
                return SessionEnd::Closed { clean: false };
            }
            self.forward_events().await;

            tokio::select! {
                frame = reader.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.engine.on_transport_message(text.as_str()),
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => self.engine.on_transport_message(text),
                        Err(_) => log::warn!("Ignoring non UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        log::debug!("Close frame received: {frame:?}");
                        return SessionEnd::Closed { clean: true };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        self.engine.on_transport_error(e.to_string());
                        return SessionEnd::Closed { clean: false };
                    }
                    None => return SessionEnd::Closed { clean: false },
                },
                command = self.command_rx.recv() => {
                    let keep_going = command.is_some_and(|c| self.handle_command(c));
                    if !keep_going {
                        self.engine.close();
                        if let Err(e) = writer.send(Message::Close(None)).await {
                            log::debug!("Close frame not delivered: {e}");
                        }
                        self.engine.on_transport_close(true);
                        return SessionEnd::Shutdown;
                    }
                }
            }
        }
    }

    /// Sleep out a reconnect delay while still serving local commands.
    /// Returns `false` if shutdown was requested.
    async fn wait(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                command = self.command_rx.recv() => {
                    if !command.is_some_and(|c| self.handle_command(c)) {
                        return false;
                    }
                    self.forward_events().await;
                }
            }
        }
    }

    /// Returns `false` for [`ClientCommand::Shutdown`].
    fn handle_command(&mut self, command: ClientCommand) -> bool {
        match command {
            ClientCommand::Edit(delta) => {
                // Refusals surface as a notice event.
                let _ = self.engine.local_edit(&delta);
            }
            ClientCommand::SurfaceChanged { delta, source } => {
                self.engine.on_local_change(&delta, source)
            }
            ClientCommand::Selection(index) => self.engine.on_selection_change(index),
            ClientCommand::Snapshot(reply) => {
                let _ = reply.send(self.engine.surface().text());
            }
            ClientCommand::Shutdown => return false,
        }
        true
    }

    async fn flush(&mut self, writer: &mut SplitSink<WsStream, Message>) -> Result<(), ClientError> {
        for frame in self.engine.drain_outgoing() {
            writer.send(Message::text(frame)).await?;
        }
        Ok(())
    }

    async fn forward_events(&mut self) {
        let events = self.engine.drain_events();
        if self.event_rx.is_some() {
            return;
        }
        for event in events {
            if self.event_tx.send(event).await.is_err() {
                break;
            }
        }
    }
}
