//! The synchronization engine.
//!
//! [`SyncEngine`] owns all session state (surface, shadow, roster, connection
//! and resync bookkeeping) and is driven through a handful of entry points:
//!
//! ```text
//! local edit ──► on_local_change / local_edit ──► codec::encode ──► outbox
//! selection  ──► on_selection_change ─────────────────────────────► outbox
//! frame      ──► on_transport_message ──► dispatch ──┬─► codec::apply ──► surface
//!                                                    ├─► presence ──► events
//!                                                    └─► resync ──► outbox
//! open/error/close ──► on_transport_* ──► connection ──► events
//! ```
//!
//! It never blocks and does no I/O: the driver flushes [`SyncEngine::drain_outgoing`]
//! to the transport and forwards [`SyncEngine::drain_events`] to the
//! application after each call.
//!
//! Line locks: a line holding another participant's caret is locked against
//! local edits. [`SyncEngine::local_edit`] refuses deltas that touch one, and
//! widgets that mutate themselves should consult [`SyncEngine::check_edit`]
//! before committing.
//!
//! Self-echo: `NEWCLIENT` and `CURSOR_MOVE` naming the local participant are
//! dropped. `ADD`/`REMOVE` are applied whatever their origin; the relay must
//! never echo a participant's own edits back to it.

use std::collections::VecDeque;
use std::fmt;

use thiserror::Error;

use crate::codec::{self, Applied, DocumentShadow};
use crate::connection::{CloseOutcome, ConnectionManager, ConnectionState, ReconnectPolicy};
use crate::presence::{CursorColor, PresenceTracker, RosterEntry};
use crate::protocol::{decode_frame, ProtocolError, WireOp};
use crate::resync::ResyncController;
use crate::surface::{apply_delta, line_of, DeltaOp, EditSurface, Source};

/// User-visible status message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    ConnectionClosed,
    ConnectionLost,
    Reconnecting { attempt: u32, max_attempts: u32 },
    /// Terminal: the client must be restarted by hand.
    ReconnectFailed { attempts: u32 },
    TransportError(String),
    ServerError(String),
    /// A local edit was refused.
    LineLocked(LineLocked),
}

impl Notice {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Notice::ReconnectFailed { .. })
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionClosed => write!(f, "Connection closed."),
            Self::ConnectionLost => {
                write!(f, "Connection closed unexpectedly. Attempting to reconnect...")
            }
            Self::Reconnecting { attempt, max_attempts } => {
                write!(f, "Reconnection attempt {attempt} of {max_attempts}")
            }
            Self::ReconnectFailed { attempts } => write!(
                f,
                "Unable to reconnect to the server after {attempts} attempts. Please restart the client."
            ),
            Self::TransportError(e) => write!(f, "Connection error: {e}"),
            Self::ServerError(m) => write!(f, "Server error: {m}"),
            Self::LineLocked(locked) => write!(
                f,
                "Line {} is being edited by {}.",
                locked.line + 1,
                locked.holder
            ),
        }
    }
}

/// A local edit touched a line holding another participant's caret.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line} is locked by {holder}")]
pub struct LineLocked {
    /// 0-based line index.
    pub line: usize,
    pub holder: String,
}

/// Events emitted by the engine for the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Transport open and join sent; the editor may be shown.
    Connected,
    /// An open connection went away.
    Disconnected,
    /// A snapshot replaced the whole document.
    DocumentReplaced { content: String },
    /// A remote insert or delete was applied.
    RemoteEdit(Applied),
    /// The legend needs redrawing.
    RosterChanged(Vec<RosterEntry>),
    /// A remote caret moved.
    CursorMoved {
        name: String,
        color: CursorColor,
        index: Option<usize>,
        line: Option<usize>,
    },
    /// Divergence detected; a snapshot was requested.
    ResyncRequested,
    Notice(Notice),
}

/// Session state for one participant.
pub struct SyncEngine<S> {
    client_name: String,
    surface: S,
    shadow: DocumentShadow,
    presence: PresenceTracker,
    connection: ConnectionManager,
    resync: ResyncController,
    events: VecDeque<SyncEvent>,
}

impl<S: EditSurface> SyncEngine<S> {
    pub fn new(client_name: impl Into<String>, surface: S, policy: ReconnectPolicy) -> Self {
        let client_name = client_name.into();
        let mut shadow = DocumentShadow::default();
        shadow.refresh(&surface);
        Self {
            presence: PresenceTracker::new(client_name.clone()),
            client_name,
            surface,
            shadow,
            connection: ConnectionManager::new(policy),
            resync: ResyncController::new(),
            events: VecDeque::new(),
        }
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn shadow(&self) -> &DocumentShadow {
        &self.shadow
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn resync(&self) -> &ResyncController {
        &self.resync
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        self.connection.policy()
    }

    pub fn into_surface(self) -> S {
        self.surface
    }

    // ── Transport lifecycle ─────────────────────────────────────

    /// Begin a connection attempt. `false` if one is already underway.
    pub fn connect(&mut self) -> bool {
        self.connection.connect()
    }

    /// The transport opened: announce ourselves.
    pub fn on_transport_open(&mut self) {
        log::info!("Connection opened as {}", self.client_name);
        self.connection.on_open();
        self.resync.reset();
        self.send(WireOp::join(self.client_name.clone()));
        self.events.push_back(SyncEvent::Connected);
    }

    /// The transport reported an error. Reconnection is left to the close
    /// that follows.
    pub fn on_transport_error(&mut self, error: impl Into<String>) {
        let error = error.into();
        log::error!("Connection error: {error}");
        self.events.push_back(SyncEvent::Notice(Notice::TransportError(error)));
    }

    /// Start a locally requested close.
    pub fn close(&mut self) {
        self.connection.close();
    }

    /// The transport closed. The outcome tells the driver whether to retry.
    pub fn on_transport_close(&mut self, clean: bool) -> CloseOutcome {
        let was_open = matches!(
            self.connection.state(),
            ConnectionState::Open | ConnectionState::ClosingClean
        );
        let outcome = self.connection.on_close(clean);
        if was_open {
            self.events.push_back(SyncEvent::Disconnected);
        }

        match outcome {
            CloseOutcome::Closed => {
                log::info!("Connection closed");
                self.events.push_back(SyncEvent::Notice(Notice::ConnectionClosed));
            }
            CloseOutcome::Reconnect { attempt, delay } => {
                let max_attempts = self.connection.policy().max_attempts;
                log::error!(
                    "Connection closed unexpectedly, reconnection attempt {attempt}/{max_attempts} in {delay:?}"
                );
                self.events.push_back(SyncEvent::Notice(Notice::ConnectionLost));
                self.events
                    .push_back(SyncEvent::Notice(Notice::Reconnecting { attempt, max_attempts }));
            }
            CloseOutcome::GaveUp { attempts } => {
                log::error!("Unable to reconnect after {attempts} attempts");
                self.events
                    .push_back(SyncEvent::Notice(Notice::ReconnectFailed { attempts }));
            }
        }
        outcome
    }

    /// Handle one inbound frame (a single operation or a batch).
    pub fn on_transport_message(&mut self, frame: &str) {
        log::trace!("Message from server: {frame}");

        let ops = match decode_frame(frame) {
            Ok(ops) => ops,
            Err(e) => {
                log::error!("Error parsing message from server: {e}");
                return;
            }
        };

        for op in ops {
            match op {
                Ok(op) => self.dispatch(op),
                Err(ProtocolError::UnknownCommand(command)) => {
                    log::info!("Unknown command: {command}");
                }
                Err(e) => log::warn!("Invalid message received: {e}"),
            }
        }
    }

    // ── Local surface events ────────────────────────────────────

    /// The surface changed. User changes are broadcast; programmatic
    /// ones only refresh the shadow.
    pub fn on_local_change(&mut self, delta: &[DeltaOp], source: Source) {
        if source == Source::User {
            for op in codec::encode(&self.client_name, delta) {
                self.send(op);
            }
        }
        self.shadow.refresh(&self.surface);
    }

    /// Apply a user edit to the surface and broadcast it.
    ///
    /// For surfaces that cannot mutate themselves, such as [`crate::TextBuffer`].
    /// Edits touching a locked line are refused whole and leave a notice.
    pub fn local_edit(&mut self, delta: &[DeltaOp]) -> Result<(), LineLocked> {
        if let Err(locked) = self.check_edit(delta) {
            log::warn!("Rejected local edit: {locked}");
            self.events
                .push_back(SyncEvent::Notice(Notice::LineLocked(locked.clone())));
            return Err(locked);
        }
        apply_delta(&mut self.surface, delta, Source::User);
        self.on_local_change(delta, Source::User);
        Ok(())
    }

    /// Check a user delta against line locks without applying it.
    ///
    /// An insert touches the line it lands on; a delete touches every line
    /// from its first character through the one after its last.
    pub fn check_edit(&self, delta: &[DeltaOp]) -> Result<(), LineLocked> {
        let locked = self.locked_lines();
        if locked.is_empty() {
            return Ok(());
        }

        let text = self.shadow.as_str();
        let mut pos = 0;
        for op in delta {
            let lines = match op {
                DeltaOp::Retain(n) => {
                    pos += n;
                    continue;
                }
                DeltaOp::Insert(_) => {
                    let line = line_of(text, pos);
                    line..=line
                }
                DeltaOp::Delete(_) => {
                    let Some(n) = op.delete_len() else {
                        continue;
                    };
                    let span = line_of(text, pos)..=line_of(text, pos + n);
                    pos += n;
                    span
                }
            };
            if let Some((line, holder)) = locked.iter().find(|(line, _)| lines.contains(line)) {
                return Err(LineLocked { line: *line, holder: (*holder).to_owned() });
            }
        }
        Ok(())
    }

    /// Lines currently holding another participant's caret, with the holder.
    pub fn locked_lines(&self) -> Vec<(usize, &str)> {
        self.presence
            .participants()
            .iter()
            .filter_map(|p| {
                p.cursor
                    .map(|index| (line_of(self.shadow.as_str(), index), p.name.as_str()))
            })
            .collect()
    }

    /// The local caret moved. `None` means the surface lost focus.
    pub fn on_selection_change(&mut self, index: Option<usize>) {
        let Some(index) = index else {
            return;
        };
        self.send(WireOp::cursor_move(self.client_name.clone(), index));
    }

    // ── Draining ────────────────────────────────────────────────

    /// Encoded frames to write to the transport, in order.
    pub fn drain_outgoing(&mut self) -> Vec<String> {
        self.connection.take_outgoing()
    }

    pub fn drain_events(&mut self) -> Vec<SyncEvent> {
        self.events.drain(..).collect()
    }

    // ── Dispatch ────────────────────────────────────────────────

    fn dispatch(&mut self, op: WireOp) {
        log::debug!("{} received", op.command());

        match op {
            WireOp::Join { client_name } => {
                if client_name != self.client_name && self.presence.register(&client_name) {
                    self.roster_changed();
                }
            }
            WireOp::DocumentSnapshot { content } => {
                self.surface.set_text(&content);
                self.shadow.refresh(&self.surface);
                self.surface.set_selection(0, 0);
                self.resync.on_snapshot();
                self.events.push_back(SyncEvent::DocumentReplaced { content });
            }
            WireOp::RosterSnapshot { client_list } => {
                for name in client_list.iter().filter(|n| **n != self.client_name) {
                    self.presence.register(name);
                }
                self.roster_changed();
            }
            op @ (WireOp::Insert { .. } | WireOp::Delete { .. }) => {
                match codec::apply(&op, &mut self.surface, &mut self.shadow) {
                    Ok(applied) => self.events.push_back(SyncEvent::RemoteEdit(applied)),
                    Err(divergence) => {
                        if let Some(request) = self.resync.on_divergence(&self.client_name, &divergence) {
                            self.send(request);
                            self.events.push_back(SyncEvent::ResyncRequested);
                        }
                    }
                }
            }
            WireOp::CursorMove { client_name, cursor_location } => {
                if client_name != self.client_name {
                    self.move_remote_cursor(client_name, cursor_location);
                }
            }
            WireOp::KeepAliveProbe => self.send(WireOp::KeepAliveAck),
            WireOp::KeepAliveAck => log::trace!("Keep-alive acknowledged"),
            WireOp::Error { message } => {
                log::error!("Server error: {message}");
                self.events.push_back(SyncEvent::Notice(Notice::ServerError(message)));
            }
            WireOp::ResyncRequest { client_name } => {
                log::debug!("Ignoring REQUEST_DOCUMENT from {client_name}");
            }
        }
    }

    fn move_remote_cursor(&mut self, name: String, index: i64) {
        let known = self.presence.get(&name).is_some();
        let Some(participant) = self.presence.update_cursor(&name, index) else {
            return;
        };
        let color = participant.color.clone();
        let cursor = participant.cursor;

        let line = cursor.map(|index| {
            self.surface.place_cursor(&name, &color, index);
            line_of(self.shadow.as_str(), index)
        });

        if !known {
            self.roster_changed();
        }
        self.events.push_back(SyncEvent::CursorMoved { name, color, index: cursor, line });
    }

    fn roster_changed(&mut self) {
        self.events.push_back(SyncEvent::RosterChanged(self.presence.roster()));
    }

    fn send(&mut self, op: WireOp) {
        // Failures are logged by the connection manager and never fatal.
        let _ = self.connection.send(&op);
    }
}
