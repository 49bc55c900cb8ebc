//! # cowrite-sync: real-time collaborative editing client
//!
//! Translates between an editable text surface and the position-addressed
//! operation stream of a CoWrite relay.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   change delta    ┌──────────────┐   JSON frames   ┌─────────┐
//! │ EditSurface  │ ────────────────► │  SyncEngine  │ ◄─────────────► │  Relay  │
//! │ (widget)     │ ◄──────────────── │              │   WebSocket     │         │
//! └──────────────┘  insert/delete    └──────┬───────┘                 └─────────┘
//!                   (Source::Api)           │
//!                      ┌───────────┬────────┴────┬──────────────┐
//!                      ▼           ▼             ▼              ▼
//!                   codec      presence     connection       resync
//! ```
//!
//! There is no operational transform: edits carry plain indices, the relay
//! owns the canonical document, and any index that does not fit locally
//! triggers a full snapshot request.
//!
//! ## Modules
//!
//! - [`protocol`]: Wire operations and JSON framing
//! - [`surface`]: Editing-surface trait, change primitives, in-memory buffer
//! - [`codec`]: Delta → operations, operations → surface
//! - [`presence`]: Participant roster and colors
//! - [`connection`]: Connection state machine and reconnect policy
//! - [`resync`]: Snapshot recovery after divergence
//! - [`engine`]: Message dispatch and session state
//! - [`config`]: Client settings
//! - [`client`]: tokio-tungstenite driver

pub mod protocol;
pub mod surface;
pub mod codec;
pub mod presence;
pub mod connection;
pub mod resync;
pub mod engine;
pub mod config;
pub mod client;

// Re-exports for convenience
pub use protocol::{decode_frame, ProtocolError, WireOp};
pub use surface::{logical_length, line_of, CursorMarker, DeltaOp, EditSurface, Source, TextBuffer};
pub use codec::{Applied, Divergence, DocumentShadow};
pub use presence::{CursorColor, Participant, PresenceTracker, RosterEntry, PALETTE};
pub use connection::{CloseOutcome, ConnectionManager, ConnectionState, ReconnectPolicy};
pub use resync::ResyncController;
pub use engine::{LineLocked, Notice, SyncEngine, SyncEvent};
pub use config::ClientConfig;
pub use client::{ClientCommand, ClientError, ClientHandle, SyncClient};
