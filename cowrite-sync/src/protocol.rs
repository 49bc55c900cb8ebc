//! JSON wire protocol spoken with the relay.
//!
//! Every frame is one JSON object tagged by its `command` field:
//! ```text
//! {"command":"ADD","clientName":"alice","startIndex":5,"content":" world"}
//! {"command":"REMOVE","clientName":"alice","startIndex":2,"endIndex":4}
//! {"command":"CURSOR_MOVE","clientName":"alice","cursorLocation":7}
//! ```
//!
//! Inbound frames may also carry a JSON array of such objects; the array is
//! dispatched in order. The relay elides zero-valued fields, so absent
//! indices decode as `0`, absent strings as `""` and absent lists as `[]`.
//!
//! Indices are `i64` on the wire so that negative values sent by a confused
//! peer reach the range checks in [`crate::codec::apply`] instead of failing
//! to decode.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// One operation on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all_fields = "camelCase")]
pub enum WireOp {
    /// Join announcement for a participant.
    #[serde(rename = "NEWCLIENT")]
    Join { client_name: String },

    /// Full document snapshot from the relay.
    #[serde(rename = "DOCUMENT")]
    DocumentSnapshot {
        #[serde(default)]
        content: String,
    },

    /// Names of the participants already in the session.
    #[serde(rename = "CLIENTS_LIST")]
    RosterSnapshot {
        #[serde(default)]
        client_list: Vec<String>,
    },

    /// Insert `content` at `start_index`.
    #[serde(rename = "ADD")]
    Insert {
        #[serde(default)]
        client_name: String,
        #[serde(default)]
        start_index: i64,
        #[serde(default)]
        content: String,
    },

    /// Delete the half-open range `start_index..end_index`.
    #[serde(rename = "REMOVE")]
    Delete {
        #[serde(default)]
        client_name: String,
        #[serde(default)]
        start_index: i64,
        #[serde(default)]
        end_index: i64,
    },

    /// A participant's caret moved.
    #[serde(rename = "CURSOR_MOVE")]
    CursorMove {
        client_name: String,
        #[serde(default)]
        cursor_location: i64,
    },

    #[serde(rename = "PING")]
    KeepAliveProbe,

    #[serde(rename = "PONG")]
    KeepAliveAck,

    /// Error surfaced by the relay.
    #[serde(rename = "ERROR")]
    Error {
        #[serde(default)]
        message: String,
    },

    /// Ask the relay for a fresh [`WireOp::DocumentSnapshot`].
    #[serde(rename = "REQUEST_DOCUMENT")]
    ResyncRequest { client_name: String },
}

impl WireOp {
    /// Every `command` value this client understands.
    pub const COMMANDS: [&'static str; 10] = [
        "NEWCLIENT",
        "DOCUMENT",
        "CLIENTS_LIST",
        "ADD",
        "REMOVE",
        "CURSOR_MOVE",
        "PING",
        "PONG",
        "ERROR",
        "REQUEST_DOCUMENT",
    ];

    /// `NEWCLIENT` announcing `client_name`.
    pub fn join(client_name: impl Into<String>) -> Self {
        Self::Join { client_name: client_name.into() }
    }

    /// `ADD` of `content` at `start_index`.
    pub fn insert(client_name: impl Into<String>, start_index: usize, content: impl Into<String>) -> Self {
        Self::Insert {
            client_name: client_name.into(),
            start_index: start_index as i64,
            content: content.into(),
        }
    }

    /// Create a delete of `start_index..end_index`.
    ///
    /// Fails unless `end_index > start_index`.
    pub fn delete(
        client_name: impl Into<String>,
        start_index: usize,
        end_index: usize,
    ) -> Result<Self, ProtocolError> {
        if end_index <= start_index {
            return Err(ProtocolError::InvalidOperation(format!(
                "REMOVE needs endIndex > startIndex, got {start_index}..{end_index}"
            )));
        }
        Ok(Self::Delete {
            client_name: client_name.into(),
            start_index: start_index as i64,
            end_index: end_index as i64,
        })
    }

    /// `CURSOR_MOVE` to `cursor_location`.
    pub fn cursor_move(client_name: impl Into<String>, cursor_location: usize) -> Self {
        Self::CursorMove {
            client_name: client_name.into(),
            cursor_location: cursor_location as i64,
        }
    }

    /// `REQUEST_DOCUMENT` asking the relay for a fresh snapshot.
    pub fn resync_request(client_name: impl Into<String>) -> Self {
        Self::ResyncRequest { client_name: client_name.into() }
    }

    /// The `command` tag of this operation.
    pub fn command(&self) -> &'static str {
        match self {
            Self::Join { .. } => "NEWCLIENT",
            Self::DocumentSnapshot { .. } => "DOCUMENT",
            Self::RosterSnapshot { .. } => "CLIENTS_LIST",
            Self::Insert { .. } => "ADD",
            Self::Delete { .. } => "REMOVE",
            Self::CursorMove { .. } => "CURSOR_MOVE",
            Self::KeepAliveProbe => "PING",
            Self::KeepAliveAck => "PONG",
            Self::Error { .. } => "ERROR",
            Self::ResyncRequest { .. } => "REQUEST_DOCUMENT",
        }
    }

    /// Participant named by this operation, if the kind carries one.
    pub fn client_name(&self) -> Option<&str> {
        match self {
            Self::Join { client_name }
            | Self::Insert { client_name, .. }
            | Self::Delete { client_name, .. }
            | Self::CursorMove { client_name, .. }
            | Self::ResyncRequest { client_name } => Some(client_name),
            _ => None,
        }
    }

    /// Check the shape rules an operation must meet before it may be sent.
    ///
    /// Relay-originated kinds (`DOCUMENT`, `CLIENTS_LIST`, `ERROR`) are never
    /// valid outgoing.
    pub fn validate_outgoing(&self) -> Result<(), ProtocolError> {
        if let Some(name) = self.client_name() {
            if name.trim().is_empty() {
                return Err(self.invalid("clientName must not be blank"));
            }
        }

        match self {
            Self::Insert { start_index, content, .. } => {
                if *start_index < 0 {
                    return Err(self.invalid("startIndex must not be negative"));
                }
                if content.is_empty() {
                    return Err(self.invalid("content must not be empty"));
                }
                Ok(())
            }
            Self::Delete { start_index, end_index, .. } => {
                if *start_index < 0 {
                    return Err(self.invalid("startIndex must not be negative"));
                }
                if end_index <= start_index {
                    return Err(self.invalid("endIndex must be greater than startIndex"));
                }
                Ok(())
            }
            Self::Join { .. }
            | Self::CursorMove { .. }
            | Self::ResyncRequest { .. }
            | Self::KeepAliveProbe
            | Self::KeepAliveAck => Ok(()),
            Self::DocumentSnapshot { .. } | Self::RosterSnapshot { .. } | Self::Error { .. } => {
                Err(self.invalid("only the relay sends this command"))
            }
        }
    }

    fn invalid(&self, reason: &str) -> ProtocolError {
        ProtocolError::InvalidOperation(format!("{}: {reason}", self.command()))
    }

    /// Serialize to a single JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Deserialize one JSON object.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Self::from_value(value)
    }

    fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let command = value
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::Deserialization("missing command field".into()))?;

        if !Self::COMMANDS.contains(&command) {
            return Err(ProtocolError::UnknownCommand(command.to_owned()));
        }

        serde_json::from_value(value).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

/// Decode a transport frame holding one operation or an array of them.
///
/// The outer error covers frames that are not JSON at all. Each element of a
/// batch decodes independently so one malformed entry does not drop the rest.
pub fn decode_frame(text: &str) -> Result<Vec<Result<WireOp, ProtocolError>>, ProtocolError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))?;

    Ok(match value {
        Value::Array(items) => items.into_iter().map(WireOp::from_value).collect(),
        single => vec![WireOp::from_value(single)],
    })
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("deserialization error: {0}")]
    Deserialization(String),
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("connection is not open")]
    ConnectionClosed,
}
