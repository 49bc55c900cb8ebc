//! Connection lifecycle and reconnection policy.
//!
//! ```text
//!                 connect()            on_open()
//! Disconnected ──────────────► Connecting ──────► Open
//!      ▲                          ▲               │
//!      │ clean close / give up    │ retry         │ close()      unclean close
//!      │                          │               ▼                   │
//!      └──────────────── ClosingClean    ClosingUnclean ◄─────────────┘
//! ```
//!
//! The manager does no I/O. It owns the outbox of encoded frames that the
//! transport driver flushes after every engine call, and decides what an
//! unclean close leads to. Retries use a constant interval and a bounded
//! count; consecutive failures accumulate until an open succeeds.

use std::collections::VecDeque;
use std::time::Duration;

use crate::protocol::{ProtocolError, WireOp};

/// Transport state as seen by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    /// Locally requested close in progress.
    ClosingClean,
    /// Lost the transport; waiting for the next reconnection attempt.
    ClosingUnclean,
}

/// Constant-interval, bounded reconnection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            max_attempts: 10,
        }
    }
}

/// What the driver should do after the transport closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Clean close; stay disconnected.
    Closed,
    /// Wait `delay`, then call `connect()` again.
    Reconnect { attempt: u32, delay: Duration },
    /// Attempts exhausted; manual restart required.
    GaveUp { attempts: u32 },
}

#[derive(Debug)]
pub struct ConnectionManager {
    state: ConnectionState,
    policy: ReconnectPolicy,
    attempts: u32,
    outbox: VecDeque<String>,
}

impl ConnectionManager {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            policy,
            attempts: 0,
            outbox: VecDeque::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    /// Consecutive reconnection attempts since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Begin opening the transport. Returns `false` if a connection is
    /// already open or in progress.
    pub fn connect(&mut self) -> bool {
        match self.state {
            ConnectionState::Disconnected | ConnectionState::ClosingUnclean => {
                self.state = ConnectionState::Connecting;
                true
            }
            state => {
                log::warn!("connect() ignored in state {state:?}");
                false
            }
        }
    }

    /// The transport finished opening.
    pub fn on_open(&mut self) {
        if self.state != ConnectionState::Connecting {
            log::warn!("Transport opened in unexpected state {:?}", self.state);
        }
        self.state = ConnectionState::Open;
        self.attempts = 0;
        self.outbox.clear();
    }

    /// Start a locally requested close.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Open {
            self.state = ConnectionState::ClosingClean;
        }
    }

    /// The transport closed, cleanly or not.
    pub fn on_close(&mut self, clean: bool) -> CloseOutcome {
        self.outbox.clear();

        if clean {
            self.state = ConnectionState::Disconnected;
            return CloseOutcome::Closed;
        }

        if self.attempts < self.policy.max_attempts {
            self.attempts += 1;
            self.state = ConnectionState::ClosingUnclean;
            CloseOutcome::Reconnect {
                attempt: self.attempts,
                delay: self.policy.interval,
            }
        } else {
            self.state = ConnectionState::Disconnected;
            CloseOutcome::GaveUp { attempts: self.attempts }
        }
    }

    /// Validate, encode and queue `op` for the transport.
    ///
    /// Dropped with a warning when the connection is not open or the
    /// operation is malformed.
    pub fn send(&mut self, op: &WireOp) -> Result<(), ProtocolError> {
        if self.state != ConnectionState::Open {
            log::warn!("Connection is not open, dropping {}", op.command());
            return Err(ProtocolError::ConnectionClosed);
        }
        if let Err(e) = op.validate_outgoing() {
            log::warn!("Attempted to send invalid message {op:?}: {e}");
            return Err(e);
        }
        let frame = op.encode()?;
        self.outbox.push_back(frame);
        Ok(())
    }

    /// Frames queued since the last call, in send order.
    pub fn take_outgoing(&mut self) -> Vec<String> {
        self.outbox.drain(..).collect()
    }
}
