//! Full-document resynchronization after a detected divergence.
//!
//! A divergence produces a single `REQUEST_DOCUMENT`; further divergences are
//! absorbed until the relay answers with a `DOCUMENT`. Operations arriving in
//! between are still dispatched normally, since the snapshot overrides them.

use crate::codec::Divergence;
use crate::protocol::WireOp;

#[derive(Debug, Clone, Default)]
pub struct ResyncController {
    outstanding: bool,
    requests: u64,
}

impl ResyncController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the request to send, or `None` if one is already in flight.
    pub fn on_divergence(&mut self, client_name: &str, divergence: &Divergence) -> Option<WireOp> {
        if self.outstanding {
            log::debug!("Resync already requested, absorbing divergence: {divergence}");
            return None;
        }
        log::warn!("Local document diverged ({divergence}), requesting snapshot");
        self.outstanding = true;
        self.requests += 1;
        Some(WireOp::resync_request(client_name))
    }

    /// A snapshot arrived and replaced local state.
    pub fn on_snapshot(&mut self) {
        self.outstanding = false;
    }

    /// Forget any in-flight request, e.g. after reconnecting.
    pub fn reset(&mut self) {
        self.outstanding = false;
    }

    pub fn is_outstanding(&self) -> bool {
        self.outstanding
    }

    /// Total requests issued this session.
    pub fn requests(&self) -> u64 {
        self.requests
    }
}
