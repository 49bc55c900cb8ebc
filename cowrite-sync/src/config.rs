//! Client configuration.

use std::time::Duration;

use crate::connection::ReconnectPolicy;

/// Settings for one participant's session.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Relay WebSocket endpoint
    pub server_url: String,
    /// Participant identity; must be unique within the document
    pub client_name: String,
    /// Delay between reconnection attempts
    pub reconnect_interval: Duration,
    /// Reconnection attempts before giving up
    pub max_reconnect_attempts: u32,
    /// Capacity of the event channel handed to the application
    pub event_capacity: usize,
    /// Capacity of the command channel behind each `ClientHandle`
    pub command_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:8080/ws".to_string(),
            client_name: String::new(),
            reconnect_interval: Duration::from_secs(3),
            max_reconnect_attempts: 10,
            event_capacity: 256,
            command_capacity: 256,
        }
    }
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>, client_name: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            client_name: client_name.into(),
            ..Self::default()
        }
    }

    pub fn with_reconnect(mut self, interval: Duration, max_attempts: u32) -> Self {
        self.reconnect_interval = interval;
        self.max_reconnect_attempts = max_attempts;
        self
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            interval: self.reconnect_interval,
            max_attempts: self.max_reconnect_attempts,
        }
    }
}
