//! Connection settings for a [`Client`](crate::Client).
use std::time::Duration;

use crate::protocol::MAX_MESSAGE_SIZE;

/// Default capacity of a subscription's delivery queue.
pub const DEFAULT_SUBSCRIPTION_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    pub host: String,
    pub port: u16,
    /// Token presented during the handshake; empty for unauthenticated servers.
    pub auth_token: String,
    /// Ask the server for MessagePack. JSON is always offered as a fallback.
    pub use_msgpack: bool,
    pub connect_timeout: Duration,
    /// Upper bound on a single round trip. `None` waits until a reply or disconnect.
    pub request_timeout: Option<Duration>,
    /// Events buffered per subscription before newer ones are dropped.
    pub subscription_capacity: usize,
    pub max_message_size: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8082,
            auth_token: String::new(),
            use_msgpack: true,
            connect_timeout: Duration::from_secs(10),
            request_timeout: None,
            subscription_capacity: DEFAULT_SUBSCRIPTION_CAPACITY,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl ClientOptions {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
