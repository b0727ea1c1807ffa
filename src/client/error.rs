use std::io;

use thiserror::Error;

use crate::protocol::{CodecError, ServerMessageKind, TransportError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect: {0}")]
    Connect(#[source] io::Error),

    #[error("protocol version mismatch: server={server}, client={client}")]
    VersionMismatch { server: u8, client: u8 },

    #[error("authentication failed")]
    AuthFailed,

    #[error("unexpected handshake status: {0}")]
    Handshake(u8),

    #[error("handshake failed: {0}")]
    HandshakeTransport(#[source] TransportError),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    Closed,

    #[error("request timed out")]
    Timeout,

    #[error("server error: {0}")]
    Server(String),

    #[error("unexpected response: {0:?}")]
    UnexpectedResponse(ServerMessageKind),

    #[error("failed to send: {0}")]
    Send(#[source] TransportError),

    #[error("{0}")]
    Codec(#[from] CodecError),

    #[error("failed to convert document: {0}")]
    Document(#[from] serde_json::Error),
}
