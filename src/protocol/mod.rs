//! SquirrelDB wire protocol.
//!
//! This module defines the binary protocol spoken between a SquirrelDB client and server,
//! including the session handshake, frame layout, message envelopes, and the blocking
//! transport used to move frames over a byte stream.
//!
//! # Overview
//!
//! A connection starts with a versioned handshake. The client announces the protocol magic,
//! its version, the encodings it is willing to speak, and an optional auth token. The server
//! answers with a fixed-size response carrying a status, the negotiated version and flags,
//! and a 16-byte session identifier.
//!
//! After the handshake every message travels inside a frame. Frame payloads are envelopes
//! serialized in one of two interchangeable encodings: MessagePack or JSON.
//!
//! # Key Components
//!
//! - [`build_handshake`] / [`parse_handshake_response`]: session negotiation packets.
//! - [`build_frame`] / [`parse_frame_header`]: frame construction and header parsing.
//! - [`encode_message`] / [`decode_message`]: envelope (de)serialization per [`Encoding`].
//! - [`ProtocolTransport`], [`FrameReader`], [`FrameWriter`]: blocking stream plumbing.
//!
//! # Binary Format
//!
//! All multi-byte integers are big-endian.
//!
//! ```text
//! handshake request  [magic:4][version:1][flags:1][token_len:2][token:token_len]
//! handshake response [status:1][version:1][flags:1][session_id:16]
//! frame              [total_len:4][msg_type:1][encoding:1][payload:total_len-2]
//! ```
//!
//! Fixed-size headers are laid out with `bincode` in its big-endian, fixed-int configuration,
//! which writes each field verbatim with no length prefixes.
//!
//! # See Also
//!
//! - [`client`](crate::client): Session engine built on top of this module.
mod frame;
mod handshake;
mod message;
mod transport;

use bincode::config::{BigEndian, Configuration, Fixint};
use thiserror::Error;

pub use frame::{FRAME_HEADER_LEN, FrameHeader, MessageType, build_frame, parse_frame_header};
pub use handshake::{
    HANDSHAKE_HEADER_LEN, HANDSHAKE_RESPONSE_LEN, HandshakeResponse, HandshakeStatus,
    ProtocolFlags, build_handshake, parse_handshake_response, session_id_to_string,
};
pub use message::{
    ChangeEvent, ClientMessage, Document, Encoding, Query, RequestKind, ServerMessage,
    ServerMessageKind, decode_message, encode_message,
};
pub use transport::{Frame, FrameReader, FrameWriter, ProtocolTransport, TransportError};

/// Bytes opening every handshake.
pub const MAGIC: [u8; 4] = *b"SQRL";

/// Protocol version implemented by this crate.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Largest frame payload accepted from a peer.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

pub(crate) fn header_config() -> Configuration<BigEndian, Fixint> {
    bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
}

/// Errors raised by the pure codec functions.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("handshake response too short: {0} bytes")]
    HandshakeTooShort(usize),

    #[error("frame header too short: {0} bytes")]
    HeaderTooShort(usize),

    #[error("declared frame length {0} is smaller than the type and encoding bytes")]
    InvalidFrameLength(u32),

    #[error("unknown message type {code:#04x}")]
    UnknownMessageType { code: u8, payload_length: u32 },

    #[error("unknown encoding {code:#04x}")]
    UnknownEncoding { code: u8, payload_length: u32 },

    #[error("auth token of {0} bytes does not fit the handshake length field")]
    TokenTooLong(usize),

    #[error("payload of {0} bytes does not fit the frame length field")]
    PayloadTooLarge(usize),

    #[error("failed to lay out header: {0}")]
    Header(#[from] bincode::error::EncodeError),

    #[error("failed to read header: {0}")]
    HeaderDecode(#[from] bincode::error::DecodeError),

    #[error("failed to encode MessagePack envelope: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    #[error("failed to decode MessagePack envelope: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    #[error("failed to (de)serialize JSON envelope: {0}")]
    Json(#[from] serde_json::Error),
}

impl CodecError {
    /// Payload bytes still following a header that was readable but unusable.
    ///
    /// `Some` means the reader can drain that many bytes and stay aligned on the
    /// next frame boundary.
    pub fn skippable_payload(&self) -> Option<u32> {
        match self {
            CodecError::UnknownMessageType { payload_length, .. }
            | CodecError::UnknownEncoding { payload_length, .. } => Some(*payload_length),
            _ => None,
        }
    }
}
