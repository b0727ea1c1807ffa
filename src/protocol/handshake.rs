use bincode::{Decode, Encode, decode_from_slice, encode_to_vec};
use uuid::Uuid;

use super::{CodecError, MAGIC, PROTOCOL_VERSION, header_config};

/// Size of the handshake request before the auth token.
pub const HANDSHAKE_HEADER_LEN: usize = 8;

/// Size of the server's handshake response.
pub const HANDSHAKE_RESPONSE_LEN: usize = 19;

const FLAG_MSGPACK: u8 = 0x01;
const FLAG_JSON_FALLBACK: u8 = 0x02;

/// Capability bits exchanged during the handshake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProtocolFlags {
    /// MessagePack supported (request) or chosen (response).
    pub msgpack: bool,
    /// JSON accepted as a fallback encoding.
    pub json_fallback: bool,
}

impl From<ProtocolFlags> for u8 {
    fn from(value: ProtocolFlags) -> Self {
        let mut byte = 0;
        if value.msgpack {
            byte |= FLAG_MSGPACK;
        }
        if value.json_fallback {
            byte |= FLAG_JSON_FALLBACK;
        }
        byte
    }
}

impl From<u8> for ProtocolFlags {
    fn from(value: u8) -> Self {
        Self {
            msgpack: value & FLAG_MSGPACK != 0,
            json_fallback: value & FLAG_JSON_FALLBACK != 0,
        }
    }
}

/// Outcome reported by the server in its handshake response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    Success,
    VersionMismatch,
    AuthFailed,
    Unknown(u8),
}

impl From<u8> for HandshakeStatus {
    fn from(value: u8) -> Self {
        match value {
            0x00 => HandshakeStatus::Success,
            0x01 => HandshakeStatus::VersionMismatch,
            0x02 => HandshakeStatus::AuthFailed,
            other => HandshakeStatus::Unknown(other),
        }
    }
}

impl From<HandshakeStatus> for u8 {
    fn from(value: HandshakeStatus) -> Self {
        match value {
            HandshakeStatus::Success => 0x00,
            HandshakeStatus::VersionMismatch => 0x01,
            HandshakeStatus::AuthFailed => 0x02,
            HandshakeStatus::Unknown(other) => other,
        }
    }
}

#[derive(Encode)]
struct HandshakeHeader {
    magic: [u8; 4],
    version: u8,
    flags: u8,
    token_len: u16,
}

#[derive(Encode, Decode)]
struct RawHandshakeResponse {
    status: u8,
    version: u8,
    flags: u8,
    session_id: [u8; 16],
}

/// Parsed server handshake response.
///
/// Status and version are reported as read; deciding whether the session may proceed
/// belongs to the session layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub status: HandshakeStatus,
    pub version: u8,
    pub flags: ProtocolFlags,
    pub session_id: [u8; 16],
}

impl HandshakeResponse {
    /// Lays the response out exactly as a server sends it.
    #[cfg(test)]
    pub(crate) fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let raw = RawHandshakeResponse {
            status: self.status.into(),
            version: self.version,
            flags: self.flags.into(),
            session_id: self.session_id,
        };
        Ok(encode_to_vec(raw, header_config())?)
    }
}

/// Builds the handshake packet a client sends right after connecting.
pub fn build_handshake(auth_token: &str, flags: ProtocolFlags) -> Result<Vec<u8>, CodecError> {
    let token = auth_token.as_bytes();
    let token_len =
        u16::try_from(token.len()).map_err(|_| CodecError::TokenTooLong(token.len()))?;

    let header = HandshakeHeader {
        magic: MAGIC,
        version: PROTOCOL_VERSION,
        flags: flags.into(),
        token_len,
    };
    let mut buf = encode_to_vec(header, header_config())?;
    buf.extend_from_slice(token);
    Ok(buf)
}

/// Parses the fixed-size handshake response; trailing bytes are ignored.
pub fn parse_handshake_response(data: &[u8]) -> Result<HandshakeResponse, CodecError> {
    if data.len() < HANDSHAKE_RESPONSE_LEN {
        return Err(CodecError::HandshakeTooShort(data.len()));
    }

    let (raw, _): (RawHandshakeResponse, usize) =
        decode_from_slice(&data[..HANDSHAKE_RESPONSE_LEN], header_config())?;

    Ok(HandshakeResponse {
        status: raw.status.into(),
        version: raw.version,
        flags: raw.flags.into(),
        session_id: raw.session_id,
    })
}

/// Renders a session identifier as a lowercase dashed UUID.
pub fn session_id_to_string(id: &[u8; 16]) -> String {
    Uuid::from_bytes(*id).hyphenated().to_string()
}
