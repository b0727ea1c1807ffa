use bincode::{Decode, Encode, decode_from_slice, encode_into_slice};

use super::{CodecError, Encoding, header_config};

/// Size of the fixed frame header.
pub const FRAME_HEADER_LEN: usize = 6;

/// Bytes counted by the length field besides the payload.
const TYPE_AND_ENCODING_LEN: u32 = 2;

/// Role of a frame on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Request,
    Response,
    Notification,
}

impl From<MessageType> for u8 {
    fn from(value: MessageType) -> Self {
        match value {
            MessageType::Request => 0x01,
            MessageType::Response => 0x02,
            MessageType::Notification => 0x03,
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(MessageType::Request),
            0x02 => Ok(MessageType::Response),
            0x03 => Ok(MessageType::Notification),
            other => Err(other),
        }
    }
}

#[derive(Encode, Decode)]
struct RawFrameHeader {
    length: u32,
    msg_type: u8,
    encoding: u8,
}

/// Parsed frame header. The payload that follows is `payload_length` bytes long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub payload_length: u32,
    pub msg_type: MessageType,
    pub encoding: Encoding,
}

/// Builds one contiguous frame around `payload`.
pub fn build_frame(
    msg_type: MessageType,
    encoding: Encoding,
    payload: &[u8],
) -> Result<Vec<u8>, CodecError> {
    let length = u32::try_from(payload.len())
        .ok()
        .and_then(|len| len.checked_add(TYPE_AND_ENCODING_LEN))
        .ok_or(CodecError::PayloadTooLarge(payload.len()))?;

    let header = RawFrameHeader {
        length,
        msg_type: msg_type.into(),
        encoding: encoding.into(),
    };

    let mut buf = vec![0u8; FRAME_HEADER_LEN + payload.len()];
    encode_into_slice(header, &mut buf[..FRAME_HEADER_LEN], header_config())?;
    buf[FRAME_HEADER_LEN..].copy_from_slice(payload);
    Ok(buf)
}

/// Parses the 6-byte frame header.
///
/// Unknown type or encoding bytes are reported together with the payload length so the
/// reader can drain the payload and stay aligned.
pub fn parse_frame_header(data: &[u8]) -> Result<FrameHeader, CodecError> {
    if data.len() < FRAME_HEADER_LEN {
        return Err(CodecError::HeaderTooShort(data.len()));
    }

    let (raw, _): (RawFrameHeader, usize) =
        decode_from_slice(&data[..FRAME_HEADER_LEN], header_config())?;

    if raw.length < TYPE_AND_ENCODING_LEN {
        return Err(CodecError::InvalidFrameLength(raw.length));
    }
    let payload_length = raw.length - TYPE_AND_ENCODING_LEN;

    let msg_type = MessageType::try_from(raw.msg_type).map_err(|code| {
        CodecError::UnknownMessageType {
            code,
            payload_length,
        }
    })?;
    let encoding =
        Encoding::try_from(raw.encoding).map_err(|code| CodecError::UnknownEncoding {
            code,
            payload_length,
        })?;

    Ok(FrameHeader {
        payload_length,
        msg_type,
        encoding,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_header_describes_payload() {
        let cases = [
            (MessageType::Request, Encoding::MsgPack, &b""[..]),
            (MessageType::Response, Encoding::Json, &b"{\"type\":\"pong\"}"[..]),
            (MessageType::Notification, Encoding::MsgPack, &[0u8; 300][..]),
        ];

        for (msg_type, encoding, payload) in cases {
            let frame = build_frame(msg_type, encoding, payload).unwrap();
            let header = parse_frame_header(&frame[..FRAME_HEADER_LEN]).unwrap();

            assert_eq!(header.payload_length as usize, payload.len());
            assert_eq!(header.msg_type, msg_type);
            assert_eq!(header.encoding, encoding);
            assert_eq!(&frame[FRAME_HEADER_LEN..], payload);
        }
    }

    #[test]
    fn frame_length_counts_type_and_encoding() {
        let frame = build_frame(MessageType::Request, Encoding::Json, b"abc").unwrap();
        assert_eq!(&frame[..6], &[0, 0, 0, 5, 0x01, 0x02]);
    }

    #[test]
    fn short_header_rejected() {
        let err = parse_frame_header(&[0, 0, 0, 2, 1]).unwrap_err();
        assert!(matches!(err, CodecError::HeaderTooShort(5)));
    }

    #[test]
    fn undersized_declared_length_rejected() {
        let err = parse_frame_header(&[0, 0, 0, 1, 1, 1]).unwrap_err();
        assert!(matches!(err, CodecError::InvalidFrameLength(1)));
        assert_eq!(err.skippable_payload(), None);
    }

    #[test]
    fn unknown_codes_keep_payload_length() {
        let err = parse_frame_header(&[0, 0, 0, 12, 0x09, 0x01]).unwrap_err();
        assert!(matches!(err, CodecError::UnknownMessageType { code: 0x09, .. }));
        assert_eq!(err.skippable_payload(), Some(10));

        let err = parse_frame_header(&[0, 0, 0, 4, 0x02, 0x07]).unwrap_err();
        assert!(matches!(err, CodecError::UnknownEncoding { code: 0x07, .. }));
        assert_eq!(err.skippable_payload(), Some(2));
    }
}
