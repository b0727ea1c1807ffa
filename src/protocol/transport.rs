use std::io::{self, Read, Write};

use thiserror::Error;

use super::{
    CodecError, Encoding, FRAME_HEADER_LEN, FrameHeader, HANDSHAKE_RESPONSE_LEN,
    HandshakeResponse, MessageType, ProtocolFlags, build_frame, build_handshake,
    parse_frame_header, parse_handshake_response,
};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport IO error: {0}")]
    Io(#[from] io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("frame too large: max {max_bytes} got {got_bytes}")]
    FrameTooLarge { max_bytes: usize, got_bytes: usize },
}

impl TransportError {
    /// Whether the stream can no longer be trusted to sit on a frame boundary.
    pub fn is_fatal(&self) -> bool {
        match self {
            TransportError::Io(_) => true,
            TransportError::Codec(err) => err.skippable_payload().is_none(),
            TransportError::FrameTooLarge { .. } => false,
        }
    }
}

/// One frame read off the wire with its undecoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

/// Owns the whole stream while the session is negotiated.
pub struct ProtocolTransport<T: Read + Write> {
    stream: T,
}

impl<T: Read + Write> ProtocolTransport<T> {
    pub fn new(stream: T) -> Self {
        Self { stream }
    }

    /// Sends the handshake request and reads the fixed-size response.
    pub fn handshake(
        &mut self,
        auth_token: &str,
        flags: ProtocolFlags,
    ) -> Result<HandshakeResponse, TransportError> {
        let packet = build_handshake(auth_token, flags)?;
        self.stream.write_all(&packet)?;
        self.stream.flush()?;

        let mut response = [0u8; HANDSHAKE_RESPONSE_LEN];
        self.stream.read_exact(&mut response)?;
        Ok(parse_handshake_response(&response)?)
    }

    pub fn into_inner(self) -> T {
        self.stream
    }
}

/// Reads whole frames, draining the payload of frames it refuses so the next read
/// starts on a frame boundary.
pub struct FrameReader<R> {
    reader: R,
    max_message_size: usize,
}

impl<R: Read> FrameReader<R> {
    pub fn new(reader: R, max_message_size: usize) -> Self {
        Self {
            reader,
            max_message_size,
        }
    }

    pub fn read_frame(&mut self) -> Result<Frame, TransportError> {
        let mut raw = [0u8; FRAME_HEADER_LEN];
        self.reader.read_exact(&mut raw)?;

        let header = match parse_frame_header(&raw) {
            Ok(header) => header,
            Err(err) => {
                if let Some(len) = err.skippable_payload() {
                    self.discard(len as u64)?;
                }
                return Err(err.into());
            }
        };

        let len = header.payload_length as usize;
        if len > self.max_message_size {
            self.discard(len as u64)?;
            return Err(TransportError::FrameTooLarge {
                max_bytes: self.max_message_size,
                got_bytes: len,
            });
        }

        let mut payload = vec![0u8; len];
        self.reader.read_exact(&mut payload)?;
        Ok(Frame { header, payload })
    }

    fn discard(&mut self, len: u64) -> io::Result<()> {
        let copied = io::copy(&mut (&mut self.reader).take(len), &mut io::sink())?;
        if copied < len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "frame payload truncated",
            ));
        }
        Ok(())
    }
}

pub struct FrameWriter<W> {
    writer: W,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes one frame in a single contiguous write.
    pub fn write_frame(
        &mut self,
        msg_type: MessageType,
        encoding: Encoding,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let frame = build_frame(msg_type, encoding, payload)?;
        self.writer.write_all(&frame)?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::{protocol::HandshakeStatus, test_support::Duplex};

    fn frames(parts: &[Vec<u8>]) -> Cursor<Vec<u8>> {
        Cursor::new(parts.concat())
    }

    #[test]
    fn handshake_exchange() {
        let mut response = vec![0x00, 0x01, 0x01];
        response.extend_from_slice(&[0x42; 16]);
        let stream = Duplex::new(response);
        let mut transport = ProtocolTransport::new(stream);

        let flags = ProtocolFlags {
            msgpack: true,
            json_fallback: true,
        };
        let resp = transport.handshake("secret", flags).unwrap();
        assert_eq!(resp.status, HandshakeStatus::Success);
        assert_eq!(resp.session_id, [0x42; 16]);

        let stream = transport.into_inner();
        assert_eq!(stream.output, build_handshake("secret", flags).unwrap());
    }

    #[test]
    fn handshake_short_response_is_io_error() {
        let stream = Duplex::new(vec![0x00, 0x01]);
        let mut transport = ProtocolTransport::new(stream);

        let err = transport
            .handshake("", ProtocolFlags::default())
            .unwrap_err();
        assert!(matches!(err, TransportError::Io(_)));
    }

    #[test]
    fn read_write_frames() {
        let mut writer = FrameWriter::new(Vec::new());
        writer
            .write_frame(MessageType::Request, Encoding::Json, b"first")
            .unwrap();
        writer
            .write_frame(MessageType::Response, Encoding::MsgPack, b"second")
            .unwrap();

        let mut reader = FrameReader::new(Cursor::new(writer.writer), 1024);
        let first = reader.read_frame().unwrap();
        assert_eq!(first.header.msg_type, MessageType::Request);
        assert_eq!(first.payload, b"first");

        let second = reader.read_frame().unwrap();
        assert_eq!(second.header.encoding, Encoding::MsgPack);
        assert_eq!(second.payload, b"second");

        let err = reader.read_frame().unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn write_frame_emits_one_contiguous_frame() {
        let mut writer = FrameWriter::new(Vec::new());
        writer
            .write_frame(MessageType::Request, Encoding::MsgPack, b"abc")
            .unwrap();

        assert_eq!(writer.writer, vec![0, 0, 0, 5, 0x01, 0x01, b'a', b'b', b'c']);
    }

    #[test]
    fn oversized_frame_is_drained() {
        let big = build_frame(MessageType::Response, Encoding::Json, &[b'x'; 64]).unwrap();
        let next = build_frame(MessageType::Response, Encoding::Json, b"ok").unwrap();
        let mut reader = FrameReader::new(frames(&[big, next]), 16);

        let err = reader.read_frame().unwrap_err();
        assert!(matches!(
            err,
            TransportError::FrameTooLarge {
                max_bytes: 16,
                got_bytes: 64
            }
        ));
        assert!(!err.is_fatal());
        assert_eq!(reader.read_frame().unwrap().payload, b"ok");
    }

    #[test]
    fn unknown_message_type_is_drained() {
        let stray = vec![0, 0, 0, 5, 0x09, 0x02, b'a', b'b', b'c'];
        let next = build_frame(MessageType::Notification, Encoding::Json, b"ok").unwrap();
        let mut reader = FrameReader::new(frames(&[stray, next]), 1024);

        let err = reader.read_frame().unwrap_err();
        assert!(!err.is_fatal());
        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.header.msg_type, MessageType::Notification);
    }

    #[test]
    fn undersized_length_is_fatal() {
        let mut reader = FrameReader::new(Cursor::new(vec![0, 0, 0, 1, 0x02, 0x02]), 1024);

        let err = reader.read_frame().unwrap_err();
        assert!(matches!(
            err,
            TransportError::Codec(CodecError::InvalidFrameLength(1))
        ));
        assert!(err.is_fatal());
    }

    #[test]
    fn truncated_payload_is_fatal() {
        let mut frame = build_frame(MessageType::Response, Encoding::Json, b"payload").unwrap();
        frame.truncate(frame.len() - 3);
        let mut reader = FrameReader::new(Cursor::new(frame), 1024);

        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, TransportError::Io(_)));
        assert!(err.is_fatal());
    }
}
