//! In-process stand-ins for a SquirrelDB server.
use std::{
    io::{self, Cursor, Read, Write},
    net::{Shutdown, SocketAddr, TcpListener, TcpStream},
    thread,
};

use crate::protocol::{
    ClientMessage, Encoding, FrameReader, FrameWriter, HANDSHAKE_HEADER_LEN, HandshakeResponse,
    HandshakeStatus, MAX_MESSAGE_SIZE, MessageType, ProtocolFlags, ServerMessage,
    build_frame, decode_message, encode_message,
};

/// Reads from canned input while recording everything written.
pub(crate) struct Duplex {
    pub input: Cursor<Vec<u8>>,
    pub output: Vec<u8>,
}

impl Duplex {
    pub fn new(input: Vec<u8>) -> Self {
        Self {
            input: Cursor::new(input),
            output: Vec::new(),
        }
    }
}

impl Read for Duplex {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for Duplex {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Server side of one accepted connection, past the handshake.
pub(crate) struct ServerConn {
    reader: FrameReader<TcpStream>,
    writer: FrameWriter<TcpStream>,
    stream: TcpStream,
    pub encoding: Encoding,
    pub token: String,
}

impl ServerConn {
    pub fn recv(&mut self) -> ClientMessage {
        self.try_recv().expect("client hung up")
    }

    /// `None` once the client has hung up.
    pub fn try_recv(&mut self) -> Option<ClientMessage> {
        let frame = self.reader.read_frame().ok()?;
        assert_eq!(frame.header.msg_type, MessageType::Request);
        assert_eq!(frame.header.encoding, self.encoding);
        Some(decode_message(&frame.payload, frame.header.encoding).unwrap())
    }

    pub fn send(&mut self, msg: &ServerMessage) {
        let payload = encode_message(msg, self.encoding).unwrap();
        self.writer
            .write_frame(Self::msg_type(msg), self.encoding, &payload)
            .unwrap();
    }

    /// Encodes `msg` as one complete frame without sending it.
    pub fn frame(&self, msg: &ServerMessage) -> Vec<u8> {
        let payload = encode_message(msg, self.encoding).unwrap();
        build_frame(Self::msg_type(msg), self.encoding, &payload).unwrap()
    }

    fn msg_type(msg: &ServerMessage) -> MessageType {
        if msg.is_notification() {
            MessageType::Notification
        } else {
            MessageType::Response
        }
    }

    pub fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).unwrap();
    }

    /// Waits until the client hangs up.
    pub fn wait_for_close(&mut self) {
        let _ = self.reader.read_frame();
    }

    pub fn disconnect(self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

pub(crate) fn accepting(flags: u8) -> HandshakeResponse {
    HandshakeResponse {
        status: HandshakeStatus::Success,
        version: 1,
        flags: ProtocolFlags::from(flags),
        session_id: core::array::from_fn(|i| i as u8),
    }
}

/// Serves a single connection: answers the handshake with `response`, then hands the
/// connection to `script` when the handshake succeeded.
pub(crate) fn spawn_server<F>(response: HandshakeResponse, script: F) -> SocketAddr
where
    F: FnOnce(ServerConn) + Send + 'static,
{
    spawn_raw_server(response.to_bytes().unwrap(), move |stream, token| {
        if response.status != HandshakeStatus::Success {
            return;
        }
        let encoding = if response.flags.msgpack {
            Encoding::MsgPack
        } else {
            Encoding::Json
        };
        let conn = ServerConn {
            reader: FrameReader::new(stream.try_clone().unwrap(), MAX_MESSAGE_SIZE),
            writer: FrameWriter::new(stream.try_clone().unwrap()),
            stream,
            encoding,
            token,
        };
        script(conn);
    })
}

/// Like [`spawn_server`] but answers the handshake with arbitrary bytes.
pub(crate) fn spawn_raw_server<F>(response: Vec<u8>, script: F) -> SocketAddr
where
    F: FnOnce(TcpStream, String) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();

        let mut header = [0u8; HANDSHAKE_HEADER_LEN];
        stream.read_exact(&mut header).unwrap();
        assert_eq!(&header[0..4], b"SQRL");
        let token_len = u16::from_be_bytes([header[6], header[7]]) as usize;
        let mut token = vec![0u8; token_len];
        stream.read_exact(&mut token).unwrap();

        stream.write_all(&response).unwrap();
        script(stream, String::from_utf8(token).unwrap());
    });

    addr
}
