//! Session lifecycle: handshake negotiation and the read loop.
//!
//! A session moves through `Connecting → Handshaking → Connected → Closing → Closed`.
//! A failed handshake goes straight to `Closed`. Once connected, a single reader thread
//! owns the read half of the socket and routes every incoming envelope either to the
//! request it answers or to the subscription it belongs to.
use std::{
    io::{self, Read, Write},
    net::TcpStream,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    thread::{self, JoinHandle},
};

use crossbeam::channel::{Receiver, Sender};
use log::{debug, trace, warn};

use super::{
    ClientError,
    pending::PendingRequests,
    subscription::{Delivery, SubscriptionRegistry},
};
use crate::{
    config::ClientOptions,
    protocol::{
        Encoding, FrameReader, HandshakeStatus, PROTOCOL_VERSION, ProtocolFlags,
        ProtocolTransport, ServerMessage, TransportError, decode_message, session_id_to_string,
    },
};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Connecting = 0,
    Handshaking = 1,
    Connected = 2,
    Closing = 3,
    Closed = 4,
}

impl From<u8> for SessionState {
    fn from(value: u8) -> Self {
        match value {
            0 => SessionState::Connecting,
            1 => SessionState::Handshaking,
            2 => SessionState::Connected,
            3 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: SessionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> SessionState {
        self.0.load(Ordering::Acquire).into()
    }

    pub fn set(&self, state: SessionState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Moves to `Closing`. Only the first caller gets `true`.
    pub fn begin_close(&self) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < SessionState::Closing as u8).then_some(SessionState::Closing as u8)
            })
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.get() >= SessionState::Closing
    }
}

/// State touched by both the reader thread and foreground callers.
pub(crate) struct Shared {
    pub state: StateCell,
    pub pending: PendingRequests,
    pub subscriptions: SubscriptionRegistry,
    /// Never carries a value; disconnects once the read loop has swept pending requests.
    pub closed: Receiver<()>,
}

impl Shared {
    pub fn new(closed: Receiver<()>) -> Self {
        Self {
            state: StateCell::new(SessionState::Connecting),
            pending: PendingRequests::default(),
            subscriptions: SubscriptionRegistry::default(),
            closed,
        }
    }
}

/// Parameters agreed on during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Negotiated {
    pub session_id: String,
    pub version: u8,
    pub encoding: Encoding,
}

/// Runs the handshake over a freshly opened stream.
pub(crate) fn negotiate<T: Read + Write>(
    transport: &mut ProtocolTransport<T>,
    options: &ClientOptions,
    state: &StateCell,
) -> Result<Negotiated, ClientError> {
    state.set(SessionState::Handshaking);

    let flags = ProtocolFlags {
        msgpack: options.use_msgpack,
        json_fallback: true,
    };
    let resp = transport
        .handshake(&options.auth_token, flags)
        .map_err(|err| match err {
            TransportError::Io(ref source)
                if matches!(
                    source.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                ClientError::Timeout
            }
            err => ClientError::HandshakeTransport(err),
        })?;

    match resp.status {
        HandshakeStatus::Success => {}
        HandshakeStatus::VersionMismatch => {
            return Err(ClientError::VersionMismatch {
                server: resp.version,
                client: PROTOCOL_VERSION,
            });
        }
        HandshakeStatus::AuthFailed => return Err(ClientError::AuthFailed),
        HandshakeStatus::Unknown(code) => return Err(ClientError::Handshake(code)),
    }

    let encoding = if resp.flags.msgpack {
        Encoding::MsgPack
    } else {
        Encoding::Json
    };

    Ok(Negotiated {
        session_id: session_id_to_string(&resp.session_id),
        version: resp.version,
        encoding,
    })
}

pub(crate) fn spawn_read_loop(
    reader: FrameReader<TcpStream>,
    shared: Arc<Shared>,
    closed: Sender<()>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("squirreldb-reader".to_string())
        .spawn(move || {
            read_loop(reader, &shared);
            drop(closed);
        })
}

/// Reads frames until the stream fails, then releases every pending request.
pub(crate) fn read_loop<R: Read>(mut reader: FrameReader<R>, shared: &Shared) {
    loop {
        let frame = match reader.read_frame() {
            Ok(frame) => frame,
            Err(err) if !err.is_fatal() => {
                debug!("skipping frame: {err}");
                continue;
            }
            Err(err) => {
                if shared.state.is_closed() {
                    debug!("read loop stopped: {err}");
                } else {
                    warn!("connection lost: {err}");
                }
                break;
            }
        };

        trace!(
            "received {:?} frame, {} bytes",
            frame.header.msg_type, frame.header.payload_length
        );

        let msg: ServerMessage = match decode_message(&frame.payload, frame.header.encoding) {
            Ok(msg) => msg,
            Err(err) => {
                debug!("dropping undecodable frame: {err}");
                continue;
            }
        };

        dispatch(shared, msg);
    }

    disconnect(shared);
}

fn disconnect(shared: &Shared) {
    shared.state.set(SessionState::Closed);
    let released = shared.pending.sweep();
    if released > 0 {
        debug!("released {released} pending requests");
    }
}

pub(crate) fn dispatch(shared: &Shared, msg: ServerMessage) {
    if msg.is_notification() {
        let ServerMessage { id, change, .. } = msg;
        let Some(change) = change else {
            return;
        };

        match shared.subscriptions.deliver(&id, change) {
            Delivery::Queued => trace!("queued change for subscription {id}"),
            Delivery::Dropped => debug!("subscription {id} is full, dropping change"),
            Delivery::Unknown => trace!("change for inactive subscription {id}"),
        }
        return;
    }

    let id = msg.id.clone();
    if !shared.pending.resolve(msg) {
        trace!("discarding reply for unknown request {id}");
    }
}
