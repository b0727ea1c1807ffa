//! Multiplexing SquirrelDB client.
//!
//! A [`Client`] owns one TCP session. Any number of threads may issue calls on it (or on
//! its clones) concurrently; each call blocks until its own reply arrives, the request
//! times out, or the session closes.
//!
//! # Overview
//!
//! - Every request carries a fresh correlation id and registers a one-shot reply slot
//!   before its frame is written.
//! - Frames are written under a single writer lock so concurrent requests never interleave.
//! - A dedicated reader thread matches replies to their slots and routes change
//!   notifications to the bounded queue of the matching [`Subscription`].
//! - When the connection drops, every in-flight request fails with
//!   [`ClientError::Closed`] instead of hanging.
//!
//! # Example
//! ```no_run
//! use squirreldb::{Client, ClientOptions};
//! use serde_json::json;
//!
//! let client = Client::connect(&ClientOptions::default()).unwrap();
//! client.ping().unwrap();
//!
//! let doc = client.insert("users", &json!({"name": "Alice", "active": true})).unwrap();
//! let active = client.query(r#"db.table("users").filter(u => u.active).run()"#).unwrap();
//!
//! let changes = client.subscribe(r#"db.table("users").changes()"#).unwrap();
//! for change in &changes {
//!     println!("{change:?}");
//! }
//! # let _ = (doc, active);
//! ```
mod error;
mod pending;
mod session;
mod subscription;


use std::{
    fmt, io,
    net::{Shutdown, TcpStream, ToSocketAddrs},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use crossbeam::channel::{self, Receiver};
use log::{debug, info};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    config::ClientOptions,
    protocol::{
        ClientMessage, Document, Encoding, FrameReader, FrameWriter, MessageType,
        ProtocolTransport, Query, RequestKind, ServerMessage, ServerMessageKind, encode_message,
    },
};

pub use error::ClientError;
pub use session::SessionState;
pub use subscription::Subscription;

use session::Shared;

/// Handle to a SquirrelDB session. Clones share the same connection.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    shared: Arc<Shared>,
    writer: Mutex<FrameWriter<TcpStream>>,
    socket: TcpStream,
    encoding: Encoding,
    session_id: String,
    protocol_version: u8,
    next_id: AtomicU64,
    options: ClientOptions,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("session_id", &self.inner.session_id)
            .field("encoding", &self.inner.encoding)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Opens a connection to `options.host:options.port` and negotiates a session.
    pub fn connect(options: &ClientOptions) -> Result<Self, ClientError> {
        let mut last_err = None;
        let mut stream = None;
        for addr in options
            .address()
            .to_socket_addrs()
            .map_err(ClientError::Connect)?
        {
            match TcpStream::connect_timeout(&addr, options.connect_timeout) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(err) => {
                    debug!("failed to reach {addr}: {err}");
                    last_err = Some(err);
                }
            }
        }

        match stream {
            Some(stream) => Self::from_stream(stream, options),
            None => Err(ClientError::Connect(last_err.unwrap_or_else(|| {
                io::Error::new(io::ErrorKind::AddrNotAvailable, "address resolved to nothing")
            }))),
        }
    }

    /// Negotiates a session over an already connected stream.
    ///
    /// The handshake must complete within `options.connect_timeout`. The stream is shut
    /// down if the handshake fails.
    pub fn from_stream(stream: TcpStream, options: &ClientOptions) -> Result<Self, ClientError> {
        let (closed_tx, closed_rx) = channel::bounded::<()>(0);
        let shared = Arc::new(Shared::new(closed_rx));

        if let Err(err) = set_timeouts(&stream, Some(options.connect_timeout)) {
            shared.state.set(SessionState::Closed);
            let _ = stream.shutdown(Shutdown::Both);
            return Err(ClientError::Connect(err));
        }

        let mut transport = ProtocolTransport::new(stream);
        let negotiated = session::negotiate(&mut transport, options, &shared.state);
        let socket = transport.into_inner();
        let negotiated = match negotiated.and_then(|negotiated| {
            // The read loop blocks until the server speaks.
            set_timeouts(&socket, None)
                .map(|_| negotiated)
                .map_err(ClientError::Connect)
        }) {
            Ok(negotiated) => negotiated,
            Err(err) => {
                shared.state.set(SessionState::Closed);
                let _ = socket.shutdown(Shutdown::Both);
                return Err(err);
            }
        };

        let halves = socket
            .try_clone()
            .and_then(|reader| socket.try_clone().map(|writer| (reader, writer)));
        let (read_half, write_half) = match halves {
            Ok(halves) => halves,
            Err(err) => {
                shared.state.set(SessionState::Closed);
                let _ = socket.shutdown(Shutdown::Both);
                return Err(ClientError::Connect(err));
            }
        };

        shared.state.set(SessionState::Connected);
        let reader = FrameReader::new(read_half, options.max_message_size);
        if let Err(err) = session::spawn_read_loop(reader, Arc::clone(&shared), closed_tx) {
            shared.state.set(SessionState::Closed);
            let _ = socket.shutdown(Shutdown::Both);
            return Err(ClientError::Connect(err));
        }

        info!(
            "session {} established with {:?} encoding",
            negotiated.session_id, negotiated.encoding
        );

        Ok(Self {
            inner: Arc::new(ClientInner {
                shared,
                writer: Mutex::new(FrameWriter::new(write_half)),
                socket,
                encoding: negotiated.encoding,
                session_id: negotiated.session_id,
                protocol_version: negotiated.version,
                next_id: AtomicU64::new(0),
                options: options.clone(),
            }),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn encoding(&self) -> Encoding {
        self.inner.encoding
    }

    pub fn protocol_version(&self) -> u8 {
        self.inner.protocol_version
    }

    pub fn state(&self) -> SessionState {
        self.inner.shared.state.get()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shared.state.is_closed()
    }

    /// Runs a query and returns the raw result payload.
    pub fn query(&self, query: impl Into<Query>) -> Result<Value, ClientError> {
        let msg = ClientMessage::new(RequestKind::Query, self.next_id()).with_query(query.into());
        let reply = self.request(msg)?;
        Ok(reply.data.unwrap_or(Value::Null))
    }

    /// Runs a query and deserializes the result payload into `T`.
    pub fn query_as<T: DeserializeOwned>(&self, query: impl Into<Query>) -> Result<T, ClientError> {
        Ok(serde_json::from_value(self.query(query)?)?)
    }

    pub fn insert<D>(&self, collection: &str, document: &D) -> Result<Document, ClientError>
    where
        D: Serialize + ?Sized,
    {
        let msg = ClientMessage::new(RequestKind::Insert, self.next_id())
            .with_collection(collection)
            .with_data(serde_json::to_value(document)?);
        self.document_request(msg)
    }

    pub fn update<D>(
        &self,
        collection: &str,
        document_id: &str,
        document: &D,
    ) -> Result<Document, ClientError>
    where
        D: Serialize + ?Sized,
    {
        let msg = ClientMessage::new(RequestKind::Update, self.next_id())
            .with_collection(collection)
            .with_document_id(document_id)
            .with_data(serde_json::to_value(document)?);
        self.document_request(msg)
    }

    pub fn delete(&self, collection: &str, document_id: &str) -> Result<Document, ClientError> {
        let msg = ClientMessage::new(RequestKind::Delete, self.next_id())
            .with_collection(collection)
            .with_document_id(document_id);
        self.document_request(msg)
    }

    pub fn list_collections(&self) -> Result<Vec<String>, ClientError> {
        let msg = ClientMessage::new(RequestKind::ListCollections, self.next_id());
        let reply = self.request(msg)?;
        Ok(serde_json::from_value(reply.data.unwrap_or(Value::Null))?)
    }

    /// Starts a change feed for `query`.
    ///
    /// The queue exists before the request is sent, so events the server pushes right
    /// behind its acknowledgment are kept.
    pub fn subscribe(&self, query: impl Into<Query>) -> Result<Subscription, ClientError> {
        let id = self.next_id();
        let shared = &self.inner.shared;
        let events = shared
            .subscriptions
            .register(&id, self.inner.options.subscription_capacity);

        let msg = ClientMessage::new(RequestKind::Subscribe, id.clone()).with_query(query.into());
        if let Err(err) = self.request(msg) {
            shared.subscriptions.remove(&id);
            return Err(err);
        }
        // close() may have cleared the registry while the request was in flight.
        if shared.state.is_closed() {
            shared.subscriptions.remove(&id);
            return Err(ClientError::Closed);
        }

        debug!("subscription {id} active");
        Ok(Subscription::new(id, events, self.clone()))
    }

    /// Ends the subscription `id` and notifies the server. No reply is awaited.
    pub fn unsubscribe(&self, id: &str) -> Result<(), ClientError> {
        if !self.inner.shared.subscriptions.remove(id) {
            return Ok(());
        }
        debug!("subscription {id} removed");
        if self.is_closed() {
            return Ok(());
        }

        let msg = ClientMessage::new(RequestKind::Unsubscribe, id);
        let payload = encode_message(&msg, self.inner.encoding)?;
        self.inner.send(&payload)
    }

    pub fn ping(&self) -> Result<(), ClientError> {
        let msg = ClientMessage::new(RequestKind::Ping, self.next_id());
        let reply = self.request(msg)?;
        match reply.kind {
            ServerMessageKind::Pong => Ok(()),
            other => Err(ClientError::UnexpectedResponse(other)),
        }
    }

    /// Closes the session. Safe to call repeatedly and from any clone.
    pub fn close(&self) {
        self.inner.close();
    }

    fn next_id(&self) -> String {
        (self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }

    fn document_request(&self, msg: ClientMessage) -> Result<Document, ClientError> {
        let reply = self.request(msg)?;
        Ok(serde_json::from_value(reply.data.unwrap_or(Value::Null))?)
    }

    /// Round trip that turns an error envelope into [`ClientError::Server`].
    fn request(&self, msg: ClientMessage) -> Result<ServerMessage, ClientError> {
        let reply = self.inner.round_trip(&msg)?;
        if reply.kind == ServerMessageKind::Error {
            return Err(ClientError::Server(reply.error.unwrap_or_default()));
        }
        Ok(reply)
    }
}

impl ClientInner {
    fn round_trip(&self, msg: &ClientMessage) -> Result<ServerMessage, ClientError> {
        match self.shared.state.get() {
            SessionState::Connected => {}
            SessionState::Closing | SessionState::Closed => return Err(ClientError::Closed),
            SessionState::Connecting | SessionState::Handshaking => {
                return Err(ClientError::NotConnected);
            }
        }

        let payload = encode_message(msg, self.encoding)?;
        let reply = self.shared.pending.register(&msg.id);
        if let Err(err) = self.send(&payload) {
            self.shared.pending.cancel(&msg.id);
            return Err(err);
        }

        self.wait(&msg.id, &reply)
    }

    fn wait(&self, id: &str, reply: &Receiver<ServerMessage>) -> Result<ServerMessage, ClientError> {
        let deadline = match self.options.request_timeout {
            Some(timeout) => channel::after(timeout),
            None => channel::never::<Instant>(),
        };

        crossbeam::select! {
            recv(reply) -> msg => msg.map_err(|_| ClientError::Closed),
            recv(self.shared.closed) -> _ => match reply.try_recv() {
                Ok(msg) => Ok(msg),
                Err(_) => {
                    self.shared.pending.cancel(id);
                    Err(ClientError::Closed)
                }
            },
            recv(deadline) -> _ => {
                self.shared.pending.cancel(id);
                debug!("request {id} timed out");
                Err(ClientError::Timeout)
            },
        }
    }

    fn send(&self, payload: &[u8]) -> Result<(), ClientError> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if self.shared.state.is_closed() {
            return Err(ClientError::Closed);
        }
        writer
            .write_frame(MessageType::Request, self.encoding, payload)
            .map_err(ClientError::Send)
    }

    fn close(&self) {
        let was_open = self.shared.state.begin_close();
        let released = self.shared.subscriptions.clear();
        if released > 0 {
            debug!("closed {released} subscriptions");
        }

        if was_open {
            info!("closing session {}", self.session_id);
            if let Err(err) = self.socket.shutdown(Shutdown::Both) {
                debug!("socket shutdown failed: {err}");
            }
        }
    }
}

fn set_timeouts(stream: &TcpStream, timeout: Option<Duration>) -> io::Result<()> {
    stream.set_read_timeout(timeout)?;
    stream.set_write_timeout(timeout)
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.close();
    }
}
