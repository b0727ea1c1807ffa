use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use super::CodecError;

/// Serialization used for a frame payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    MsgPack,
    Json,
}

impl From<Encoding> for u8 {
    fn from(value: Encoding) -> Self {
        match value {
            Encoding::MsgPack => 0x01,
            Encoding::Json => 0x02,
        }
    }
}

impl TryFrom<u8> for Encoding {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Encoding::MsgPack),
            0x02 => Ok(Encoding::Json),
            other => Err(other),
        }
    }
}

/// Query sent in the `query` field: raw query text or an already compiled filter document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Query {
    Text(String),
    Structured(Value),
}

impl From<&str> for Query {
    fn from(value: &str) -> Self {
        Query::Text(value.to_string())
    }
}

impl From<String> for Query {
    fn from(value: String) -> Self {
        Query::Text(value)
    }
}

impl From<Value> for Query {
    fn from(value: Value) -> Self {
        Query::Structured(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Query,
    Insert,
    Update,
    Delete,
    ListCollections,
    Subscribe,
    Unsubscribe,
    Ping,
}

/// Envelope sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub kind: RequestKind,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Query>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ClientMessage {
    pub fn new(kind: RequestKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            query: None,
            collection: None,
            document_id: None,
            data: None,
        }
    }

    pub fn with_query(mut self, query: Query) -> Self {
        self.query = Some(query);
        self
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    pub fn with_document_id(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMessageKind {
    Result,
    Pong,
    Error,
    Change,
    Subscribed,
    Unsubscribed,
    #[serde(other)]
    Unknown,
}

/// Envelope sent from server to client, either a reply or a push notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub kind: ServerMessageKind,
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<ChangeEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServerMessage {
    pub fn new(kind: ServerMessageKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            data: None,
            change: None,
            error: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_change(mut self, change: ChangeEvent) -> Self {
        self.change = Some(change);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Push notifications are routed to subscriptions instead of pending requests.
    pub fn is_notification(&self) -> bool {
        self.kind == ServerMessageKind::Change && self.change.is_some()
    }
}

/// A document as stored by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub collection: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// Change pushed to a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChangeEvent {
    /// Existing document replayed when the subscription starts.
    Initial { document: Document },
    Insert { new: Document },
    Update {
        #[serde(default)]
        old: Value,
        new: Document,
    },
    Delete {
        #[serde(default)]
        old: Value,
    },
}

/// Serializes an envelope with the given encoding.
///
/// MessagePack output uses named fields so both encodings carry the same map shape.
pub fn encode_message<T: Serialize>(msg: &T, encoding: Encoding) -> Result<Vec<u8>, CodecError> {
    match encoding {
        Encoding::MsgPack => Ok(rmp_serde::to_vec_named(msg)?),
        Encoding::Json => Ok(serde_json::to_vec(msg)?),
    }
}

pub fn decode_message<T: DeserializeOwned>(
    data: &[u8],
    encoding: Encoding,
) -> Result<T, CodecError> {
    match encoding {
        Encoding::MsgPack => Ok(rmp_serde::from_slice(data)?),
        Encoding::Json => Ok(serde_json::from_slice(data)?),
    }
}
