use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{
    codec::{self, CodecError},
    request::{ConnectData, DeleteData, InsertData, RawData, SelectData, ShutdownData, UpdateData},
    response::{ConnectReply, MutationReply, QueryReply},
};

/// Column (or attribute) name to value map. Keeps insertion order, so two documents
/// built the same way always serialize to the same bytes.
pub type Document = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Connect,
    Select,
    Insert,
    Update,
    Delete,
    Raw,
    Shutdown,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Connect => "connect",
            CommandKind::Select => "select",
            CommandKind::Insert => "insert",
            CommandKind::Update => "update",
            CommandKind::Delete => "delete",
            CommandKind::Raw => "raw",
            CommandKind::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request identifier correlating a request with its reply.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Nonce(String);

impl Nonce {
    /// Random 128-bit (UUIDv4) nonce.
    pub fn generate() -> Self {
        Nonce(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Nonce {
    fn from(value: &str) -> Self {
        Nonce(value.to_string())
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Body of a command: the request shape sent by the client or the reply shape sent
/// back by the bridge. Request shapes carry at least one field their reply never has,
/// so they are tried first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Body<Q, R> {
    Request(Q),
    Reply(R),
}

impl<Q, R> Body<Q, R> {
    pub fn reply(&self) -> Option<&R> {
        match self {
            Body::Reply(reply) => Some(reply),
            Body::Request(_) => None,
        }
    }

    pub fn into_reply(self) -> Option<R> {
        match self {
            Body::Reply(reply) => Some(reply),
            Body::Request(_) => None,
        }
    }
}

/// Command payload, keyed by the command tag.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Connect(Body<ConnectData, ConnectReply>),
    Select(Body<SelectData, QueryReply>),
    Insert(Body<InsertData, MutationReply>),
    Update(Body<UpdateData, MutationReply>),
    Delete(Body<DeleteData, MutationReply>),
    Raw(Body<RawData, QueryReply>),
    Shutdown(Body<ShutdownData, MutationReply>),
}

impl Payload {
    pub fn command(&self) -> CommandKind {
        match self {
            Payload::Connect(_) => CommandKind::Connect,
            Payload::Select(_) => CommandKind::Select,
            Payload::Insert(_) => CommandKind::Insert,
            Payload::Update(_) => CommandKind::Update,
            Payload::Delete(_) => CommandKind::Delete,
            Payload::Raw(_) => CommandKind::Raw,
            Payload::Shutdown(_) => CommandKind::Shutdown,
        }
    }

    /// Serializes the body into the canonical `data` string.
    pub(crate) fn to_data(&self) -> Result<String, serde_json::Error> {
        match self {
            Payload::Connect(body) => serde_json::to_string(body),
            Payload::Select(body) => serde_json::to_string(body),
            Payload::Insert(body) => serde_json::to_string(body),
            Payload::Update(body) => serde_json::to_string(body),
            Payload::Delete(body) => serde_json::to_string(body),
            Payload::Raw(body) => serde_json::to_string(body),
            Payload::Shutdown(body) => serde_json::to_string(body),
        }
    }

    pub(crate) fn from_data(command: CommandKind, data: &str) -> Result<Self, serde_json::Error> {
        Ok(match command {
            CommandKind::Connect => Payload::Connect(serde_json::from_str(data)?),
            CommandKind::Select => Payload::Select(serde_json::from_str(data)?),
            CommandKind::Insert => Payload::Insert(serde_json::from_str(data)?),
            CommandKind::Update => Payload::Update(serde_json::from_str(data)?),
            CommandKind::Delete => Payload::Delete(serde_json::from_str(data)?),
            CommandKind::Raw => Payload::Raw(serde_json::from_str(data)?),
            CommandKind::Shutdown => Payload::Shutdown(serde_json::from_str(data)?),
        })
    }
}

/// A complete protocol message.
///
/// `hash` and `length` are only meaningful once the envelope has been
/// [sealed](Envelope::sealed) or decoded. `hash_verified` is set by the decoder and
/// is `false` when the received digest did not match the received bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub payload: Payload,
    pub table: Option<String>,
    pub keyspace: Option<String>,
    pub nonce: Option<Nonce>,
    /// Hints the bridge toward its user-defined-type decode path.
    pub type_hint: Option<String>,
    pub hash: String,
    pub length: usize,
    pub hash_verified: bool,
}

impl Envelope {
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            table: None,
            keyspace: None,
            nonce: None,
            type_hint: None,
            hash: String::new(),
            length: 0,
            hash_verified: false,
        }
    }

    pub fn command(&self) -> CommandKind {
        self.payload.command()
    }

    pub fn on_table(mut self, keyspace: impl Into<String>, table: impl Into<String>) -> Self {
        self.keyspace = Some(keyspace.into());
        self.table = Some(table.into());
        self
    }

    pub fn with_nonce(mut self, nonce: Nonce) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn with_type_hint(mut self, hint: Option<String>) -> Self {
        self.type_hint = hint;
        self
    }

    /// Fills in `length` and `hash` from the current payload.
    pub fn sealed(mut self) -> Result<Self, CodecError> {
        let data = self.payload.to_data().map_err(CodecError::Serialize)?;
        let command = self.command();
        self.length = codec::frame_length(command, &data);
        self.hash = codec::compute_hash(command, self.length, &data);
        self.hash_verified = true;
        Ok(self)
    }
}
