//! Client-bridge communication protocol.
//!
//! This module defines the message protocol spoken between a cqlbridge client and the
//! bridging server, including the envelope format, the integrity hash and the transport
//! abstraction used to move frames over the network.
//!
//! # Overview
//!
//! Every exchange is a self-describing JSON envelope. The envelope header names the
//! command, the target keyspace/table and, for correlated requests, a nonce. The body
//! (`data`) is command specific: requests and replies for the same command share a
//! command tag but carry different shapes.
//!
//! # Key Components
//!
//! - [`Envelope`]: A complete protocol message; header fields, integrity hash and payload.
//! - [`Payload`]: Tagged union of the per-command bodies.
//! - [`codec`]: Encoding, decoding and hash verification of envelopes.
//! - [`Connector`]: Abstraction over a bidirectional message transport (e.g., WebSocket).
//!
//! # Wire Format
//!
//! Envelopes are serialized as a single JSON object:
//!
//! - `command` is the lowercase command tag and `data` the command body.
//! - `length` is the byte length of the command tag plus the byte length of `data`.
//! - `hash` is the hex SHA-512 digest of `command ++ length ++ data`.
//!
//! `data` is serialized exactly once; the same bytes are hashed and transmitted, so the
//! receiver can verify the digest over the raw bytes it received.
//!
//! # See Also
//!
//! - [`client`](crate::client): Correlates replies to outstanding requests.
pub mod codec;
mod envelope;
mod request;
mod response;
mod transport;

pub use codec::CodecError;
pub use envelope::{Body, CommandKind, Document, Envelope, Nonce, Payload};
pub use request::{
    ConnectData, Credentials, DeleteData, InsertData, RawData, SelectData, ShutdownData,
    UpdateData,
};
pub use response::{ConnectReply, MutationReply, QueryReply};
pub use transport::{Connector, Link, TransportError, TransportEvent, WsConnector};

#[cfg(test)]
pub(crate) use transport::memory;
