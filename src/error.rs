use std::time::Duration;

use thiserror::Error;

use crate::protocol::{CodecError, CommandKind, Nonce};

/// List of errors a client operation can return.
///
/// A request that gets no reply within the request timeout is not an error; the
/// operation resolves to its empty outcome (`None`, an empty set or `false`).
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("handshake not acknowledged within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("schema catalog not ready within {0:?}")]
    SchemaTimeout(Duration),

    #[error("not connected to the bridge")]
    NotConnected,

    #[error("table '{0}' is not in the schema catalog")]
    TableNotFound(String),

    #[error("missing required keys for '{table}': {}", describe_requirements(.primary, .indexes))]
    MissingKeys {
        table: String,
        primary: Vec<String>,
        indexes: Vec<Vec<String>>,
    },

    #[error("reply to request {nonce} failed hash verification")]
    Integrity { nonce: Nonce },

    #[error("query failed: {0}")]
    FailedQuery(String),

    #[error("expected a {expected} reply, received {actual}")]
    UnexpectedReply {
        expected: CommandKind,
        actual: CommandKind,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),
}

fn describe_requirements(primary: &[String], indexes: &[Vec<String>]) -> String {
    std::iter::once(primary)
        .chain(indexes.iter().map(Vec::as_slice))
        .filter(|keys| !keys.is_empty())
        .map(|keys| keys.join(", "))
        .collect::<Vec<_>>()
        .join(" or ")
}
