//! Envelope encoding, decoding and integrity hashing.
//!
//! The `data` member of an envelope is serialized once into its canonical JSON form.
//! Those exact bytes are hashed and embedded in the outgoing frame, so a receiver that
//! hashes the raw `data` it got back reproduces the sender's digest.
//!
//! A digest mismatch on decode is not an error: the envelope is returned with
//! [`Envelope::hash_verified`] cleared and the caller decides what to do with it.
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use sha2::{Digest, Sha512};
use thiserror::Error;

use super::{CommandKind, Envelope, Nonce, Payload};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode envelope: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("malformed envelope: {0}")]
    Deserialize(#[source] serde_json::Error),
}

#[derive(Serialize)]
struct OutboundFrame<'a> {
    hash: &'a str,
    command: CommandKind,
    table: Option<&'a str>,
    keyspace: Option<&'a str>,
    length: usize,
    nonce: Option<&'a Nonce>,
    #[serde(rename = "type")]
    type_hint: Option<&'a str>,
    data: &'a RawValue,
}

#[derive(Deserialize)]
struct InboundFrame {
    #[serde(default)]
    hash: String,
    command: CommandKind,
    #[serde(default)]
    table: Option<String>,
    #[serde(default)]
    keyspace: Option<String>,
    #[serde(default)]
    length: usize,
    #[serde(default)]
    nonce: Option<Nonce>,
    #[serde(rename = "type", default)]
    type_hint: Option<String>,
    data: Box<RawValue>,
}

/// `len(command) + len(data)`, in bytes.
pub fn frame_length(command: CommandKind, data: &str) -> usize {
    command.as_str().len() + data.len()
}

/// Lowercase hex SHA-512 of `command ++ length ++ data`.
pub fn compute_hash(command: CommandKind, length: usize, data: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(command.as_str().as_bytes());
    hasher.update(length.to_string().as_bytes());
    hasher.update(data.as_bytes());

    format!("{:x}", hasher.finalize())
}

/// Serializes an envelope into a frame. `length` and `hash` are always recomputed
/// from the payload; the values stored on the envelope are ignored.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    let data = envelope.payload.to_data().map_err(CodecError::Serialize)?;
    let command = envelope.command();
    let length = frame_length(command, &data);
    let hash = compute_hash(command, length, &data);
    let data = RawValue::from_string(data).map_err(CodecError::Serialize)?;

    let frame = OutboundFrame {
        hash: &hash,
        command,
        table: envelope.table.as_deref(),
        keyspace: envelope.keyspace.as_deref(),
        length,
        nonce: envelope.nonce.as_ref(),
        type_hint: envelope.type_hint.as_deref(),
        data: &data,
    };

    serde_json::to_vec(&frame).map_err(CodecError::Serialize)
}

pub fn decode(bytes: &[u8]) -> Result<Envelope, CodecError> {
    let frame: InboundFrame = serde_json::from_slice(bytes).map_err(CodecError::Deserialize)?;
    let data = frame.data.get();
    let hash_verified = compute_hash(frame.command, frame.length, data) == frame.hash;
    let payload = Payload::from_data(frame.command, data).map_err(CodecError::Deserialize)?;

    Ok(Envelope {
        payload,
        table: frame.table,
        keyspace: frame.keyspace,
        nonce: frame.nonce,
        type_hint: frame.type_hint,
        hash: frame.hash,
        length: frame.length,
        hash_verified,
    })
}

/// Recomputes the digest of `(command, length, payload)` and compares it with the
/// envelope's stored hash.
pub fn verify(envelope: &Envelope) -> bool {
    match envelope.payload.to_data() {
        Ok(data) => compute_hash(envelope.command(), envelope.length, &data) == envelope.hash,
        Err(_) => false,
    }
}
