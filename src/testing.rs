//! Scripted bridge for driving a [`Client`] over the in-memory transport.
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc::{UnboundedReceiver, error::TryRecvError};

use crate::{
    client::{Client, ReconnectPolicy},
    config::ClientConfig,
    protocol::{
        Body, CommandKind, ConnectData, ConnectReply, Document, Envelope, Payload, QueryReply,
        TransportEvent, codec,
        memory::{BridgeEnd, MemoryConnector},
    },
};

pub(crate) fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

fn config() -> ClientConfig {
    ClientConfig {
        keyspace: "app".into(),
        reconnect: ReconnectPolicy {
            max_attempts: Some(5),
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(10),
            multiplier: 1,
        },
        ..Default::default()
    }
}

pub(crate) fn client() -> (Client, FakeBridge) {
    let (connector, accepted) = MemoryConnector::new();
    (Client::with_connector(config(), connector), FakeBridge { accepted })
}

/// Client whose every connection attempt is refused.
pub(crate) fn refused_client() -> Client {
    let (connector, _) = MemoryConnector::new();
    connector.refuse(true);
    Client::with_connector(config(), connector)
}

/// Connected client with the [`users_catalog`] bootstrapped.
pub(crate) async fn ready_client() -> (Client, BridgeSession, FakeBridge) {
    let (client, mut bridge) = client();

    let connecting = tokio::spawn({
        let client = client.clone();
        async move { client.connect().await }
    });
    let mut session = bridge.accept().await;
    session.handshake().await;
    connecting.await.unwrap().unwrap();

    session.serve_catalog(&users_catalog()).await;
    client.ready().await.unwrap();
    (client, session, bridge)
}

/// Catalog rows served during bootstrap.
pub(crate) struct CatalogFixture {
    pub columns: Vec<Document>,
    pub indexes: Vec<Document>,
    pub types: Vec<Document>,
}

fn column(table: &str, column: &str, kind: &str, ty: &str) -> Document {
    doc(json!({
        "keyspace_name": "app",
        "table_name": table,
        "column_name": column,
        "kind": kind,
        "type": ty,
        "position": 0,
        "clustering_order": "none",
    }))
}

/// `users` keyed by `user_id` with an index on `email`, and `messages` keyed by
/// `(channel_id, bucket)`.
pub(crate) fn users_catalog() -> CatalogFixture {
    CatalogFixture {
        columns: vec![
            column("users", "user_id", "partition_key", "text"),
            column("users", "email", "regular", "text"),
            column("users", "display_name", "regular", "text"),
            column("users", "tokens", "regular", "list<frozen<tokens_type>>"),
            column("users_email_idx_index", "email", "partition_key", "text"),
            column("users_email_idx_index", "idx_token", "clustering", "bigint"),
            column("messages", "channel_id", "partition_key", "text"),
            column("messages", "bucket", "partition_key", "int"),
            column("messages", "message_id", "clustering", "text"),
        ],
        indexes: vec![doc(json!({
            "keyspace_name": "app",
            "table_name": "users",
            "index_name": "users_email_idx",
            "kind": "COMPOSITES",
            "options": { "target": "email" },
        }))],
        types: vec![doc(json!({
            "keyspace_name": "app",
            "type_name": "tokens_type",
            "field_names": ["token_", "created_date"],
            "field_types": ["text", "timestamp"],
        }))],
    }
}

pub(crate) struct FakeBridge {
    accepted: UnboundedReceiver<BridgeEnd>,
}

impl FakeBridge {
    /// Waits for the client's next transport.
    pub(crate) async fn accept(&mut self) -> BridgeSession {
        let end = self.accepted.recv().await.expect("connector dropped");
        BridgeSession { end }
    }

    pub(crate) fn try_accept(&mut self) -> Option<BridgeSession> {
        self.accepted.try_recv().ok().map(|end| BridgeSession { end })
    }
}

/// Bridge side of one transport.
pub(crate) struct BridgeSession {
    end: BridgeEnd,
}

impl BridgeSession {
    pub(crate) async fn recv(&mut self) -> Envelope {
        let frame = self.end.from_client.recv().await.expect("client hung up");
        let envelope = codec::decode(&frame).expect("client sent a malformed frame");
        assert!(envelope.hash_verified, "client sent a bad hash");
        envelope
    }

    pub(crate) fn try_recv(&mut self) -> Option<Envelope> {
        match self.end.from_client.try_recv() {
            Ok(frame) => Some(codec::decode(&frame).expect("client sent a malformed frame")),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    pub(crate) fn send_bytes(&self, frame: Vec<u8>) {
        let _ = self.end.to_client.send(TransportEvent::Message(frame));
    }

    pub(crate) fn send(&self, envelope: Envelope) {
        self.send_bytes(codec::encode(&envelope).unwrap());
    }

    /// Replies to `request` under its nonce.
    pub(crate) fn reply(&self, request: &Envelope, payload: Payload) {
        let mut envelope = Envelope::new(payload);
        envelope.nonce = request.nonce.clone();
        self.send(envelope);
    }

    /// Replies to `request` with a frame whose hash does not match its data.
    pub(crate) fn reply_tampered(&self, request: &Envelope, payload: Payload) {
        let mut envelope = Envelope::new(payload);
        envelope.nonce = request.nonce.clone();

        let mut frame: Value = serde_json::from_slice(&codec::encode(&envelope).unwrap()).unwrap();
        frame["hash"] = json!("0".repeat(128));
        self.send_bytes(serde_json::to_vec(&frame).unwrap());
    }

    pub(crate) fn close(&self) {
        let _ = self.end.to_client.send(TransportEvent::Closed);
    }

    /// Receives the handshake and acknowledges it.
    pub(crate) async fn handshake(&mut self) -> ConnectData {
        let envelope = self.recv().await;
        let Payload::Connect(Body::Request(data)) = envelope.payload else {
            panic!("expected a handshake, got {}", envelope.command());
        };
        assert_eq!(envelope.nonce, None);

        self.send(Envelope::new(Payload::Connect(Body::Reply(ConnectReply {
            result: "connected".into(),
            error: None,
        }))));
        data
    }

    /// Answers catalog queries until all three have been served. Returns how many
    /// catalog queries were received.
    pub(crate) async fn serve_catalog(&mut self, catalog: &CatalogFixture) -> usize {
        let mut served = 0;
        while served < 3 {
            let request = self.recv().await;
            assert_eq!(request.command(), CommandKind::Select);
            assert_eq!(request.keyspace.as_deref(), Some("system_schema"));

            let rows = match request.table.as_deref() {
                Some("columns") => catalog.columns.clone(),
                Some("indexes") => catalog.indexes.clone(),
                Some("types") => catalog.types.clone(),
                other => panic!("unexpected catalog table {other:?}"),
            };
            self.reply(
                &request,
                Payload::Select(Body::Reply(QueryReply {
                    result: rows,
                    error: None,
                })),
            );
            served += 1;
        }
        served
    }
}
