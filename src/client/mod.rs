//! Connection management.
//!
//! A [`Client`] owns one transport to the bridge at a time. A background driver task
//! opens the transport, sends the handshake, routes inbound envelopes and, once the
//! handshake is acknowledged, bootstraps the [`SchemaCatalog`] through three correlated
//! catalog queries. When the transport drops the driver reconnects according to the
//! configured [`ReconnectPolicy`], repeating the handshake and the bootstrap.
//!
//! # States
//!
//! - `Disconnected` -> `Connecting` when the driver opens a transport.
//! - `Connecting` -> `Connected` when the handshake acknowledgement arrives, or back to
//!   `Disconnected` on a transport error or handshake timeout.
//! - `Connected` -> `Disconnected` when the transport closes, followed by a reconnect.
//!
//! Requests pending when a transport drops are not retried; they resolve through their
//! own timeouts, even if a later transport replies under their nonce.
//!
//! # Example
//! ```no_run
//! use cqlbridge::{Client, ClientConfig, FindOptions, protocol::Document};
//!
//! # async fn run() -> Result<(), cqlbridge::ClientError> {
//! let client = Client::new(ClientConfig::default());
//! client.ready().await?;
//!
//! let mut doc = Document::new();
//! doc.insert("user_id".into(), "42".into());
//! let user = client.model("users").get(&doc, FindOptions::default()).await?;
//! # Ok(())
//! # }
//! ```
mod correlation;
mod reconnect;

use std::{
    fmt,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use log::{debug, error, info, trace, warn};
use serde_json::Value;
use tokio::{
    sync::{broadcast, mpsc, watch},
    task::JoinHandle,
    time::{Instant, sleep, sleep_until, timeout},
};

pub use correlation::{CorrelationTable, Handler};
pub use reconnect::ReconnectPolicy;

use crate::{
    config::ClientConfig,
    error::ClientError,
    mapping::ModelMapper,
    protocol::{
        Body, CommandKind, ConnectData, ConnectReply, Connector, Document, Envelope, Link,
        MutationReply, Nonce, Payload, QueryReply, RawData, ShutdownData, TransportEvent,
        WsConnector, codec,
    },
    schema::{CatalogQuery, ColumnRow, IndexRow, SchemaCatalog, TypeRow, parse_rows},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Lifecycle notifications, delivered to every [subscriber](Client::subscribe).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Handshake acknowledged.
    Connected,
    /// Schema catalog rebuilt; document operations are usable.
    Ready,
    Error(String),
    /// Transport closed; a reconnect follows unless the budget is spent.
    Closed,
    ReconnectExhausted,
}

#[derive(Debug, Clone, Default)]
pub struct RawOptions {
    pub table: Option<String>,
    pub keyspace: Option<String>,
    pub limit: Option<i32>,
}

/// Catalog rows collected for one connection.
#[derive(Default)]
struct Bootstrap {
    generation: u64,
    columns: Option<Vec<ColumnRow>>,
    indexes: Option<Vec<IndexRow>>,
    types: Option<Vec<TypeRow>>,
}

impl Bootstrap {
    fn reset(&mut self, generation: u64) {
        *self = Bootstrap {
            generation,
            ..Default::default()
        };
    }

    fn store(&mut self, query: CatalogQuery, rows: Vec<Document>) -> Result<(), serde_json::Error> {
        match query {
            CatalogQuery::Columns => self.columns = Some(parse_rows(rows)?),
            CatalogQuery::Indexes => self.indexes = Some(parse_rows(rows)?),
            CatalogQuery::Types => self.types = Some(parse_rows(rows)?),
        }
        Ok(())
    }

    /// Derives the catalog once all three row sets are in.
    fn complete(&mut self) -> Option<SchemaCatalog> {
        let (Some(columns), Some(indexes), Some(types)) =
            (&self.columns, &self.indexes, &self.types)
        else {
            return None;
        };
        let catalog = SchemaCatalog::derive(columns, indexes, types);
        self.reset(self.generation);
        Some(catalog)
    }
}

#[derive(Default)]
struct Tasks {
    driver: Option<JoinHandle<()>>,
    sweeper: Option<JoinHandle<()>>,
}

struct Shared {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    correlation: Arc<CorrelationTable>,
    state: watch::Sender<ConnectionState>,
    catalog: watch::Sender<Option<Arc<SchemaCatalog>>>,
    events: broadcast::Sender<ClientEvent>,
    shutdown: watch::Sender<bool>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    bootstrap: Mutex<Bootstrap>,
    generation: AtomicU64,
    tasks: Mutex<Tasks>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn stopped(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

impl Shared {
    fn emit(&self, event: ClientEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("connection state {previous} -> {state}");
        }
    }

    fn start_sweeper(&self) {
        let mut tasks = lock(&self.tasks);
        if tasks.sweeper.as_ref().is_none_or(JoinHandle::is_finished) {
            let correlation = Arc::clone(&self.correlation);
            tasks.sweeper = Some(tokio::spawn(async move { correlation.run_expiry().await }));
        }
    }

    fn start(self: &Arc<Self>) {
        self.start_sweeper();
        let mut tasks = lock(&self.tasks);
        if tasks.driver.as_ref().is_none_or(JoinHandle::is_finished) {
            self.shutdown.send_replace(false);
            tasks.driver = Some(tokio::spawn(Arc::clone(self).drive()));
        }
    }

    fn detach(&self) {
        lock(&self.outbound).take();
        self.set_state(ConnectionState::Disconnected);
    }

    fn send(&self, envelope: &Envelope) -> Result<(), ClientError> {
        let frame = codec::encode(envelope)?;
        let outbound = lock(&self.outbound);
        let tx = outbound.as_ref().ok_or(ClientError::NotConnected)?;
        tx.send(frame).map_err(|_| ClientError::NotConnected)?;
        trace!("sent {} envelope", envelope.command());
        Ok(())
    }

    async fn drive(self: Arc<Self>) {
        let mut attempt = 0;
        loop {
            self.set_state(ConnectionState::Connecting);
            let opened = tokio::select! {
                opened = self.connector.open() => opened,
                _ = stopped(self.shutdown.subscribe()) => {
                    debug!("connection driver stopped while opening transport");
                    break;
                }
            };

            match opened {
                Ok(link) => {
                    info!("transport open, sending handshake");
                    let acknowledged = self.run_session(link).await;
                    self.detach();
                    if acknowledged {
                        attempt = 0;
                    }
                    if !self.stopping() {
                        if acknowledged {
                            error!("connection closed, reconnecting");
                            self.emit(ClientEvent::Closed);
                        } else {
                            error!("handshake did not complete, retrying");
                        }
                    }
                }
                Err(e) => {
                    error!("failed to open transport: {e}");
                    self.detach();
                    self.emit(ClientEvent::Error(e.to_string()));
                }
            }

            if self.stopping() {
                debug!("connection driver stopped");
                break;
            }

            let Some(delay) = self.config.reconnect.delay_for(attempt) else {
                error!("giving up after {attempt} reconnect attempts");
                self.emit(ClientEvent::ReconnectExhausted);
                break;
            };
            attempt += 1;

            tokio::select! {
                _ = sleep(delay) => {}
                _ = stopped(self.shutdown.subscribe()) => break,
            }
        }
    }

    /// Runs one transport until it closes. Returns whether the handshake was acknowledged.
    async fn run_session(self: &Arc<Self>, link: Link) -> bool {
        let Link {
            outbound,
            mut inbound,
        } = link;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *lock(&self.outbound) = Some(outbound);

        let handshake = Envelope::new(Payload::Connect(Body::Request(ConnectData::from(
            &self.config,
        ))));
        if let Err(e) = self.send(&handshake) {
            error!("failed to send handshake: {e}");
            return false;
        }

        let deadline = Instant::now() + self.config.connect_timeout;
        let mut acknowledged = false;
        loop {
            let waiting = !acknowledged;
            let event = tokio::select! {
                event = inbound.recv() => event,
                _ = sleep_until(deadline), if waiting => {
                    warn!("handshake not acknowledged within {:?}", self.config.connect_timeout);
                    self.emit(ClientEvent::Error("handshake timed out".into()));
                    break;
                }
                _ = stopped(self.shutdown.subscribe()) => break,
            };

            match event {
                Some(TransportEvent::Message(bytes)) => {
                    acknowledged |= self.handle_message(&bytes, generation);
                }
                Some(TransportEvent::Error(e)) => {
                    warn!("transport error: {e}");
                    self.emit(ClientEvent::Error(e));
                }
                Some(TransportEvent::Closed) | None => break,
            }
        }
        acknowledged
    }

    /// Routes one inbound frame. Returns `true` if it acknowledged the handshake.
    fn handle_message(self: &Arc<Self>, bytes: &[u8], generation: u64) -> bool {
        let envelope = match codec::decode(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("discarding message: {e}");
                return false;
            }
        };
        trace!("received {} envelope", envelope.command());

        if let Some(nonce) = envelope.nonce.clone() {
            self.correlation.deliver(&nonce, generation, envelope);
            return false;
        }

        match &envelope.payload {
            Payload::Connect(Body::Reply(reply)) => {
                self.acknowledge(envelope.hash_verified, reply, generation)
            }
            Payload::Connect(Body::Request(_))
            | Payload::Select(_)
            | Payload::Insert(_)
            | Payload::Update(_)
            | Payload::Delete(_)
            | Payload::Raw(_)
            | Payload::Shutdown(_) => {
                debug!("ignoring unsolicited {} envelope", envelope.command());
                false
            }
        }
    }

    fn acknowledge(self: &Arc<Self>, verified: bool, reply: &ConnectReply, generation: u64) -> bool {
        if *self.state.borrow() == ConnectionState::Connected {
            debug!("ignoring repeated handshake acknowledgement");
            return false;
        }
        if !verified {
            warn!("discarding handshake acknowledgement with a bad hash");
            return false;
        }
        if let Some(error) = &reply.error {
            error!("bridge rejected handshake: {error}");
            self.emit(ClientEvent::Error(error.clone()));
            return false;
        }

        info!("handshake acknowledged by bridge");
        self.set_state(ConnectionState::Connected);
        self.emit(ClientEvent::Connected);
        self.bootstrap(generation);
        true
    }

    fn bootstrap(self: &Arc<Self>, generation: u64) {
        lock(&self.bootstrap).reset(generation);

        for query in CatalogQuery::ALL {
            let nonce = Nonce::generate();
            let shared = Arc::downgrade(self);
            self.correlation.register(
                nonce.clone(),
                generation,
                Box::new(move |outcome| {
                    if let Some(shared) = shared.upgrade() {
                        shared.collect(query, generation, outcome);
                    }
                }),
            );

            let envelope = query.envelope(&self.config.keyspace, nonce);
            if let Err(e) = self.send(&envelope) {
                warn!("failed to send catalog query {query}: {e}");
            }
        }
    }

    fn collect(&self, query: CatalogQuery, generation: u64, outcome: Option<Envelope>) {
        let Some(envelope) = outcome else {
            warn!("catalog query {query} timed out");
            return;
        };
        if !envelope.hash_verified {
            warn!("discarding reply to catalog query {query} with a bad hash");
            return;
        }
        let reply = match envelope.payload {
            Payload::Select(Body::Reply(reply)) => reply,
            other => {
                warn!("unexpected {} reply to catalog query {query}", other.command());
                return;
            }
        };
        if let Some(error) = reply.error {
            warn!("catalog query {query} failed: {error}");
            return;
        }

        let catalog = {
            let mut bootstrap = lock(&self.bootstrap);
            if bootstrap.generation != generation {
                debug!("ignoring {query} rows from an earlier connection");
                return;
            }
            if let Err(e) = bootstrap.store(query, reply.result) {
                warn!("malformed rows from {query}: {e}");
                return;
            }
            bootstrap.complete()
        };

        if let Some(catalog) = catalog {
            info!("schema ready, {} tables", catalog.len());
            self.catalog.send_replace(Some(Arc::new(catalog)));
            self.emit(ClientEvent::Ready);
        }
    }
}

/// Handle to a bridge connection. Cheap to clone; clones share the connection.
///
/// The connection driver keeps running until [`Client::close`] is called or the
/// reconnect budget is spent.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

impl Client {
    /// Client talking WebSocket to `config.bridge`.
    pub fn new(config: ClientConfig) -> Self {
        let connector = WsConnector::new(config.bridge.url());
        Self::with_connector(config, connector)
    }

    pub fn with_connector(config: ClientConfig, connector: impl Connector) -> Self {
        let (events, _) = broadcast::channel(64);
        let shared = Shared {
            correlation: Arc::new(CorrelationTable::new(config.request_timeout)),
            connector: Arc::new(connector),
            state: watch::Sender::new(ConnectionState::Disconnected),
            catalog: watch::Sender::new(None),
            events,
            shutdown: watch::Sender::new(false),
            outbound: Mutex::new(None),
            bootstrap: Mutex::new(Bootstrap::default()),
            generation: AtomicU64::new(0),
            tasks: Mutex::new(Tasks::default()),
            config,
        };

        Self {
            shared: Arc::new(shared),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Latest schema catalog. After a reconnect this is the previous connection's
    /// catalog until the new bootstrap completes.
    pub fn catalog(&self) -> Option<Arc<SchemaCatalog>> {
        self.shared.catalog.borrow().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events.subscribe()
    }

    /// Starts the connection driver and waits for the handshake acknowledgement.
    /// Returns immediately when already connected.
    pub async fn connect(&self) -> Result<(), ClientError> {
        if self.state() == ConnectionState::Connected {
            return Ok(());
        }
        self.shared.start();

        let wait = self.shared.config.connect_timeout;
        let mut state = self.shared.state.subscribe();
        let acknowledged = timeout(wait, async move {
            state
                .wait_for(|state| *state == ConnectionState::Connected)
                .await
                .is_ok()
        })
        .await;

        match acknowledged {
            Ok(true) => Ok(()),
            _ => Err(ClientError::HandshakeTimeout(wait)),
        }
    }

    /// Connects and waits until a schema catalog is available.
    pub async fn ready(&self) -> Result<Arc<SchemaCatalog>, ClientError> {
        self.connect().await?;

        let wait = self.shared.config.connect_timeout;
        let mut catalog = self.shared.catalog.subscribe();
        let ready = timeout(wait, async move {
            catalog
                .wait_for(Option::is_some)
                .await
                .ok()
                .and_then(|current| (*current).clone())
        })
        .await;

        match ready {
            Ok(Some(catalog)) => Ok(catalog),
            _ => Err(ClientError::SchemaTimeout(wait)),
        }
    }

    /// Sends a best-effort shutdown notice, stops the driver and resolves every pending
    /// request with its empty outcome.
    pub async fn close(&self) {
        self.shared.shutdown.send_replace(true);

        let notice = Envelope::new(Payload::Shutdown(Body::Request(ShutdownData {
            reason: "client closing".into(),
        })));
        if let Err(e) = self.shared.send(&notice) {
            debug!("shutdown notice not sent: {e}");
        }

        let (driver, sweeper) = {
            let mut tasks = lock(&self.shared.tasks);
            (tasks.driver.take(), tasks.sweeper.take())
        };
        if let Some(driver) = driver {
            let _ = driver.await;
        }
        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }

        self.shared.detach();
        let drained = self.shared.correlation.drain();
        if drained > 0 {
            debug!("resolved {drained} pending requests on close");
        }
        info!("client closed");
    }

    /// Sends `envelope` under a fresh nonce and waits for the correlated reply.
    ///
    /// `Ok(None)` means no reply arrived within the request timeout. A reply that fails
    /// hash verification is a [`ClientError::Integrity`] error.
    pub async fn request(&self, envelope: Envelope) -> Result<Option<Envelope>, ClientError> {
        self.shared.start_sweeper();

        let nonce = Nonce::generate();
        let envelope = envelope.with_nonce(nonce.clone());
        let session = self.shared.generation.load(Ordering::SeqCst);
        let reply = self
            .shared
            .correlation
            .register_waiter(nonce.clone(), session);

        match self.shared.send(&envelope) {
            Ok(()) => {}
            Err(ClientError::NotConnected) => {
                warn!("request {nonce} issued without a transport, it will time out");
            }
            Err(e) => {
                self.shared.correlation.forget(&nonce);
                return Err(e);
            }
        }

        match reply.await {
            Ok(Some(envelope)) if !envelope.hash_verified => Err(ClientError::Integrity { nonce }),
            Ok(outcome) => Ok(outcome),
            Err(_) => Ok(None),
        }
    }

    /// Runs a raw CQL statement. `Ok(None)` on timeout.
    pub async fn execute(
        &self,
        query: impl Into<String>,
        values: Vec<Value>,
        options: RawOptions,
    ) -> Result<Option<Vec<Document>>, ClientError> {
        let mut envelope = Envelope::new(Payload::Raw(Body::Request(RawData {
            query: query.into(),
            values,
            limit: options.limit,
        })));
        envelope.table = options.table;
        envelope.keyspace = options.keyspace;

        let Some(reply) = self.request(envelope).await? else {
            return Ok(None);
        };
        Ok(Some(query_reply(reply, CommandKind::Raw)?.result))
    }

    /// Document mapper for `table` in the configured keyspace.
    pub fn model(&self, table: impl Into<String>) -> ModelMapper {
        ModelMapper::new(self.clone(), table)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state())
            .field("keyspace", &self.shared.config.keyspace)
            .field("pending", &self.shared.correlation.len())
            .finish_non_exhaustive()
    }
}

/// Extracts a `select`/`raw` reply, surfacing a bridge-reported error.
pub(crate) fn query_reply(
    envelope: Envelope,
    expected: CommandKind,
) -> Result<QueryReply, ClientError> {
    let actual = envelope.command();
    let reply = match envelope.payload {
        Payload::Select(body) if expected == CommandKind::Select => body.into_reply(),
        Payload::Raw(body) if expected == CommandKind::Raw => body.into_reply(),
        Payload::Connect(_)
        | Payload::Select(_)
        | Payload::Insert(_)
        | Payload::Update(_)
        | Payload::Delete(_)
        | Payload::Raw(_)
        | Payload::Shutdown(_) => None,
    };

    let reply = reply.ok_or(ClientError::UnexpectedReply { expected, actual })?;
    match reply.error {
        Some(error) => Err(ClientError::FailedQuery(error)),
        None => Ok(reply),
    }
}

/// Extracts an `insert`/`update`/`delete` reply, surfacing a bridge-reported error.
pub(crate) fn mutation_reply(
    envelope: Envelope,
    expected: CommandKind,
) -> Result<MutationReply, ClientError> {
    let actual = envelope.command();
    let reply = match envelope.payload {
        Payload::Insert(body) if expected == CommandKind::Insert => body.into_reply(),
        Payload::Update(body) if expected == CommandKind::Update => body.into_reply(),
        Payload::Delete(body) if expected == CommandKind::Delete => body.into_reply(),
        Payload::Connect(_)
        | Payload::Select(_)
        | Payload::Insert(_)
        | Payload::Update(_)
        | Payload::Delete(_)
        | Payload::Raw(_)
        | Payload::Shutdown(_) => None,
    };

    let reply = reply.ok_or(ClientError::UnexpectedReply { expected, actual })?;
    match reply.error {
        Some(error) => Err(ClientError::FailedQuery(error)),
        None => Ok(reply),
    }
}
