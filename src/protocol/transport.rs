use std::io;

use futures_util::{SinkExt, StreamExt, future::BoxFuture};
use log::{debug, trace, warn};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport IO error: {0}")]
    Io(#[from] io::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("transport closed")]
    Closed,
}

/// Inbound transport notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Message(Vec<u8>),
    Error(String),
    Closed,
}

/// An open transport: frames go out through `outbound`, events come in on `inbound`.
/// Dropping `outbound` closes the transport.
#[derive(Debug)]
pub struct Link {
    pub outbound: mpsc::UnboundedSender<Vec<u8>>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Opens transports to the bridge. A successful `open` is the transport's "open" event.
pub trait Connector: Send + Sync + 'static {
    fn open(&self) -> BoxFuture<'_, Result<Link, TransportError>>;
}

/// WebSocket transport; one text frame per envelope.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Connector for WsConnector {
    fn open(&self) -> BoxFuture<'_, Result<Link, TransportError>> {
        Box::pin(async move {
            let (stream, _) = connect_async(self.url.as_str()).await?;
            debug!("websocket open to {}", self.url);

            let (mut sink, mut source) = stream.split();
            let (outbound, mut frames) = mpsc::unbounded_channel::<Vec<u8>>();
            let (events, inbound) = mpsc::unbounded_channel();

            tokio::spawn(async move {
                while let Some(frame) = frames.recv().await {
                    let text = match String::from_utf8(frame) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("dropping non UTF-8 frame: {e}");
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        warn!("websocket send failed: {e}");
                        break;
                    }
                }
                let _ = sink.close().await;
            });

            tokio::spawn(async move {
                while let Some(message) = source.next().await {
                    let event = match message {
                        Ok(Message::Text(text)) => TransportEvent::Message(text.into_bytes()),
                        Ok(Message::Binary(bytes)) => TransportEvent::Message(bytes),
                        Ok(Message::Close(_)) => break,
                        Ok(other) => {
                            trace!("ignoring websocket control frame {other:?}");
                            continue;
                        }
                        Err(e) => TransportEvent::Error(e.to_string()),
                    };
                    let failed = matches!(event, TransportEvent::Error(_));
                    if events.send(event).is_err() || failed {
                        break;
                    }
                }
                let _ = events.send(TransportEvent::Closed);
            });

            Ok(Link { outbound, inbound })
        })
    }
}
