/// Tokio-based WebSocket transport for the RTP signaling client
///
/// This crate provides the signaling channel abstraction ([`Transport`],
/// [`TransportFactory`]) and a concrete implementation over
/// tokio-tungstenite, with optional relaxed TLS for lab deployments.
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async_tls_with_config};

pub mod tls;

pub use tls::{FileKeyLog, TlsOptions};

/// An event produced by the transport layer.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The transport has successfully connected.
    Connected,
    /// A complete text or binary frame has been received from the server.
    FrameReceived(Bytes),
    /// The connection was lost.
    Disconnected,
}

/// Represents an active signaling connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one frame to the server.
    async fn send_frame(&self, frame: &[u8]) -> Result<(), anyhow::Error>;

    /// Closes the connection.
    async fn disconnect(&self);
}

/// A factory responsible for creating new transport instances.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Creates a new transport and returns it, along with a stream of events.
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error>;
}

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

const EVENT_CHANNEL_SIZE: usize = 100;

/// Default signaling server URL.
pub const DEFAULT_URL: &str = "ws://localhost:8443/";

/// Tokio-based WebSocket transport
pub struct TokioWebSocketTransport {
    ws_sink: Arc<Mutex<Option<WsSink>>>,
    is_connected: Arc<Mutex<bool>>,
}

impl TokioWebSocketTransport {
    fn new(sink: WsSink) -> Self {
        Self {
            ws_sink: Arc::new(Mutex::new(Some(sink))),
            is_connected: Arc::new(Mutex::new(true)),
        }
    }
}

#[async_trait]
impl Transport for TokioWebSocketTransport {
    async fn send_frame(&self, frame: &[u8]) -> Result<(), anyhow::Error> {
        let mut sink_guard = self.ws_sink.lock().await;
        let sink = sink_guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Socket is closed"))?;

        // The signaling protocol is JSON, so every frame goes out as text.
        let text = std::str::from_utf8(frame)
            .map_err(|e| anyhow::anyhow!("Frame is not valid UTF-8: {}", e))?;

        debug!("--> Sending frame: {} bytes", frame.len());
        sink.send(Message::text(text.to_owned()))
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket send error: {}", e))?;
        Ok(())
    }

    async fn disconnect(&self) {
        let mut is_connected = self.is_connected.lock().await;
        if *is_connected {
            *is_connected = false;
            if let Some(mut sink) = self.ws_sink.lock().await.take() {
                if let Err(e) = sink.close().await {
                    debug!("Error closing websocket sink: {e}");
                }
            }
        }
    }
}

/// Factory for creating Tokio WebSocket transports
pub struct TokioWebSocketTransportFactory {
    url: String,
    tls: TlsOptions,
}

impl TokioWebSocketTransportFactory {
    /// Create a factory dialing `url` with the given TLS options
    pub fn new(url: impl Into<String>, tls: TlsOptions) -> Self {
        Self {
            url: url.into(),
            tls,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Default for TokioWebSocketTransportFactory {
    fn default() -> Self {
        Self::new(DEFAULT_URL, TlsOptions::default())
    }
}

#[async_trait]
impl TransportFactory for TokioWebSocketTransportFactory {
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        let connector = tls::connector_for(&self.url, &self.tls)?;

        info!("Dialing {}", self.url);
        let (client, _response) =
            connect_async_tls_with_config(self.url.as_str(), None, false, connector)
                .await
                .map_err(|e| anyhow::anyhow!("WebSocket connect failed: {}", e))?;

        let (sink, stream) = client.split();

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let transport = Arc::new(TokioWebSocketTransport::new(sink));

        let _ = event_tx.send(TransportEvent::Connected).await;

        tokio::task::spawn(read_pump(stream, event_tx));

        Ok((transport, event_rx))
    }
}

async fn read_pump(mut stream: WsStream, event_tx: mpsc::Sender<TransportEvent>) {
    loop {
        match stream.next().await {
            Some(Ok(msg)) => {
                if msg.is_text() || msg.is_binary() {
                    let data = msg.into_data();
                    debug!("<-- Received WebSocket message: {} bytes", data.len());
                    if event_tx
                        .send(TransportEvent::FrameReceived(data))
                        .await
                        .is_err()
                    {
                        warn!("Event receiver dropped, closing read pump");
                        break;
                    }
                } else if msg.is_close() {
                    trace!("Received close frame");
                    break;
                }
            }
            Some(Err(e)) => {
                error!("Error reading from websocket: {e}");
                break;
            }
            None => {
                trace!("Websocket stream ended");
                break;
            }
        }
    }

    let _ = event_tx.send(TransportEvent::Disconnected).await;
}
