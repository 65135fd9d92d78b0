//! Transport seam between the session logic and the WebSocket.
//!
//! Session code only ever sees [`SynthTransport`]: send a control message,
//! wait a bounded time for the next frame, check liveness, close. The
//! production implementation, [`WsTransport`], owns one background task that
//! multiplexes outgoing frames, inbound frames and the heartbeat over a single
//! tokio-tungstenite stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, sleep_until, timeout};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async_with_config, tungstenite::Message,
};
use tracing::{debug, error, info, trace, warn};

use super::base::{SynthError, SynthResult};
use super::messages::{ClientMessage, WireMessage};
use crate::config::ConnectionConfig;

// =============================================================================
// Transport Trait
// =============================================================================

/// Outcome of a bounded receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recv {
    /// A frame arrived
    Message(WireMessage),
    /// Nothing arrived within the timeout
    Idle,
    /// The connection is gone and no buffered frames remain
    Closed,
}

/// A full-duplex connection to the synthesis backend.
#[async_trait]
pub trait SynthTransport: Send + Sync {
    /// Send one control message. Resolves once the frame was written.
    async fn send(&self, message: &ClientMessage) -> SynthResult<()>;

    /// Wait up to `timeout` for the next inbound frame.
    async fn recv_timeout(&self, timeout: Duration) -> Recv;

    /// Whether the connection is usable. Never fails.
    fn is_open(&self) -> bool;

    /// Close the connection. Idempotent.
    async fn close(&self);
}

/// Shared handle to an open transport.
pub type SharedTransport = Arc<dyn SynthTransport>;

/// Opens transports. Swapped out in tests for scripted backends.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &ConnectionConfig) -> SynthResult<SharedTransport>;
}

/// Connector producing [`WsTransport`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, config: &ConnectionConfig) -> SynthResult<SharedTransport> {
        let transport = WsTransport::connect(config).await?;
        Ok(Arc::new(transport) as SharedTransport)
    }
}

// =============================================================================
// WebSocket Transport
// =============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum Outgoing {
    Frame {
        message: Message,
        ack: oneshot::Sender<SynthResult<()>>,
    },
    Close {
        ack: oneshot::Sender<()>,
    },
}

/// WebSocket connection to the synthesis backend.
pub struct WsTransport {
    endpoint: String,
    outgoing: mpsc::Sender<Outgoing>,
    inbound: Mutex<mpsc::UnboundedReceiver<WireMessage>>,
    open: Arc<AtomicBool>,
    close_timeout: Duration,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl WsTransport {
    /// Open a WebSocket connection.
    ///
    /// The caller bounds the handshake with its own timeout.
    pub async fn connect(config: &ConnectionConfig) -> SynthResult<Self> {
        debug!(endpoint = %config.url, "Opening WebSocket");

        let ws_config = WebSocketConfig::default()
            .max_message_size(Some(config.max_frame_size))
            .max_frame_size(Some(config.max_frame_size));

        let (ws_stream, response) =
            connect_async_with_config(config.url.as_str(), Some(ws_config), true)
                .await
                .map_err(|e| SynthError::WebSocket(format!("WebSocket connection failed: {e}")))?;

        info!(
            endpoint = %config.url,
            status = %response.status(),
            "Connected to synthesis backend"
        );

        let (outgoing_tx, outgoing_rx) = mpsc::channel(32);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));

        let handle = tokio::spawn(connection_loop(
            ws_stream,
            outgoing_rx,
            inbound_tx,
            open.clone(),
            config.heartbeat_interval(),
            config.heartbeat_timeout(),
        ));

        Ok(Self {
            endpoint: config.url.clone(),
            outgoing: outgoing_tx,
            inbound: Mutex::new(inbound_rx),
            open,
            close_timeout: config.close_timeout(),
            task: parking_lot::Mutex::new(Some(handle)),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl SynthTransport for WsTransport {
    async fn send(&self, message: &ClientMessage) -> SynthResult<()> {
        if !self.is_open() {
            return Err(SynthError::NotConnected);
        }

        let json = message.to_json()?;
        trace!(kind = message.kind(), "Sending message");

        let (ack, done) = oneshot::channel();
        self.outgoing
            .send(Outgoing::Frame {
                message: Message::Text(json.into()),
                ack,
            })
            .await
            .map_err(|_| SynthError::ConnectionLost("connection task ended".to_string()))?;

        done.await
            .map_err(|_| SynthError::ConnectionLost("connection task ended".to_string()))?
    }

    async fn recv_timeout(&self, wait: Duration) -> Recv {
        let mut inbound = self.inbound.lock().await;
        match timeout(wait, inbound.recv()).await {
            Ok(Some(message)) => Recv::Message(message),
            Ok(None) => Recv::Closed,
            Err(_) => Recv::Idle,
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let (ack, done) = oneshot::channel();
            if self.outgoing.send(Outgoing::Close { ack }).await.is_ok()
                && timeout(self.close_timeout, done).await.is_err()
            {
                warn!(endpoint = %self.endpoint, "Close handshake timed out");
            }
        }

        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}

/// Drive one WebSocket: outgoing frames, inbound frames and the heartbeat.
async fn connection_loop(
    ws_stream: WsStream,
    mut outgoing_rx: mpsc::Receiver<Outgoing>,
    inbound_tx: mpsc::UnboundedSender<WireMessage>,
    open: Arc<AtomicBool>,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
) {
    let (mut ws_write, mut ws_read) = ws_stream.split();

    let mut heartbeat =
        tokio::time::interval_at(Instant::now() + heartbeat_interval, heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pong_deadline: Option<Instant> = None;

    loop {
        let deadline = pong_deadline;
        let pong_overdue = async move {
            match deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            outgoing = outgoing_rx.recv() => match outgoing {
                Some(Outgoing::Frame { message, ack }) => {
                    let result = ws_write
                        .send(message)
                        .await
                        .map_err(|e| SynthError::WebSocket(format!("Failed to send message: {e}")));
                    let failed = result.is_err();
                    let _ = ack.send(result);
                    if failed {
                        error!("Failed to send WebSocket message");
                        break;
                    }
                }
                Some(Outgoing::Close { ack }) => {
                    let _ = ws_write.send(Message::Close(None)).await;
                    let _ = ws_write.flush().await;
                    let _ = ack.send(());
                    break;
                }
                None => break,
            },

            incoming = ws_read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    trace!("Received text frame: {}", text.chars().take(100).collect::<String>());
                    if inbound_tx.send(WireMessage::Text(text.to_string())).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    trace!("Received binary frame: {} bytes", data.len());
                    if inbound_tx.send(WireMessage::Binary(data)).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = ws_write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Pong(_))) => {
                    pong_deadline = None;
                }
                Some(Ok(Message::Close(frame))) => {
                    info!("WebSocket closed by server: {:?}", frame);
                    break;
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => {
                    error!("WebSocket error: {e}");
                    break;
                }
                None => break,
            },

            _ = heartbeat.tick() => {
                if pong_deadline.is_none() {
                    if let Err(e) = ws_write.send(Message::Ping(Bytes::new())).await {
                        warn!("Failed to send heartbeat ping: {e}");
                        break;
                    }
                    pong_deadline = Some(Instant::now() + heartbeat_timeout);
                }
            }

            _ = pong_overdue => {
                warn!("Heartbeat timed out after {:?}", heartbeat_timeout);
                break;
            }
        }
    }

    open.store(false, Ordering::SeqCst);
    debug!("Synthesis connection loop ended");
}
