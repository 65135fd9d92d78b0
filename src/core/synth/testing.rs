//! Scripted transport and connector for unit tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::base::{SynthError, SynthResult};
use super::messages::{ClientMessage, WireMessage};
use super::transport::{Connector, Recv, SharedTransport, SynthTransport};
use crate::config::ConnectionConfig;

type Responder = Box<dyn FnMut(&ClientMessage) -> Vec<WireMessage> + Send>;

/// In-memory backend. Frames pushed by the test (or produced by the
/// responder when the client sends something) are read back in order.
pub(crate) struct ScriptedTransport {
    inbound_tx: mpsc::UnboundedSender<WireMessage>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<WireMessage>>,
    queued: AtomicUsize,
    sent: Mutex<Vec<ClientMessage>>,
    responder: Mutex<Option<Responder>>,
    open: AtomicBool,
    // Wakes a pending read on close, as an aborted socket task does
    shutdown: CancellationToken,
    closes: AtomicUsize,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            queued: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            responder: Mutex::new(None),
            open: AtomicBool::new(true),
            shutdown: CancellationToken::new(),
            closes: AtomicUsize::new(0),
        })
    }

    pub(crate) fn push(&self, frame: WireMessage) {
        self.queued.fetch_add(1, Ordering::SeqCst);
        let _ = self.inbound_tx.send(frame);
    }

    pub(crate) fn push_json(&self, value: serde_json::Value) {
        self.push(WireMessage::Text(value.to_string()));
    }

    pub(crate) fn push_text(&self, text: &str) {
        self.push(WireMessage::Text(text.to_string()));
    }

    pub(crate) fn push_binary(&self, data: &[u8]) {
        self.push(WireMessage::Binary(Bytes::copy_from_slice(data)));
    }

    /// Frames pushed but not yet read.
    pub(crate) fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Reply to every client message with the frames `responder` returns.
    pub(crate) fn respond_with<F>(&self, responder: F)
    where
        F: FnMut(&ClientMessage) -> Vec<WireMessage> + Send + 'static,
    {
        *self.responder.lock() = Some(Box::new(responder));
    }

    pub(crate) fn sent(&self) -> Vec<ClientMessage> {
        self.sent.lock().clone()
    }

    pub(crate) fn sent_kinds(&self) -> Vec<&'static str> {
        self.sent.lock().iter().map(ClientMessage::kind).collect()
    }

    pub(crate) fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Simulate the server dropping the connection.
    pub(crate) fn disconnect(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.shutdown.cancel();
    }
}

#[async_trait]
impl SynthTransport for ScriptedTransport {
    async fn send(&self, message: &ClientMessage) -> SynthResult<()> {
        if !self.is_open() {
            return Err(SynthError::NotConnected);
        }
        self.sent.lock().push(message.clone());

        let replies = match self.responder.lock().as_mut() {
            Some(responder) => responder(message),
            None => Vec::new(),
        };
        for frame in replies {
            self.push(frame);
        }
        Ok(())
    }

    async fn recv_timeout(&self, wait: Duration) -> Recv {
        let mut inbound = self.inbound_rx.lock().await;
        if let Ok(frame) = inbound.try_recv() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            return Recv::Message(frame);
        }
        if !self.is_open() {
            return Recv::Closed;
        }
        let next = async {
            tokio::select! {
                frame = inbound.recv() => frame,
                _ = self.shutdown.cancelled() => None,
            }
        };
        match timeout(wait, next).await {
            Ok(Some(frame)) => {
                self.queued.fetch_sub(1, Ordering::SeqCst);
                Recv::Message(frame)
            }
            Ok(None) => Recv::Closed,
            Err(_) => Recv::Idle,
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.shutdown.cancel();
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out scripted transports, optionally failing the first attempts.
pub(crate) struct ScriptedConnector {
    transports: Mutex<VecDeque<Arc<ScriptedTransport>>>,
    handed_out: Mutex<Vec<Arc<ScriptedTransport>>>,
    failures_left: AtomicU32,
    attempts: AtomicU32,
}

impl ScriptedConnector {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            transports: Mutex::new(VecDeque::new()),
            handed_out: Mutex::new(Vec::new()),
            failures_left: AtomicU32::new(0),
            attempts: AtomicU32::new(0),
        })
    }

    /// Connector whose first connection is `transport`.
    pub(crate) fn with_transport(transport: Arc<ScriptedTransport>) -> Arc<Self> {
        let connector = Self::new();
        connector.queue(transport);
        connector
    }

    pub(crate) fn queue(&self, transport: Arc<ScriptedTransport>) {
        self.transports.lock().push_back(transport);
    }

    pub(crate) fn fail_next(&self, attempts: u32) {
        self.failures_left.store(attempts, Ordering::SeqCst);
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Every transport returned so far, oldest first.
    pub(crate) fn handed_out(&self) -> Vec<Arc<ScriptedTransport>> {
        self.handed_out.lock().clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, _config: &ConnectionConfig) -> SynthResult<SharedTransport> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SynthError::WebSocket("connection refused".to_string()));
        }

        let transport = self
            .transports
            .lock()
            .pop_front()
            .unwrap_or_else(ScriptedTransport::new);
        self.handed_out.lock().push(transport.clone());
        Ok(transport as SharedTransport)
    }
}
