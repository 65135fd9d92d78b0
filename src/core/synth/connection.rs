//! Connection ownership.
//!
//! [`ConnectionManager`] is the single owner of the WebSocket. It serializes
//! connect and close, retries failed connects, and keeps the per-connection
//! session state (current session, generating flag, pending `stream_ready`)
//! under one lock so readers never observe a half-updated combination.

use std::sync::Arc;

use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::base::{ConnectionState, SessionId, SynthError, SynthResult, SynthesisMode};
use super::drainer::PendingReadyCache;
use super::transport::{Connector, SharedTransport};
use crate::config::ConnectionConfig;

/// The session currently using the connection.
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub id: SessionId,
    pub mode: SynthesisMode,
    /// Cleared by an interruption or cancel; the session loop stops on the next tick
    pub generating: bool,
    /// `stream_end` / `cancel` already went out for this session
    pub end_sent: bool,
    pub cancel: CancellationToken,
}

#[derive(Default)]
struct ConnectionSlot {
    state: ConnectionState,
    transport: Option<SharedTransport>,
    session: Option<ActiveSession>,
    pending_ready: PendingReadyCache,
}

/// Owns the connection to the synthesis backend.
pub struct ConnectionManager {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    // Serializes physical connect and close
    connect_lock: tokio::sync::Mutex<()>,
    slot: parking_lot::Mutex<ConnectionSlot>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            connect_lock: tokio::sync::Mutex::new(()),
            slot: parking_lot::Mutex::new(ConnectionSlot::default()),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        let slot = self.slot.lock();
        match (&slot.state, &slot.transport) {
            // The socket may have dropped underneath us
            (ConnectionState::Open, Some(transport)) if !transport.is_open() => {
                ConnectionState::Disconnected
            }
            (state, _) => *state,
        }
    }

    /// Whether a usable connection exists. Never fails.
    pub fn is_open(&self) -> bool {
        self.open_transport().is_some()
    }

    /// The current transport, if it is still open.
    pub fn open_transport(&self) -> Option<SharedTransport> {
        self.slot
            .lock()
            .transport
            .as_ref()
            .filter(|transport| transport.is_open())
            .cloned()
    }

    /// Return the open transport, connecting (with retries) if needed.
    ///
    /// # Errors
    /// Returns `SynthError::ConnectionFailed` when every attempt failed or timed out.
    pub async fn ensure_connected(&self) -> SynthResult<SharedTransport> {
        let _guard = self.connect_lock.lock().await;

        if let Some(transport) = self.open_transport() {
            return Ok(transport);
        }

        let stale = {
            let mut slot = self.slot.lock();
            slot.state = ConnectionState::Connecting;
            slot.transport.take()
        };
        if let Some(stale) = stale {
            debug!("Discarding dropped connection");
            stale.close().await;
        }

        let attempts = self.config.max_retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            info!(
                endpoint = %self.config.url,
                attempt,
                max_attempts = attempts,
                "Connecting to synthesis backend"
            );

            match timeout(
                self.config.connect_timeout(),
                self.connector.connect(&self.config),
            )
            .await
            {
                Ok(Ok(transport)) => {
                    let mut slot = self.slot.lock();
                    slot.state = ConnectionState::Open;
                    slot.transport = Some(transport.clone());
                    info!(endpoint = %self.config.url, "Connection established");
                    return Ok(transport);
                }
                Ok(Err(e)) => {
                    warn!(attempt, error = %e, "Connection attempt failed");
                    last_error = e.to_string();
                }
                Err(_) => {
                    warn!(
                        attempt,
                        timeout = ?self.config.connect_timeout(),
                        "Connection attempt timed out"
                    );
                    last_error = format!(
                        "connect timed out after {}ms",
                        self.config.connect_timeout_ms
                    );
                }
            }

            if attempt < attempts && !self.config.retry_delay().is_zero() {
                sleep(self.config.retry_delay()).await;
            }
        }

        self.slot.lock().state = ConnectionState::Disconnected;
        error!(
            endpoint = %self.config.url,
            attempts,
            "Failed to connect to synthesis backend after all retries"
        );
        Err(SynthError::ConnectionFailed {
            attempts,
            reason: last_error,
        })
    }

    /// Close the connection and forget all session state.
    ///
    /// Idempotent. Returns true only when an open connection was torn down.
    pub async fn close(&self) -> bool {
        let _guard = self.connect_lock.lock().await;

        let transport = {
            let mut slot = self.slot.lock();
            if let Some(session) = slot.session.take() {
                session.cancel.cancel();
            }
            slot.pending_ready.clear();
            let transport = slot.transport.take();
            slot.state = if transport.is_some() {
                ConnectionState::Closing
            } else {
                ConnectionState::Disconnected
            };
            transport
        };

        let Some(transport) = transport else {
            return false;
        };

        let was_open = transport.is_open();
        transport.close().await;
        self.slot.lock().state = ConnectionState::Disconnected;

        if was_open {
            info!(endpoint = %self.config.url, "Connection closed");
        }
        was_open
    }

    // =========================================================================
    // Session State
    // =========================================================================

    /// Register `id` as the current session and return its cancellation token.
    ///
    /// Clears any cached `stream_ready`; a cache entry only survives within
    /// the session that captured it.
    pub fn begin_session(&self, id: SessionId, mode: SynthesisMode) -> CancellationToken {
        let cancel = CancellationToken::new();
        let mut slot = self.slot.lock();
        slot.pending_ready.clear();
        slot.session = Some(ActiveSession {
            id,
            mode,
            generating: true,
            end_sent: false,
            cancel: cancel.clone(),
        });
        cancel
    }

    pub fn current_session_id(&self) -> Option<SessionId> {
        self.slot.lock().session.as_ref().map(|s| s.id.clone())
    }

    pub fn active_session(&self) -> Option<ActiveSession> {
        self.slot.lock().session.clone()
    }

    /// Whether `id` is the current session and has not been told to stop.
    pub fn is_generating(&self, id: &SessionId) -> bool {
        self.slot
            .lock()
            .session
            .as_ref()
            .is_some_and(|s| s.id == *id && s.generating && !s.cancel.is_cancelled())
    }

    /// Whether any session is currently generating.
    pub fn any_generating(&self) -> bool {
        self.slot
            .lock()
            .session
            .as_ref()
            .is_some_and(|s| s.generating)
    }

    /// Stop the current session's generation.
    ///
    /// Returns the session if it was generating; the session id stays
    /// registered so cleanup can still recognise it.
    pub fn stop_generating(&self) -> Option<ActiveSession> {
        let mut slot = self.slot.lock();
        let session = slot.session.as_mut().filter(|s| s.generating)?;
        session.generating = false;
        session.cancel.cancel();
        Some(session.clone())
    }

    /// Record that `stream_end` / `cancel` was sent for `id`.
    pub fn mark_end_sent(&self, id: &SessionId) {
        if let Some(session) = self.slot.lock().session.as_mut().filter(|s| s.id == *id) {
            session.end_sent = true;
        }
    }

    /// Whether `id` is still current and nobody has ended it on the wire.
    pub fn needs_end(&self, id: &SessionId) -> bool {
        self.slot
            .lock()
            .session
            .as_ref()
            .is_some_and(|s| s.id == *id && !s.end_sent)
    }

    /// Forget session `id` if it is still current.
    pub fn clear_session(&self, id: &SessionId) -> bool {
        let mut slot = self.slot.lock();
        if slot.session.as_ref().is_some_and(|s| s.id == *id) {
            slot.session = None;
            slot.pending_ready.clear();
            true
        } else {
            false
        }
    }

    /// Forget whatever session is current and any cached `stream_ready`.
    pub fn clear_session_state(&self) {
        let mut slot = self.slot.lock();
        slot.session = None;
        slot.pending_ready.clear();
    }

    pub fn cache_ready(&self, id: SessionId) {
        self.slot.lock().pending_ready.store(id);
    }

    /// Consume a cached `stream_ready` for `id`.
    pub fn take_ready(&self, id: &SessionId) -> bool {
        self.slot.lock().pending_ready.take(id)
    }

    pub fn has_pending_ready(&self) -> bool {
        !self.slot.lock().pending_ready.is_empty()
    }
}
