//! Public entry point of the synthesis client.
//!
//! [`SynthesisEngine`] wires the connection manager, session controller,
//! interruption handler and event bus together. It is cheap to clone; all
//! clones share one connection and run at most one session at a time.
//!
//! # Example
//! ```rust,no_run
//! use futures::StreamExt;
//! use waav_tts_stream::{EngineConfig, SynthesisEngine};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = SynthesisEngine::new(EngineConfig::new("ws://localhost:8765"))?;
//! engine.start().await?;
//!
//! let mut audio = engine.synthesize("Hello there!");
//! while let Some(frame) = audio.next().await {
//!     let frame = frame?;
//!     println!("{} bytes @ {} Hz", frame.len(), frame.sample_rate);
//! }
//!
//! engine.stop().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{error, info};

use super::base::{
    ConnectionState, SessionId, SessionIdGenerator, SynthError, SynthResult, SynthesisMode,
};
use super::connection::ConnectionManager;
use super::events::{EngineEvent, EventBus, EventSubscription};
use super::interruption::{InterruptionHandler, InterruptionOutcome};
use super::session::{Session, SessionController};
use super::sink::{AudioSink, AudioStream};
use super::transport::{Connector, WsConnector};
use crate::config::EngineConfig;

struct EngineShared {
    config: EngineConfig,
    connection: Arc<ConnectionManager>,
    events: EventBus,
    ids: SessionIdGenerator,
    interruption: InterruptionHandler,
    // Held for the whole life of a session
    session_lock: tokio::sync::Mutex<()>,
    started: AtomicBool,
}

/// Client-side engine for real-time speech synthesis.
#[derive(Clone)]
pub struct SynthesisEngine {
    shared: Arc<EngineShared>,
}

/// Builder for [`SynthesisEngine`] with a custom connector or id numbering.
pub struct EngineBuilder {
    config: EngineConfig,
    connector: Arc<dyn Connector>,
    ids: SessionIdGenerator,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            connector: Arc::new(WsConnector),
            ids: SessionIdGenerator::new(),
        }
    }

    /// Use `connector` to open connections.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Use `ids` to number sessions.
    pub fn session_ids(mut self, ids: SessionIdGenerator) -> Self {
        self.ids = ids;
        self
    }

    /// Validate the configuration and build the engine.
    ///
    /// # Errors
    /// Returns `SynthError::InvalidConfiguration` if validation fails.
    pub fn build(self) -> SynthResult<SynthesisEngine> {
        self.config.validate()?;

        let events = EventBus::new();
        let connection = Arc::new(ConnectionManager::new(
            self.config.connection.clone(),
            self.connector,
        ));
        let interruption = InterruptionHandler::new(
            connection.clone(),
            events.clone(),
            self.config.interrupt_policy,
        );

        Ok(SynthesisEngine {
            shared: Arc::new(EngineShared {
                config: self.config,
                connection,
                events,
                ids: self.ids,
                interruption,
                session_lock: tokio::sync::Mutex::new(()),
                started: AtomicBool::new(false),
            }),
        })
    }
}

impl SynthesisEngine {
    /// Engine connecting over WebSocket.
    pub fn new(config: EngineConfig) -> SynthResult<Self> {
        EngineBuilder::new(config).build()
    }

    /// Engine using a custom connector.
    pub fn with_connector(config: EngineConfig, connector: Arc<dyn Connector>) -> SynthResult<Self> {
        EngineBuilder::new(config).connector(connector).build()
    }

    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Connect to the backend.
    ///
    /// # Errors
    /// Returns `SynthError::ConnectionFailed` when every connect attempt failed.
    /// The engine stays started; the next session retries the connection.
    pub async fn start(&self) -> SynthResult<()> {
        self.shared.started.store(true, Ordering::SeqCst);
        info!(endpoint = %self.shared.config.connection.url, "Starting synthesis engine");

        match self.shared.connection.ensure_connected().await {
            Ok(_) => {
                self.shared.events.emit(EngineEvent::Connected);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Synthesis engine failed to connect");
                self.shared
                    .events
                    .emit(EngineEvent::ConnectionFailed { error: e.clone() });
                Err(e)
            }
        }
    }

    /// Stop generation and close the connection.
    ///
    /// Idempotent. Returns true when an open connection was torn down.
    pub async fn stop(&self) -> bool {
        self.shared.started.store(false, Ordering::SeqCst);
        self.shared.connection.stop_generating();

        let torn_down = self.shared.connection.close().await;
        if torn_down {
            info!("Synthesis engine stopped");
            self.shared.events.emit(EngineEvent::Disconnected);
        }
        torn_down
    }

    /// Stop the current generation without touching the connection.
    ///
    /// Returns the id of the session that was stopped.
    pub async fn cancel(&self) -> Option<SessionId> {
        self.shared
            .interruption
            .halt()
            .await
            .map(|session| session.id)
    }

    /// Handle the user starting to speak.
    pub async fn notify_interruption(&self) -> InterruptionOutcome {
        self.shared.interruption.on_interruption().await
    }

    /// Synthesize `text`.
    ///
    /// Nothing happens until the returned stream is polled. Empty or
    /// whitespace-only text yields an empty stream without contacting the
    /// backend.
    pub fn synthesize(&self, text: impl Into<String>) -> AudioStream {
        let text = text.into();
        if text.trim().is_empty() {
            return AudioStream::empty();
        }

        let shared = self.shared.clone();
        AudioStream::lazy(self.shared.config.session.frame_buffer, move |sink| {
            shared.run_session(text, sink)
        })
    }

    pub fn subscribe(&self) -> EventSubscription {
        self.shared.events.subscribe()
    }

    pub fn is_started(&self) -> bool {
        self.shared.started.load(Ordering::SeqCst)
    }

    pub fn is_generating(&self) -> bool {
        self.shared.connection.any_generating()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.connection.state()
    }

    /// Whether the connection is usable. Never fails.
    pub fn is_open(&self) -> bool {
        self.shared.connection.is_open()
    }

    pub fn current_session_id(&self) -> Option<SessionId> {
        self.shared.connection.current_session_id()
    }
}

impl EngineShared {
    async fn run_session(self: Arc<Self>, text: String, mut sink: AudioSink) {
        if !self.started.load(Ordering::SeqCst) {
            sink.fail(SynthError::NotStarted).await;
            return;
        }

        let _guard = self.session_lock.lock().await;
        // stop() may have run while we queued
        if !self.started.load(Ordering::SeqCst) {
            sink.fail(SynthError::NotStarted).await;
            return;
        }

        let transport = match self.connection.ensure_connected().await {
            Ok(transport) => transport,
            Err(e) => {
                error!(error = %e, "No connection for synthesis session");
                sink.fail(e).await;
                return;
            }
        };

        let mode = self.config.session.mode;
        let id = match mode {
            SynthesisMode::Streaming => self.ids.next_session(),
            SynthesisMode::Single => self.ids.next_request(),
        };
        let cancel = self.connection.begin_session(id.clone(), mode);
        self.events.emit(EngineEvent::SessionStarted {
            session_id: id.clone(),
            mode,
        });

        let session = Session::new(id, mode, text, self.config.params.clone());
        SessionController::new(
            self.connection.clone(),
            transport,
            self.config.session.clone(),
            self.events.clone(),
            session,
            cancel,
            sink,
        )
        .run()
        .await;
    }
}
