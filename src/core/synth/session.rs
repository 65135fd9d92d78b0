//! One synthesis session from submission to cleanup.
//!
//! # Streaming Flow
//!
//! ```text
//! drain stale frames ─► settle ─► stream_start ─► wait stream_ready
//!     ─► stream_text + stream_flush ─► receive audio until stream_complete
//!     ─► cleanup (stream_end + drain if the session did not complete)
//! ```
//!
//! Single-shot sessions send one `synthesize` request and read base64 `audio`
//! messages until `synthesis_complete`.

use std::sync::Arc;

use bytes::Bytes;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::base::{
    AudioFrame, SessionId, SessionState, SynthError, SynthResult, SynthesisMode, SynthesisParams,
};
use super::connection::ConnectionManager;
use super::drainer::MessageDrainer;
use super::events::{EngineEvent, EventBus};
use super::messages::{ClientMessage, ServerMessage, WireMessage};
use super::sink::AudioSink;
use super::transport::{Recv, SharedTransport};
use crate::config::SessionConfig;

/// A single request to synthesize one text.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub mode: SynthesisMode,
    pub text: String,
    pub params: SynthesisParams,
    pub created_at: Instant,
    state: SessionState,
}

impl Session {
    pub fn new(id: SessionId, mode: SynthesisMode, text: String, params: SynthesisParams) -> Self {
        Self {
            id,
            mode,
            text,
            params,
            created_at: Instant::now(),
            state: SessionState::Created,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(next) {
            warn!(
                session_id = %self.id,
                from = %self.state,
                to = %next,
                "Unexpected session state transition"
            );
        }
        trace!(session_id = %self.id, from = %self.state, to = %next, "Session state");
        self.state = next;
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed,
    Cancelled,
    Failed(SynthError),
}

enum Step {
    Continue,
    Header { sample_rate: u32, channels: u16 },
    // Header owned by another session; its payload must not be mistaken for ours
    SkipPayload,
    Frame(AudioFrame),
    Complete,
    Failed(SynthError),
}

/// Drives one session over a connection it does not own.
pub(crate) struct SessionController {
    connection: Arc<ConnectionManager>,
    transport: SharedTransport,
    config: SessionConfig,
    events: EventBus,
    session: Session,
    cancel: CancellationToken,
    sink: AudioSink,
    start_sent: bool,
    text_sent_at: Option<Instant>,
    frames: usize,
}

impl SessionController {
    pub(crate) fn new(
        connection: Arc<ConnectionManager>,
        transport: SharedTransport,
        config: SessionConfig,
        events: EventBus,
        session: Session,
        cancel: CancellationToken,
        sink: AudioSink,
    ) -> Self {
        Self {
            connection,
            transport,
            config,
            events,
            session,
            cancel,
            sink,
            start_sent: false,
            text_sent_at: None,
            frames: 0,
        }
    }

    /// Run the session to completion, including cleanup.
    pub(crate) async fn run(mut self) -> SessionOutcome {
        info!(
            session_id = %self.session.id,
            mode = %self.session.mode,
            text_len = self.session.text.len(),
            "=== Starting synthesis session ==="
        );

        let outcome = match self.session.mode {
            SynthesisMode::Streaming => self.run_streaming().await,
            SynthesisMode::Single => self.run_single().await,
        };

        self.finish(outcome).await
    }

    // =========================================================================
    // Streaming
    // =========================================================================

    async fn run_streaming(&mut self) -> SessionOutcome {
        let id = self.session.id.clone();

        let report = MessageDrainer::new(self.config.drain_poll())
            .drain(self.transport.as_ref(), Some(&id))
            .await;
        if let Some(ready) = report.ready_for {
            self.connection.cache_ready(ready);
        }
        if report.closed {
            return self.closed_outcome("before stream_start");
        }

        if !self.config.settle_delay().is_zero() {
            sleep(self.config.settle_delay()).await;
        }
        if !self.still_generating() {
            return SessionOutcome::Cancelled;
        }

        let start = ClientMessage::StreamStart {
            session_id: id.clone(),
            params: self.session.params.clone(),
        };
        if let Err(e) = self.transport.send(&start).await {
            return self.send_failed(e);
        }
        self.start_sent = true;
        self.session.transition(SessionState::AwaitingReady);
        debug!(session_id = %id, "Sent stream_start");

        match self.await_ready().await {
            Ok(true) => {}
            Ok(false) => return SessionOutcome::Cancelled,
            Err(e) => return SessionOutcome::Failed(e),
        }
        self.session.transition(SessionState::Ready);
        info!(
            session_id = %id,
            elapsed_ms = self.session.created_at.elapsed().as_millis() as u64,
            "Stream ready"
        );

        let text = ClientMessage::StreamText {
            text: self.session.text.clone(),
        };
        let flush = ClientMessage::StreamFlush;
        let (text_sent, flush_sent) =
            tokio::join!(self.transport.send(&text), self.transport.send(&flush));
        if let Err(e) = text_sent.and(flush_sent) {
            return self.send_failed(e);
        }
        self.text_sent_at = Some(Instant::now());
        self.session.transition(SessionState::Streaming);
        debug!(session_id = %id, "Sent stream_text and stream_flush");

        self.receive_stream().await
    }

    /// Wait for this session's `stream_ready`.
    ///
    /// `Ok(false)` means the session was cancelled while waiting.
    async fn await_ready(&mut self) -> SynthResult<bool> {
        let id = self.session.id.clone();
        if self.connection.take_ready(&id) {
            debug!(session_id = %id, "Using stream_ready captured while draining");
            return Ok(true);
        }

        let deadline = Instant::now() + self.config.ready_timeout();
        loop {
            if !self.still_generating() {
                return Ok(false);
            }

            let now = Instant::now();
            if now >= deadline {
                error!(session_id = %id, "Timed out waiting for stream_ready");
                return Err(SynthError::StreamInitTimeout);
            }
            let wait = (deadline - now).min(self.config.stream_tick());

            match self.transport.recv_timeout(wait).await {
                Recv::Idle => continue,
                Recv::Closed => {
                    if !self.still_generating() {
                        return Ok(false);
                    }
                    return Err(SynthError::ConnectionLost(
                        "connection closed while waiting for stream_ready".to_string(),
                    ));
                }
                Recv::Message(WireMessage::Binary(data)) => {
                    warn!(
                        session_id = %id,
                        bytes = data.len(),
                        "Ignoring binary frame before stream_ready"
                    );
                }
                Recv::Message(WireMessage::Text(text)) => {
                    let message = match ServerMessage::parse(&text) {
                        Ok(message) => message,
                        Err(e) => {
                            warn!(session_id = %id, error = %e, "Dropping message");
                            continue;
                        }
                    };
                    if message.is_foreign_to(&id) {
                        warn!(
                            session_id = %id,
                            kind = message.kind(),
                            owner = ?message.owner(),
                            "Ignoring message for another session"
                        );
                        continue;
                    }
                    match message {
                        ServerMessage::StreamReady(ready) if ready.session_id.is_some() => {
                            return Ok(true);
                        }
                        ServerMessage::Error(err) => {
                            error!(session_id = %id, error = %err.message(), "Backend rejected stream_start");
                            return Err(SynthError::Server(err.message()));
                        }
                        other => {
                            debug!(session_id = %id, kind = other.kind(), "Ignoring message before stream_ready");
                        }
                    }
                }
            }
        }
    }

    async fn receive_stream(&mut self) -> SessionOutcome {
        let tick = self.config.stream_tick();

        loop {
            let frame = match self.transport.recv_timeout(tick).await {
                Recv::Idle => {
                    if !self.still_generating() {
                        info!(session_id = %self.session.id, "Generation stopped");
                        return SessionOutcome::Cancelled;
                    }
                    continue;
                }
                Recv::Closed => return self.closed_outcome("during streaming"),
                Recv::Message(frame) => frame,
            };

            let mut next = Some(frame);
            while let Some(frame) = next.take() {
                let step = match frame {
                    WireMessage::Binary(data) => Step::Frame(self.default_frame(data)),
                    WireMessage::Text(text) => self.interpret(&text),
                };
                match self.apply(step, "during streaming").await {
                    Ok(reprocess) => next = reprocess,
                    Err(outcome) => return outcome,
                }
            }
        }
    }

    /// Act on one interpreted message.
    ///
    /// `Ok(Some(frame))` hands back a frame read while looking for an audio
    /// payload that must be processed next; `Err` ends the session.
    async fn apply(
        &mut self,
        step: Step,
        during: &str,
    ) -> Result<Option<WireMessage>, SessionOutcome> {
        match step {
            Step::Continue => Ok(None),
            Step::Complete => {
                info!(
                    session_id = %self.session.id,
                    frames = self.frames,
                    "Synthesis complete"
                );
                Err(SessionOutcome::Completed)
            }
            Step::Failed(e) => Err(SessionOutcome::Failed(e)),
            Step::Frame(frame) => self.deliver(frame).await.map(|_| None),
            Step::SkipPayload => match self.next_payload().await {
                Recv::Message(WireMessage::Binary(_)) | Recv::Idle => Ok(None),
                Recv::Message(other) => Ok(Some(other)),
                Recv::Closed => Err(self.closed_outcome(during)),
            },
            Step::Header {
                sample_rate,
                channels,
            } => match self.next_payload().await {
                Recv::Message(WireMessage::Binary(data)) => self
                    .deliver(AudioFrame::new(data, sample_rate, channels))
                    .await
                    .map(|_| None),
                Recv::Message(other) => {
                    warn!(
                        session_id = %self.session.id,
                        "audio_chunk header not followed by audio; dropping header"
                    );
                    Ok(Some(other))
                }
                Recv::Idle => {
                    warn!(
                        session_id = %self.session.id,
                        "No audio after audio_chunk header; dropping header"
                    );
                    Ok(None)
                }
                Recv::Closed => Err(self.closed_outcome(during)),
            },
        }
    }

    /// Wait briefly for the binary payload that follows an `audio_chunk` header.
    async fn next_payload(&self) -> Recv {
        self.transport
            .recv_timeout(self.config.audio_pair_timeout())
            .await
    }

    async fn deliver(&mut self, frame: AudioFrame) -> Result<(), SessionOutcome> {
        if self.emit(frame).await {
            Ok(())
        } else {
            Err(SessionOutcome::Cancelled)
        }
    }

    /// Interpret a text frame received while streaming.
    fn interpret(&self, text: &str) -> Step {
        let id = &self.session.id;
        let message = match ServerMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(session_id = %id, error = %e, "Dropping message");
                return Step::Continue;
            }
        };
        if message.is_foreign_to(id) {
            debug!(
                session_id = %id,
                kind = message.kind(),
                owner = ?message.owner(),
                "Ignoring message for another session"
            );
            return match message {
                ServerMessage::AudioChunk(_) => Step::SkipPayload,
                _ => Step::Continue,
            };
        }

        match message {
            ServerMessage::AudioChunk(header) => Step::Header {
                sample_rate: header.sample_rate.unwrap_or(self.config.sample_rate),
                channels: header.channels.unwrap_or(self.config.channels),
            },
            ServerMessage::StreamComplete(_) => Step::Complete,
            ServerMessage::Error(err) => {
                error!(session_id = %id, error = %err.message(), "Backend error during streaming");
                Step::Failed(SynthError::Server(err.message()))
            }
            ServerMessage::Audio(audio) => match audio.decode_audio() {
                Ok(data) => Step::Frame(AudioFrame::new(
                    Bytes::from(data),
                    audio.sample_rate.unwrap_or(self.config.sample_rate),
                    audio.channels.unwrap_or(self.config.channels),
                )),
                Err(e) => {
                    warn!(session_id = %id, error = %e, "Dropping undecodable audio");
                    Step::Continue
                }
            },
            ServerMessage::StreamReady(_) | ServerMessage::SynthesisComplete(_) => {
                debug!(session_id = %id, kind = message.kind(), "Ignoring message while streaming");
                Step::Continue
            }
            ServerMessage::Unknown => {
                trace!(session_id = %id, "Ignoring unknown message type");
                Step::Continue
            }
        }
    }

    // =========================================================================
    // Single-shot
    // =========================================================================

    async fn run_single(&mut self) -> SessionOutcome {
        let id = self.session.id.clone();
        let request = ClientMessage::Synthesize {
            text: self.session.text.clone(),
            request_id: id.clone(),
            params: self.session.params.clone(),
        };
        if let Err(e) = self.transport.send(&request).await {
            return self.send_failed(e);
        }
        self.start_sent = true;
        self.text_sent_at = Some(Instant::now());
        self.session.transition(SessionState::Streaming);
        debug!(session_id = %id, "Sent synthesize request");

        let tick = self.config.stream_tick();
        let silence_limit = self.config.message_timeout();
        let mut last_activity = Instant::now();

        loop {
            let frame = match self.transport.recv_timeout(tick).await {
                Recv::Idle => {
                    if !self.still_generating() {
                        info!(session_id = %id, "Synthesis cancelled");
                        return SessionOutcome::Cancelled;
                    }
                    if last_activity.elapsed() >= silence_limit {
                        error!(session_id = %id, "Synthesis timed out");
                        return SessionOutcome::Failed(SynthError::SynthesisTimeout);
                    }
                    continue;
                }
                Recv::Closed => return self.closed_outcome("during synthesis"),
                Recv::Message(frame) => frame,
            };
            last_activity = Instant::now();

            let mut next = Some(frame);
            while let Some(frame) = next.take() {
                let step = match frame {
                    WireMessage::Binary(data) => Step::Frame(self.default_frame(data)),
                    WireMessage::Text(text) => match ServerMessage::parse(&text) {
                        Ok(message) if message.is_foreign_to(&id) => self.interpret(&text),
                        Ok(ServerMessage::SynthesisComplete(_)) => Step::Complete,
                        Ok(ServerMessage::StreamComplete(_)) => {
                            debug!(session_id = %id, "Ignoring stream_complete for a single-shot request");
                            Step::Continue
                        }
                        Ok(_) => self.interpret(&text),
                        Err(e) => {
                            warn!(session_id = %id, error = %e, "Dropping message");
                            Step::Continue
                        }
                    },
                };
                match self.apply(step, "during synthesis").await {
                    Ok(reprocess) => next = reprocess,
                    Err(outcome) => return outcome,
                }
            }
        }
    }

    // =========================================================================
    // Shared
    // =========================================================================

    fn default_frame(&self, data: Bytes) -> AudioFrame {
        AudioFrame::new(data, self.config.sample_rate, self.config.channels)
    }

    fn still_generating(&self) -> bool {
        !self.cancel.is_cancelled() && self.connection.is_generating(&self.session.id)
    }

    /// The transport closed under the session.
    ///
    /// `stop()` and a reconnecting interruption close it after clearing the
    /// generating flag; that ends the session quietly. Any other close is a
    /// lost connection.
    fn closed_outcome(&self, during: &str) -> SessionOutcome {
        if !self.still_generating() {
            info!(session_id = %self.session.id, "Connection closed after generation stopped");
            return SessionOutcome::Cancelled;
        }
        SessionOutcome::Failed(SynthError::ConnectionLost(format!(
            "connection closed {during}"
        )))
    }

    fn send_failed(&self, error: SynthError) -> SessionOutcome {
        if !self.still_generating() {
            debug!(session_id = %self.session.id, error = %error, "Send failed after generation stopped");
            return SessionOutcome::Cancelled;
        }
        SessionOutcome::Failed(error)
    }

    /// Deliver a frame. Returns false when the session should stop.
    async fn emit(&mut self, frame: AudioFrame) -> bool {
        if !self.still_generating() {
            debug!(session_id = %self.session.id, "Dropping frame after cancellation");
            return false;
        }

        if self.frames == 0 {
            let latency = self
                .text_sent_at
                .map(|sent| sent.elapsed())
                .unwrap_or_default();
            info!(
                session_id = %self.session.id,
                latency_ms = latency.as_millis() as u64,
                "First audio received"
            );
            self.events.emit(EngineEvent::FirstAudio {
                session_id: self.session.id.clone(),
                latency,
            });
        }
        trace!(session_id = %self.session.id, bytes = frame.len(), "Audio frame");

        if !self.sink.deliver(frame).await {
            return false;
        }
        self.frames += 1;
        true
    }

    async fn finish(mut self, outcome: SessionOutcome) -> SessionOutcome {
        let id = self.session.id.clone();
        let completed = outcome == SessionOutcome::Completed;

        // Cleanup only touches the wire if this session still owns the connection
        if !completed
            && self.start_sent
            && self.connection.current_session_id().as_ref() == Some(&id)
            && self.transport.is_open()
        {
            if self.connection.needs_end(&id) {
                let stop = match self.session.mode {
                    SynthesisMode::Streaming => ClientMessage::StreamEnd,
                    SynthesisMode::Single => ClientMessage::Cancel,
                };
                match self.transport.send(&stop).await {
                    Ok(()) => {
                        self.connection.mark_end_sent(&id);
                        debug!(session_id = %id, kind = stop.kind(), "Sent stop message");
                    }
                    Err(e) => warn!(session_id = %id, error = %e, "Failed to send stop message"),
                }
            }

            let report = MessageDrainer::new(self.config.post_cancel_drain())
                .with_deadline(self.config.post_cancel_drain())
                .drain(self.transport.as_ref(), None)
                .await;
            debug!(session_id = %id, discarded = report.discarded, "Post-cancel drain finished");
        }

        match &outcome {
            SessionOutcome::Completed => {
                self.session.transition(SessionState::Completing);
                self.events.emit(EngineEvent::SessionCompleted {
                    session_id: id.clone(),
                    frames: self.frames,
                });
            }
            SessionOutcome::Cancelled => {
                self.session.transition(SessionState::Cancelled);
                self.events.emit(EngineEvent::SessionCancelled {
                    session_id: id.clone(),
                    frames: self.frames,
                });
            }
            SessionOutcome::Failed(e) => {
                self.session.transition(SessionState::Cancelled);
                error!(session_id = %id, error = %e, "Synthesis session failed");
                self.events.emit(EngineEvent::SessionFailed {
                    session_id: id.clone(),
                    error: e.clone(),
                });
                self.sink.fail(e.clone()).await;
            }
        }

        self.connection.clear_session(&id);
        self.session.transition(SessionState::Closed);

        info!(
            session_id = %id,
            frames = self.frames,
            elapsed_ms = self.session.created_at.elapsed().as_millis() as u64,
            "=== Synthesis session finished ==="
        );
        outcome
    }
}
