//! Streaming speech synthesis over a persistent WebSocket.
//!
//! This module implements the client side of a real-time text-to-speech
//! protocol: one long-lived connection, many short synthesis sessions, and
//! barge-in support so a voice agent can stop talking the moment the user
//! starts.
//!
//! # Architecture
//!
//! - `ConnectionManager` owns the WebSocket and the per-connection session state
//! - `SessionController` runs one session's handshake and receive loop
//! - `MessageDrainer` clears stale frames between sessions
//! - `AudioStream` delivers frames to the caller, lazily and in order
//! - `InterruptionHandler` stops generation on barge-in
//! - `SynthesisEngine` ties them together
//!
//! # Audio Format
//!
//! PCM 16-bit signed little-endian. The backend default is 24kHz mono; each
//! `audio_chunk` header may announce a different rate or channel count.
//!
//! # Example
//!
//! ```rust,ignore
//! use futures::StreamExt;
//! use waav_tts_stream::{EngineConfig, SynthesisEngine};
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = SynthesisEngine::new(EngineConfig::new("ws://localhost:8765")).unwrap();
//!     engine.start().await.unwrap();
//!
//!     let mut audio = engine.synthesize("Good morning!");
//!     while let Some(Ok(frame)) = audio.next().await {
//!         play(frame.data);
//!     }
//!
//!     // User started talking
//!     engine.notify_interruption().await;
//! }
//! ```

mod base;
mod connection;
mod drainer;
mod engine;
mod events;
mod interruption;
mod messages;
mod session;
mod sink;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use base::{
    AudioFrame, ConnectionState, DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE, InterruptPolicy,
    SessionId, SessionIdGenerator, SessionState, SynthError, SynthResult, SynthesisMode,
    SynthesisParams,
};
pub use connection::{ActiveSession, ConnectionManager};
pub use drainer::{DrainReport, MessageDrainer, PendingReadyCache};
pub use engine::{EngineBuilder, SynthesisEngine};
pub use events::{EngineEvent, EventBus, EventSubscription};
pub use interruption::{InterruptionHandler, InterruptionOutcome};
pub use messages::{
    AudioChunkHeader, AudioContent, ClientMessage, ServerError, ServerMessage, SessionRef,
    StreamReady, WireMessage,
};
pub use session::{Session, SessionOutcome};
pub use sink::{AudioSink, AudioStream};
pub use transport::{Connector, Recv, SharedTransport, SynthTransport, WsConnector, WsTransport};
