//! Base types for the streaming synthesis engine.
//!
//! This module defines the error type, connection and session states, audio
//! frames, synthesis parameters and session identifiers shared by every part
//! of the engine.
//!
//! # Audio Format
//!
//! Audio frames carry raw PCM 16-bit signed little-endian samples. The sample
//! rate and channel count travel with each frame because the backend announces
//! them per chunk.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Default output sample rate announced by synthesis backends (Hz).
pub const DEFAULT_SAMPLE_RATE: u32 = 24000;

/// Default number of audio channels (mono).
pub const DEFAULT_CHANNELS: u16 = 1;

/// Bytes per PCM16 sample.
const BYTES_PER_SAMPLE: usize = 2;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while talking to the synthesis backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SynthError {
    /// Connecting to the backend failed after all retries
    #[error("Connection failed after {attempts} attempt(s): {reason}")]
    ConnectionFailed { attempts: u32, reason: String },

    /// The connection dropped while a session was using it
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// No open connection is available
    #[error("Not connected")]
    NotConnected,

    /// The engine has not been started (or was stopped)
    #[error("Synthesis engine not started")]
    NotStarted,

    /// The backend never acknowledged `stream_start`
    #[error("Stream initialization timeout")]
    StreamInitTimeout,

    /// A single-shot request received nothing within the per-message timeout
    #[error("Synthesis timeout")]
    SynthesisTimeout,

    /// Malformed or out-of-order message
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Explicit error message from the backend
    #[error("Server error: {0}")]
    Server(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

impl SynthError {
    /// Returns true for connection-class errors that a reconnect may fix.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SynthError::ConnectionFailed { .. }
                | SynthError::ConnectionLost(_)
                | SynthError::NotConnected
                | SynthError::WebSocket(_)
        )
    }

    /// Returns true if the error ends the session it occurred in.
    ///
    /// Protocol errors are logged and the offending message dropped; every
    /// other error terminates the current session.
    pub fn is_session_fatal(&self) -> bool {
        !matches!(self, SynthError::Protocol(_))
    }
}

impl From<serde_json::Error> for SynthError {
    fn from(err: serde_json::Error) -> Self {
        SynthError::Serialization(err.to_string())
    }
}

/// Result type for synthesis operations.
pub type SynthResult<T> = Result<T, SynthError>;

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle of the physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection
    #[default]
    Disconnected,
    /// Connect in progress
    Connecting,
    /// Connected and usable
    Open,
    /// Close in progress
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Open => write!(f, "Open"),
            ConnectionState::Closing => write!(f, "Closing"),
        }
    }
}

// =============================================================================
// Session State
// =============================================================================

/// Protocol state of one synthesis session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Created,
    AwaitingReady,
    Ready,
    Streaming,
    Completing,
    Cancelled,
    Closed,
}

impl SessionState {
    /// Active sessions own the connection's receive path.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::AwaitingReady | SessionState::Streaming)
    }

    /// Terminal states never transition again except to `Closed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Cancelled | SessionState::Closed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Created, AwaitingReady) => true,
            // Single-shot requests skip the handshake
            (Created, Streaming) => true,
            (AwaitingReady, Ready) | (AwaitingReady, Cancelled) => true,
            (Ready, Streaming) | (Ready, Cancelled) => true,
            (Streaming, Completing) | (Streaming, Cancelled) => true,
            (Completing, Closed) | (Cancelled, Closed) => true,
            (Created, Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Created => "created",
            SessionState::AwaitingReady => "awaiting_ready",
            SessionState::Ready => "ready",
            SessionState::Streaming => "streaming",
            SessionState::Completing => "completing",
            SessionState::Cancelled => "cancelled",
            SessionState::Closed => "closed",
        };
        write!(f, "{name}")
    }
}

// =============================================================================
// Modes and Policies
// =============================================================================

/// How text is submitted to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SynthesisMode {
    /// `stream_start` handshake, then `stream_text` + `stream_flush`
    #[default]
    Streaming,
    /// One `synthesize` request answered with base64 audio messages
    Single,
}

impl fmt::Display for SynthesisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SynthesisMode::Streaming => write!(f, "streaming"),
            SynthesisMode::Single => write!(f, "single"),
        }
    }
}

/// What the engine does with the connection after a barge-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterruptPolicy {
    /// Close and reopen the connection
    Reconnect,
    /// Keep the connection and forget the session; the next session drains
    #[default]
    SoftStop,
}

impl FromStr for InterruptPolicy {
    type Err = SynthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "reconnect" => Ok(InterruptPolicy::Reconnect),
            "soft-stop" | "soft_stop" | "softstop" => Ok(InterruptPolicy::SoftStop),
            other => Err(SynthError::InvalidConfiguration(format!(
                "Unknown interrupt policy '{other}'. Expected 'reconnect' or 'soft-stop'"
            ))),
        }
    }
}

impl fmt::Display for InterruptPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterruptPolicy::Reconnect => write!(f, "reconnect"),
            InterruptPolicy::SoftStop => write!(f, "soft-stop"),
        }
    }
}

// =============================================================================
// Session Identifiers
// =============================================================================

/// Identifier of one synthesis session (`session_<n>` or `req_<n>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl PartialEq<str> for SessionId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for SessionId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Monotonic source of session identifiers.
///
/// Streaming sessions and single-shot requests draw from the same counter so
/// an identifier is never handed out twice by one engine.
#[derive(Debug, Default)]
pub struct SessionIdGenerator {
    next: AtomicU64,
}

impl SessionIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start numbering at `first`.
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    fn bump(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// Next streaming session id, e.g. `session_7`.
    pub fn next_session(&self) -> SessionId {
        SessionId(format!("session_{}", self.bump()))
    }

    /// Next single-shot request id, e.g. `req_7`.
    pub fn next_request(&self) -> SessionId {
        SessionId(format!("req_{}", self.bump()))
    }
}

// =============================================================================
// Audio Frames
// =============================================================================

/// Immutable chunk of synthesized PCM16 audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Raw PCM bytes (16-bit signed, little-endian, interleaved)
    pub data: Bytes,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of interleaved channels
    pub channels: u16,
}

impl AudioFrame {
    pub fn new(data: Bytes, sample_rate: u32, channels: u16) -> Self {
        Self {
            data,
            sample_rate,
            channels,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of samples per channel.
    pub fn samples_per_channel(&self) -> usize {
        let channels = usize::from(self.channels.max(1));
        self.data.len() / (BYTES_PER_SAMPLE * channels)
    }

    /// Playback duration of this frame.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples_per_channel() as f64 / f64::from(self.sample_rate))
    }
}

// =============================================================================
// Synthesis Parameters
// =============================================================================

/// Synthesis parameters forwarded verbatim in `stream_start` and `synthesize`.
///
/// The named fields are the ones the backend documents; anything else placed
/// in `extra` is passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisParams {
    pub chunk_size: u32,
    pub exaggeration: f32,
    pub temperature: f32,
    pub cfg_weight: f32,
    pub context_window: u32,
    pub fade_duration: f32,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for SynthesisParams {
    fn default() -> Self {
        Self {
            chunk_size: 75,
            exaggeration: 0.5,
            temperature: 0.8,
            cfg_weight: 0.5,
            context_window: 70,
            fade_duration: 0.09,
            extra: serde_json::Map::new(),
        }
    }
}

impl SynthesisParams {
    /// Add or replace a backend-specific parameter.
    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}
