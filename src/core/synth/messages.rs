//! Synthesis backend WebSocket message types.
//!
//! # Message Flow
//!
//! ```text
//! Client → Server:
//!   - stream_start  (open a streaming session, carries params)
//!   - stream_text   (text to speak)
//!   - stream_flush  (speak everything buffered so far)
//!   - stream_end    (abandon the streaming session)
//!   - synthesize    (single-shot request)
//!   - cancel        (abandon the single-shot request)
//!
//! Server → Client:
//!   - stream_ready       (session accepted)
//!   - audio_chunk        (header, the next binary frame is its PCM payload)
//!   - <binary frame>     (PCM16 audio)
//!   - stream_complete    (streaming session finished)
//!   - audio              (base64 PCM16, single-shot)
//!   - synthesis_complete (single-shot finished)
//!   - error
//! ```

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::base::{SessionId, SynthError, SynthResult, SynthesisParams};

// =============================================================================
// Client → Server Messages
// =============================================================================

/// Messages sent to the synthesis backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Open a streaming session.
    StreamStart {
        session_id: SessionId,
        params: SynthesisParams,
    },
    /// Text for the open streaming session.
    StreamText { text: String },
    /// Synthesize all text sent so far.
    StreamFlush,
    /// Stop the open streaming session.
    StreamEnd,
    /// Single-shot synthesis request.
    Synthesize {
        text: String,
        request_id: SessionId,
        params: SynthesisParams,
    },
    /// Stop the in-flight single-shot request.
    Cancel,
}

impl ClientMessage {
    /// Wire name of the message type.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::StreamStart { .. } => "stream_start",
            ClientMessage::StreamText { .. } => "stream_text",
            ClientMessage::StreamFlush => "stream_flush",
            ClientMessage::StreamEnd => "stream_end",
            ClientMessage::Synthesize { .. } => "synthesize",
            ClientMessage::Cancel => "cancel",
        }
    }

    pub fn to_json(&self) -> SynthResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// =============================================================================
// Server → Client Messages
// =============================================================================

/// Messages received from the synthesis backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Streaming session accepted.
    StreamReady(StreamReady),
    /// Header for the binary frame that follows.
    AudioChunk(AudioChunkHeader),
    /// Streaming session finished.
    StreamComplete(SessionRef),
    /// Base64 audio for a single-shot request.
    Audio(AudioContent),
    /// Single-shot request finished.
    SynthesisComplete(SessionRef),
    /// Backend error.
    Error(ServerError),
    /// Unknown message type (for forward compatibility).
    #[serde(other)]
    Unknown,
}

/// `stream_ready` payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StreamReady {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

/// `audio_chunk` header.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AudioChunkHeader {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u16>,
}

/// Session or request reference carried by completion messages.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<SessionId>,
}

/// Base64 audio for single-shot synthesis.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AudioContent {
    /// Base64-encoded PCM16 audio.
    pub audio_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<SessionId>,
}

impl AudioContent {
    /// Decode the audio data to bytes.
    pub fn decode_audio(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(&self.audio_content)
    }
}

/// Backend error message.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ServerError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<SessionId>,
}

impl ServerError {
    pub fn message(&self) -> String {
        self.error
            .clone()
            .unwrap_or_else(|| "Unknown error".to_string())
    }
}

impl ServerMessage {
    /// Parse a text frame.
    pub fn parse(text: &str) -> SynthResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| SynthError::Protocol(format!("malformed message: {e}")))
    }

    /// Wire name of the message type.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::StreamReady(_) => "stream_ready",
            ServerMessage::AudioChunk(_) => "audio_chunk",
            ServerMessage::StreamComplete(_) => "stream_complete",
            ServerMessage::Audio(_) => "audio",
            ServerMessage::SynthesisComplete(_) => "synthesis_complete",
            ServerMessage::Error(_) => "error",
            ServerMessage::Unknown => "unknown",
        }
    }

    /// Session or request the message belongs to, if it names one.
    pub fn owner(&self) -> Option<&SessionId> {
        match self {
            ServerMessage::StreamReady(m) => m.session_id.as_ref(),
            ServerMessage::AudioChunk(m) => m.session_id.as_ref(),
            ServerMessage::StreamComplete(m) | ServerMessage::SynthesisComplete(m) => {
                m.session_id.as_ref().or(m.request_id.as_ref())
            }
            ServerMessage::Audio(m) => m.session_id.as_ref().or(m.request_id.as_ref()),
            ServerMessage::Error(m) => m.session_id.as_ref().or(m.request_id.as_ref()),
            ServerMessage::Unknown => None,
        }
    }

    /// True when the message names a session other than `session`.
    ///
    /// Messages without any identifier are attributed to the current session.
    pub fn is_foreign_to(&self, session: &SessionId) -> bool {
        self.owner().is_some_and(|owner| owner != session)
    }
}

// =============================================================================
// Raw Frames
// =============================================================================

/// A frame read off the connection before interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Binary(Bytes),
}

impl WireMessage {
    pub fn describe(&self) -> String {
        match self {
            WireMessage::Text(text) => format!("text({} bytes)", text.len()),
            WireMessage::Binary(data) => format!("binary({} bytes)", data.len()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
