//! Mock synthesis backend for integration tests
//!
//! Speaks the streaming synthesis protocol over a real WebSocket:
//! - `stream_start` → `stream_ready`
//! - `stream_flush` → `audio_chunk` header + binary PCM pairs, then `stream_complete`
//! - `synthesize` → base64 `audio` messages, then `synthesis_complete`
//! - `stream_end` / `cancel` stop generation
//!
//! Behavior knobs cover the failure cases: never acknowledging, slow chunks,
//! backend errors.

// Allow dead code in test infrastructure - not every test binary uses every helper
#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub mod websocket_mock;

/// How the mock backend responds.
#[derive(Debug, Clone)]
pub struct BackendBehavior {
    /// Audio chunks per flush or synthesize request
    pub chunks: usize,
    /// PCM bytes per chunk
    pub chunk_bytes: usize,
    /// Pause before each chunk
    pub chunk_delay: Duration,
    /// Sample rate announced in headers
    pub sample_rate: u32,
    /// Reply to `stream_start` with `stream_ready`
    pub acknowledge: bool,
    /// Reply to requests with this error instead of audio
    pub error: Option<String>,
}

impl Default for BackendBehavior {
    fn default() -> Self {
        Self {
            chunks: 3,
            chunk_bytes: 960,
            chunk_delay: Duration::from_millis(5),
            sample_rate: 24000,
            acknowledge: true,
            error: None,
        }
    }
}

impl BackendBehavior {
    pub fn slow(chunks: usize, delay: Duration) -> Self {
        Self {
            chunks,
            chunk_delay: delay,
            ..Default::default()
        }
    }

    pub fn silent() -> Self {
        Self {
            acknowledge: false,
            ..Default::default()
        }
    }

    pub fn failing(error: &str) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Default::default()
        }
    }
}

/// Statistics collector for the mock backend
#[derive(Debug, Default)]
pub struct MockStats {
    pub connections: AtomicU64,
    pub disconnections: AtomicU64,
    pub stream_starts: AtomicU64,
    pub stream_ends: AtomicU64,
    pub synthesize_requests: AtomicU64,
    pub cancels: AtomicU64,
    pub chunks_sent: AtomicU64,
}

impl MockStats {
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::SeqCst)
    }

    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn summary(&self) -> String {
        format!(
            "Connections: {}, Disconnections: {}, StreamStarts: {}, StreamEnds: {}, Synthesize: {}, Cancels: {}, Chunks: {}",
            Self::get(&self.connections),
            Self::get(&self.disconnections),
            Self::get(&self.stream_starts),
            Self::get(&self.stream_ends),
            Self::get(&self.synthesize_requests),
            Self::get(&self.cancels),
            Self::get(&self.chunks_sent),
        )
    }
}
