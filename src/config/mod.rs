//! Configuration module for the streaming synthesis client
//!
//! This module handles engine configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use waav_tts_stream::config::EngineConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = EngineConfig::from_env()?;
//!
//! // Load from YAML file with environment variable underneath
//! let config = EngineConfig::from_file(&PathBuf::from("synth.yaml"))?;
//! println!("Synthesis backend at {}", config.connection.url);
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::synth::{
    DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE, InterruptPolicy, SynthResult, SynthesisMode,
    SynthesisParams,
};

mod env;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

/// Default backend endpoint.
pub const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8765";

/// Largest accepted WebSocket frame (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Connection settings for the synthesis backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// WebSocket endpoint (`ws://` or `wss://`)
    pub url: String,
    /// Bound on each connect attempt (ms)
    pub connect_timeout_ms: u64,
    /// Connect attempts before giving up
    pub max_retries: u32,
    /// Pause between failed connect attempts (ms)
    pub retry_delay_ms: u64,
    /// Ping interval (ms)
    pub heartbeat_interval_ms: u64,
    /// Time allowed for the pong to arrive (ms)
    pub heartbeat_timeout_ms: u64,
    /// Time allowed for the close handshake (ms)
    pub close_timeout_ms: u64,
    /// Maximum inbound frame and message size in bytes
    pub max_frame_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_WS_URL.to_string(),
            connect_timeout_ms: 10_000,
            max_retries: 3,
            retry_delay_ms: 100,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 10_000,
            close_timeout_ms: 5_000,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

/// Per-session protocol timing and audio defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Streaming handshake or single-shot request
    pub mode: SynthesisMode,
    /// Sample rate assumed when a chunk does not announce one
    pub sample_rate: u32,
    /// Channel count assumed when a chunk does not announce one
    pub channels: u16,
    /// Wait for `stream_ready` (ms)
    pub ready_timeout_ms: u64,
    /// Receive poll tick while streaming (ms)
    pub stream_tick_ms: u64,
    /// Wait for the binary payload after an `audio_chunk` header (ms)
    pub audio_pair_timeout_ms: u64,
    /// Single-shot silence timeout (ms)
    pub message_timeout_ms: u64,
    /// Per-poll timeout when draining stale messages (ms)
    pub drain_poll_ms: u64,
    /// Pause between draining and `stream_start` (ms)
    pub settle_delay_ms: u64,
    /// Per-poll timeout when draining after a cancelled session (ms)
    pub post_cancel_drain_ms: u64,
    /// Frames buffered between the session and the consumer
    pub frame_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: SynthesisMode::Streaming,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            ready_timeout_ms: 20_000,
            stream_tick_ms: 100,
            audio_pair_timeout_ms: 50,
            message_timeout_ms: 30_000,
            drain_poll_ms: 10,
            settle_delay_ms: 50,
            post_cancel_drain_ms: 200,
            frame_buffer: 16,
        }
    }
}

impl SessionConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn stream_tick(&self) -> Duration {
        Duration::from_millis(self.stream_tick_ms)
    }

    pub fn audio_pair_timeout(&self) -> Duration {
        Duration::from_millis(self.audio_pair_timeout_ms)
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }

    pub fn drain_poll(&self) -> Duration {
        Duration::from_millis(self.drain_poll_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn post_cancel_drain(&self) -> Duration {
        Duration::from_millis(self.post_cancel_drain_ms)
    }
}

/// Engine configuration
///
/// Contains everything needed to run a [`SynthesisEngine`](crate::SynthesisEngine):
/// - Connection settings (endpoint, retries, heartbeat)
/// - Session timing and audio defaults
/// - Synthesis parameters forwarded to the backend
/// - Interruption policy
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub connection: ConnectionConfig,
    pub session: SessionConfig,
    pub params: SynthesisParams,
    pub interrupt_policy: InterruptPolicy,
}

impl EngineConfig {
    /// Configuration with defaults and the given endpoint.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            connection: ConnectionConfig::new(url),
            ..Default::default()
        }
    }

    /// Load configuration from environment variables
    ///
    /// Note: .env file is loaded in main.rs at application startup
    ///
    /// # Errors
    /// Returns an error if an environment variable has an invalid format or
    /// validation fails.
    pub fn from_env() -> SynthResult<Self> {
        let config = env::apply_env(Self::default())?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variables underneath
    ///
    /// The configuration priority is: YAML > Environment Variables (.env + actual ENV) > Defaults
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, an environment
    /// variable has an invalid format, or validation fails.
    pub fn from_file(path: &Path) -> SynthResult<Self> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let base = env::apply_env(Self::default())?;
        let config = yaml_config.merge_into(base);
        validation::validate(&config)?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> SynthResult<()> {
        validation::validate(self)
    }
}
