use serde::Deserialize;
use std::path::Path;

use super::EngineConfig;
use crate::core::synth::{InterruptPolicy, SynthError, SynthResult, SynthesisMode, SynthesisParams};

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present in the
/// file override environment variables and defaults.
///
/// # Example YAML structure
/// ```yaml
/// connection:
///   url: "wss://tts.example.com/ws"
///   connect_timeout_ms: 10000
///   max_retries: 3
///   retry_delay_ms: 100
///   heartbeat_interval_ms: 30000
///   heartbeat_timeout_ms: 10000
///   close_timeout_ms: 5000
///   max_frame_size: 16777216
///
/// session:
///   mode: streaming          # or "single"
///   sample_rate: 24000
///   channels: 1
///   ready_timeout_ms: 20000
///   stream_tick_ms: 100
///   message_timeout_ms: 30000
///
/// params:
///   chunk_size: 75
///   exaggeration: 0.5
///   temperature: 0.8
///   cfg_weight: 0.5
///   context_window: 70
///   fade_duration: 0.09
///   voice: "narrator"        # unknown keys are forwarded as-is
///
/// interruption:
///   policy: soft-stop        # or "reconnect"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub connection: Option<ConnectionYaml>,
    pub session: Option<SessionYaml>,
    pub params: Option<SynthesisParams>,
    pub interruption: Option<InterruptionYaml>,
}

/// Connection configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ConnectionYaml {
    pub url: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub heartbeat_interval_ms: Option<u64>,
    pub heartbeat_timeout_ms: Option<u64>,
    pub close_timeout_ms: Option<u64>,
    pub max_frame_size: Option<usize>,
}

/// Session configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub mode: Option<SynthesisMode>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub ready_timeout_ms: Option<u64>,
    pub stream_tick_ms: Option<u64>,
    pub audio_pair_timeout_ms: Option<u64>,
    pub message_timeout_ms: Option<u64>,
    pub drain_poll_ms: Option<u64>,
    pub settle_delay_ms: Option<u64>,
    pub post_cancel_drain_ms: Option<u64>,
    pub frame_buffer: Option<usize>,
}

/// Interruption configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct InterruptionYaml {
    pub policy: Option<InterruptPolicy>,
}

fn apply<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

impl YamlConfig {
    /// Load YAML configuration from a file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> SynthResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SynthError::InvalidConfiguration(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;

        let config: YamlConfig = serde_yaml::from_str(&contents).map_err(|e| {
            SynthError::InvalidConfiguration(format!("Failed to parse YAML config: {e}"))
        })?;

        Ok(config)
    }

    /// Overlay the values present in this file on `base`.
    pub fn merge_into(self, mut base: EngineConfig) -> EngineConfig {
        if let Some(connection) = self.connection {
            let target = &mut base.connection;
            apply(&mut target.url, connection.url);
            apply(&mut target.connect_timeout_ms, connection.connect_timeout_ms);
            apply(&mut target.max_retries, connection.max_retries);
            apply(&mut target.retry_delay_ms, connection.retry_delay_ms);
            apply(&mut target.heartbeat_interval_ms, connection.heartbeat_interval_ms);
            apply(&mut target.heartbeat_timeout_ms, connection.heartbeat_timeout_ms);
            apply(&mut target.close_timeout_ms, connection.close_timeout_ms);
            apply(&mut target.max_frame_size, connection.max_frame_size);
        }

        if let Some(session) = self.session {
            let target = &mut base.session;
            apply(&mut target.mode, session.mode);
            apply(&mut target.sample_rate, session.sample_rate);
            apply(&mut target.channels, session.channels);
            apply(&mut target.ready_timeout_ms, session.ready_timeout_ms);
            apply(&mut target.stream_tick_ms, session.stream_tick_ms);
            apply(&mut target.audio_pair_timeout_ms, session.audio_pair_timeout_ms);
            apply(&mut target.message_timeout_ms, session.message_timeout_ms);
            apply(&mut target.drain_poll_ms, session.drain_poll_ms);
            apply(&mut target.settle_delay_ms, session.settle_delay_ms);
            apply(&mut target.post_cancel_drain_ms, session.post_cancel_drain_ms);
            apply(&mut target.frame_buffer, session.frame_buffer);
        }

        apply(&mut base.params, self.params);

        if let Some(interruption) = self.interruption {
            apply(&mut base.interrupt_policy, interruption.policy);
        }

        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
connection:
  url: "wss://tts.example.com/ws"
  connect_timeout_ms: 2000
  max_retries: 5
  heartbeat_interval_ms: 15000

session:
  mode: single
  sample_rate: 16000
  channels: 2
  message_timeout_ms: 10000

params:
  temperature: 0.6
  speaker: "alice"

interruption:
  policy: reconnect
"#;
        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        let merged = config.merge_into(EngineConfig::default());

        assert_eq!(merged.connection.url, "wss://tts.example.com/ws");
        assert_eq!(merged.connection.connect_timeout_ms, 2000);
        assert_eq!(merged.connection.max_retries, 5);
        assert_eq!(merged.connection.heartbeat_interval_ms, 15000);
        assert_eq!(merged.connection.close_timeout_ms, 5000);
        assert_eq!(merged.session.mode, SynthesisMode::Single);
        assert_eq!(merged.session.sample_rate, 16000);
        assert_eq!(merged.session.channels, 2);
        assert_eq!(merged.session.message_timeout_ms, 10000);
        assert!((merged.params.temperature - 0.6).abs() < f32::EPSILON);
        assert_eq!(merged.params.chunk_size, 75);
        assert_eq!(merged.params.extra["speaker"], "alice");
        assert_eq!(merged.interrupt_policy, InterruptPolicy::Reconnect);
    }

    #[test]
    fn test_yaml_config_empty() {
        let config: YamlConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.merge_into(EngineConfig::default()), EngineConfig::default());
    }

    #[test]
    fn test_yaml_config_invalid_policy() {
        let yaml = "interruption:\n  policy: sometimes\n";
        assert!(serde_yaml::from_str::<YamlConfig>(yaml).is_err());
    }

    #[test]
    fn test_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("synth.yaml");
        fs::write(&path, "connection:\n  url: \"ws://localhost:9000\"\n").unwrap();

        let config = YamlConfig::from_file(&path).unwrap();
        assert_eq!(
            config.connection.unwrap().url.as_deref(),
            Some("ws://localhost:9000")
        );
    }

    #[test]
    fn test_from_file_invalid_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.yaml");
        fs::write(&path, "connection: [unclosed").unwrap();

        let err = YamlConfig::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse YAML config"));
    }
}
