use url::Url;

use super::EngineConfig;
use crate::core::synth::{SynthError, SynthResult};

/// Validate a complete engine configuration.
///
/// # Errors
/// Returns `SynthError::InvalidConfiguration` describing the first problem found.
pub(crate) fn validate(config: &EngineConfig) -> SynthResult<()> {
    validate_url(&config.connection.url)?;

    if config.connection.max_retries == 0 {
        return Err(invalid("max_retries must be at least 1"));
    }

    let timeouts = [
        ("connect_timeout_ms", config.connection.connect_timeout_ms),
        ("heartbeat_interval_ms", config.connection.heartbeat_interval_ms),
        ("heartbeat_timeout_ms", config.connection.heartbeat_timeout_ms),
        ("close_timeout_ms", config.connection.close_timeout_ms),
        ("ready_timeout_ms", config.session.ready_timeout_ms),
        ("stream_tick_ms", config.session.stream_tick_ms),
        ("audio_pair_timeout_ms", config.session.audio_pair_timeout_ms),
        ("message_timeout_ms", config.session.message_timeout_ms),
        ("drain_poll_ms", config.session.drain_poll_ms),
        ("post_cancel_drain_ms", config.session.post_cancel_drain_ms),
    ];
    for (name, value) in timeouts {
        if value == 0 {
            return Err(invalid(&format!("{name} must be greater than 0")));
        }
    }

    if config.connection.max_frame_size == 0 {
        return Err(invalid("max_frame_size must be greater than 0"));
    }
    if config.session.sample_rate == 0 {
        return Err(invalid("sample_rate must be greater than 0"));
    }
    if config.session.channels == 0 {
        return Err(invalid("channels must be at least 1"));
    }
    if config.session.frame_buffer == 0 {
        return Err(invalid("frame_buffer must be at least 1"));
    }

    Ok(())
}

fn validate_url(raw: &str) -> SynthResult<()> {
    let url = Url::parse(raw).map_err(|e| invalid(&format!("Invalid URL '{raw}': {e}")))?;
    match url.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(invalid(&format!(
            "URL '{raw}' must use ws:// or wss://, got '{other}://'"
        ))),
    }
}

fn invalid(message: &str) -> SynthError {
    SynthError::InvalidConfiguration(message.to_string())
}
