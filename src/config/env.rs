//! Environment variable loading.
//!
//! Each recognised variable overrides the matching field of the configuration
//! it is applied to; unset variables leave the field untouched.

use std::env;
use std::str::FromStr;

use super::EngineConfig;
use crate::core::synth::{InterruptPolicy, SynthError, SynthResult, SynthesisMode};

pub(crate) const SYNTH_WS_URL: &str = "SYNTH_WS_URL";
pub(crate) const SYNTH_CONNECT_TIMEOUT_MS: &str = "SYNTH_CONNECT_TIMEOUT_MS";
pub(crate) const SYNTH_MAX_RETRIES: &str = "SYNTH_MAX_RETRIES";
pub(crate) const SYNTH_HEARTBEAT_INTERVAL_MS: &str = "SYNTH_HEARTBEAT_INTERVAL_MS";
pub(crate) const SYNTH_STREAMING_MODE: &str = "SYNTH_STREAMING_MODE";
pub(crate) const SYNTH_SAMPLE_RATE: &str = "SYNTH_SAMPLE_RATE";
pub(crate) const SYNTH_READY_TIMEOUT_MS: &str = "SYNTH_READY_TIMEOUT_MS";
pub(crate) const SYNTH_MESSAGE_TIMEOUT_MS: &str = "SYNTH_MESSAGE_TIMEOUT_MS";
pub(crate) const SYNTH_INTERRUPT_POLICY: &str = "SYNTH_INTERRUPT_POLICY";

/// Every variable read by [`apply_env`].
#[cfg(test)]
pub(crate) const ENV_KEYS: [&str; 9] = [
    SYNTH_WS_URL,
    SYNTH_CONNECT_TIMEOUT_MS,
    SYNTH_MAX_RETRIES,
    SYNTH_HEARTBEAT_INTERVAL_MS,
    SYNTH_STREAMING_MODE,
    SYNTH_SAMPLE_RATE,
    SYNTH_READY_TIMEOUT_MS,
    SYNTH_MESSAGE_TIMEOUT_MS,
    SYNTH_INTERRUPT_POLICY,
];

/// Overlay environment variables on `config`.
pub(crate) fn apply_env(mut config: EngineConfig) -> SynthResult<EngineConfig> {
    if let Some(url) = env_string(SYNTH_WS_URL) {
        config.connection.url = url;
    }
    if let Some(timeout) = env_parse::<u64>(SYNTH_CONNECT_TIMEOUT_MS)? {
        config.connection.connect_timeout_ms = timeout;
    }
    if let Some(retries) = env_parse::<u32>(SYNTH_MAX_RETRIES)? {
        config.connection.max_retries = retries;
    }
    if let Some(interval) = env_parse::<u64>(SYNTH_HEARTBEAT_INTERVAL_MS)? {
        config.connection.heartbeat_interval_ms = interval;
    }
    if let Some(streaming) = env_bool(SYNTH_STREAMING_MODE)? {
        config.session.mode = if streaming {
            SynthesisMode::Streaming
        } else {
            SynthesisMode::Single
        };
    }
    if let Some(rate) = env_parse::<u32>(SYNTH_SAMPLE_RATE)? {
        config.session.sample_rate = rate;
    }
    if let Some(timeout) = env_parse::<u64>(SYNTH_READY_TIMEOUT_MS)? {
        config.session.ready_timeout_ms = timeout;
    }
    if let Some(timeout) = env_parse::<u64>(SYNTH_MESSAGE_TIMEOUT_MS)? {
        config.session.message_timeout_ms = timeout;
    }
    if let Some(policy) = env_string(SYNTH_INTERRUPT_POLICY) {
        config.interrupt_policy = policy.parse::<InterruptPolicy>()?;
    }
    Ok(config)
}

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T>(key: &str) -> SynthResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_string(key)
        .map(|value| {
            value.parse::<T>().map_err(|e| {
                SynthError::InvalidConfiguration(format!("Invalid value for {key} '{value}': {e}"))
            })
        })
        .transpose()
}

fn env_bool(key: &str) -> SynthResult<Option<bool>> {
    env_string(key)
        .map(|value| match value.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(SynthError::InvalidConfiguration(format!(
                "Invalid boolean for {key}: '{value}'"
            ))),
        })
        .transpose()
}
