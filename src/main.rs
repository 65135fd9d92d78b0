use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, anyhow};
use clap::Parser;
use futures::StreamExt;
use hound::{SampleFormat, WavSpec, WavWriter};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use waav_tts_stream::{AudioFrame, EngineConfig, EngineEvent, SynthesisEngine, SynthesisMode};

type Wav = WavWriter<BufWriter<File>>;

/// WaaV TTS Stream - speak text through a streaming synthesis backend
#[derive(Parser, Debug)]
#[command(name = "waav-tts-stream")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Backend WebSocket URL (overrides configuration)
    #[arg(long, value_name = "URL")]
    url: Option<String>,

    /// Use single-shot requests instead of the streaming handshake
    #[arg(long)]
    single: bool,

    /// WAV file to write
    #[arg(short = 'o', long, value_name = "FILE", default_value = "output.wav")]
    output: PathBuf,

    /// Text to speak. Read from stdin, one utterance per line, when omitted
    text: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for wss:// connections
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            EngineConfig::from_file(path)?
        }
        None => EngineConfig::from_env()?,
    };
    if let Some(url) = cli.url {
        config.connection.url = url;
    }
    if cli.single {
        config.session.mode = SynthesisMode::Single;
    }

    let engine = SynthesisEngine::new(config)?;

    let mut events = engine.subscribe();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                EngineEvent::FirstAudio {
                    session_id,
                    latency,
                } => info!(%session_id, "Time to first audio: {}ms", latency.as_millis()),
                EngineEvent::SessionFailed { session_id, error } => {
                    warn!(%session_id, %error, "Session failed")
                }
                other => debug!(?other, "Engine event"),
            }
        }
    });

    let utterances = if cli.text.is_empty() {
        read_stdin_lines().await?
    } else {
        vec![cli.text.join(" ")]
    };

    engine.start().await?;

    let mut wav: Option<Wav> = None;
    let result = tokio::select! {
        result = speak(&engine, utterances, &cli.output, &mut wav) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping generation");
            engine.notify_interruption().await;
            Ok(Duration::ZERO)
        }
    };

    engine.stop().await;
    let total = result?;

    match wav {
        Some(writer) => {
            writer.finalize().context("Failed to finalize WAV file")?;
            println!(
                "Wrote {:.2}s of audio to {}",
                total.as_secs_f64(),
                cli.output.display()
            );
        }
        None => println!("No audio received"),
    }

    Ok(())
}

/// Synthesize each utterance in turn, appending its audio to the WAV file.
async fn speak(
    engine: &SynthesisEngine,
    utterances: Vec<String>,
    output: &PathBuf,
    wav: &mut Option<Wav>,
) -> anyhow::Result<Duration> {
    let mut total = Duration::ZERO;

    for text in utterances {
        let mut audio = engine.synthesize(text);
        while let Some(frame) = audio.next().await {
            let frame = frame.map_err(|e| anyhow!("Synthesis failed: {e}"))?;

            if wav.is_none() {
                let writer = WavWriter::create(output, wav_spec(&frame))
                    .with_context(|| format!("Failed to create {}", output.display()))?;
                *wav = Some(writer);
            }
            if let Some(writer) = wav.as_mut() {
                let spec = writer.spec();
                if !matches_spec(&spec, &frame) {
                    warn!(
                        sample_rate = frame.sample_rate,
                        channels = frame.channels,
                        file_sample_rate = spec.sample_rate,
                        file_channels = spec.channels,
                        "Skipping frame with a different audio format"
                    );
                    continue;
                }
                write_pcm16(writer, &frame)?;
            }
            total += frame.duration();
        }
    }

    Ok(total)
}

fn wav_spec(frame: &AudioFrame) -> WavSpec {
    WavSpec {
        channels: frame.channels,
        sample_rate: frame.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// A WAV file holds a single format; frames must match the one it was created with.
fn matches_spec(spec: &WavSpec, frame: &AudioFrame) -> bool {
    spec.sample_rate == frame.sample_rate && spec.channels == frame.channels
}

fn write_pcm16(writer: &mut Wav, frame: &AudioFrame) -> anyhow::Result<()> {
    for sample in frame.data.chunks_exact(2) {
        writer.write_sample(i16::from_le_bytes([sample[0], sample[1]]))?;
    }
    Ok(())
}

async fn read_stdin_lines() -> anyhow::Result<Vec<String>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut utterances = Vec::new();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if !line.is_empty() {
            utterances.push(line.to_string());
        }
    }
    Ok(utterances)
}
