//! Performance benchmarks for the synthesis wire protocol
//!
//! Run with: cargo bench
//! Or for specific benchmarks: cargo bench -- <filter>

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::time::Duration;
use waav_tts_stream::core::synth::{
    AudioFrame, ClientMessage, ServerMessage, SessionId, SynthesisParams,
};

/// Benchmark parsing of backend messages on the receive path
fn bench_server_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("server_parsing");
    group.measurement_time(Duration::from_secs(5));

    let audio_chunk =
        r#"{"type":"audio_chunk","session_id":"session_42","sample_rate":24000,"channels":1}"#
            .to_string();
    let stream_ready = r#"{"type":"stream_ready","session_id":"session_42"}"#.to_string();
    let unknown = r#"{"type":"stream_ended","session_id":"session_42","stats":{"chars":120}}"#
        .to_string();

    // 100ms of 24kHz mono PCM16, base64 encoded
    let single_shot_audio = format!(
        r#"{{"type":"audio","audio_content":"{}","sample_rate":24000,"request_id":"req_9"}}"#,
        BASE64.encode(vec![0u8; 4800])
    );

    for (name, msg) in [
        ("audio_chunk", &audio_chunk),
        ("stream_ready", &stream_ready),
        ("unknown", &unknown),
        ("single_shot_audio", &single_shot_audio),
    ] {
        group.throughput(Throughput::Bytes(msg.len() as u64));
        group.bench_with_input(BenchmarkId::new(name, msg.len()), msg, |b, msg| {
            b.iter(|| {
                let _ = ServerMessage::parse(black_box(msg));
            });
        });
    }

    group.finish();
}

/// Benchmark ownership checks done for every message while streaming
fn bench_ownership(c: &mut Criterion) {
    let mut group = c.benchmark_group("ownership");

    let id = SessionId::from("session_42");
    let own = ServerMessage::parse(r#"{"type":"audio_chunk","session_id":"session_42"}"#)
        .expect("valid message");
    let foreign = ServerMessage::parse(r#"{"type":"audio_chunk","session_id":"session_41"}"#)
        .expect("valid message");

    group.bench_function("own", |b| b.iter(|| black_box(&own).is_foreign_to(&id)));
    group.bench_function("foreign", |b| {
        b.iter(|| black_box(&foreign).is_foreign_to(&id))
    });

    group.finish();
}

/// Benchmark serialization of client messages
fn bench_client_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("client_serialization");

    let start = ClientMessage::StreamStart {
        session_id: SessionId::from("session_42"),
        params: SynthesisParams::default(),
    };
    let short_text = ClientMessage::StreamText {
        text: "Hello, how can I help you today?".to_string(),
    };
    let long_text = ClientMessage::StreamText {
        text: "This is a longer sentence streamed to the backend. ".repeat(40),
    };

    group.bench_function("stream_start", |b| {
        b.iter(|| black_box(&start).to_json())
    });
    group.bench_function("stream_text_short", |b| {
        b.iter(|| black_box(&short_text).to_json())
    });
    group.bench_function("stream_text_long", |b| {
        b.iter(|| black_box(&long_text).to_json())
    });

    group.finish();
}

/// Benchmark base64 audio decoding on the single-shot path
fn bench_audio_decoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("audio_decoding");

    for size in [960usize, 4800, 48000] {
        let msg = format!(
            r#"{{"type":"audio","audio_content":"{}","sample_rate":24000}}"#,
            BASE64.encode(vec![7u8; size])
        );
        let content = match ServerMessage::parse(&msg) {
            Ok(ServerMessage::Audio(content)) => content,
            other => panic!("Expected audio message, got {other:?}"),
        };
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("decode", size), &content, |b, content| {
            b.iter(|| black_box(content).decode_audio())
        });
    }

    group.finish();
}

/// Benchmark frame bookkeeping on the delivery path
fn bench_audio_frames(c: &mut Criterion) {
    let mut group = c.benchmark_group("audio_frames");

    for size in [960usize, 4800, 48000] {
        let data = Bytes::from(vec![0u8; size]);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("duration", size), &data, |b, data| {
            b.iter(|| AudioFrame::new(black_box(data.clone()), 24000, 1).duration());
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_server_parsing,
    bench_ownership,
    bench_client_serialization,
    bench_audio_decoding,
    bench_audio_frames,
);

criterion_main!(benches);
