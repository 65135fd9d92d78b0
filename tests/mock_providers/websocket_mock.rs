//! WebSocket mock server for the streaming synthesis protocol

use super::{BackendBehavior, MockStats};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

/// Mock backend state shared by all connections
pub struct SynthMockState {
    pub behavior: BackendBehavior,
    pub stats: MockStats,
    /// `type` of every client message, in arrival order
    pub received: Mutex<Vec<String>>,
}

impl SynthMockState {
    pub fn new(behavior: BackendBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            stats: MockStats::default(),
            received: Mutex::new(Vec::new()),
        })
    }

    pub fn received_types(&self) -> Vec<String> {
        self.received.lock().clone()
    }

    pub fn count_received(&self, kind: &str) -> usize {
        self.received.lock().iter().filter(|k| *k == kind).count()
    }
}

/// A running mock backend bound to an ephemeral port
pub struct MockBackend {
    pub url: String,
    pub state: Arc<SynthMockState>,
    handle: JoinHandle<()>,
}

impl MockBackend {
    pub async fn start(behavior: BackendBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock backend");
        let addr = listener.local_addr().expect("mock backend address");
        let state = SynthMockState::new(behavior);

        let accept_state = state.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = accept_state.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, state).await {
                        eprintln!("Mock synthesis connection error: {}", e);
                    }
                });
            }
        });

        Self {
            url: format!("ws://{}", addr),
            state,
            handle,
        }
    }

    pub fn stats(&self) -> &MockStats {
        &self.state.stats
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

type Outbox = mpsc::UnboundedSender<Message>;

fn send_json(outbox: &Outbox, value: Value) {
    let _ = outbox.send(Message::Text(value.to_string().into()));
}

/// Handle a single client connection
async fn handle_connection(
    stream: TcpStream,
    state: Arc<SynthMockState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = accept_async(stream).await?;
    let (mut write, mut read) = ws_stream.split();
    MockStats::bump(&state.stats.connections);

    // Generation tasks write concurrently with the read loop
    let (outbox, mut rx) = mpsc::unbounded_channel::<Message>();
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if write.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut generation: Option<CancellationToken> = None;
    let mut session_id: Option<String> = None;

    while let Some(msg) = read.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        let value: Value = serde_json::from_str(&text)?;
        let kind = value["type"].as_str().unwrap_or_default().to_string();
        state.received.lock().push(kind.clone());

        match kind.as_str() {
            "stream_start" => {
                MockStats::bump(&state.stats.stream_starts);
                session_id = value["session_id"].as_str().map(String::from);
                if let Some(error) = &state.behavior.error {
                    send_json(&outbox, json!({"type": "error", "error": error}));
                } else if state.behavior.acknowledge {
                    send_json(
                        &outbox,
                        json!({"type": "stream_ready", "session_id": session_id}),
                    );
                }
            }
            "stream_text" => {}
            "stream_flush" => {
                if let Some(previous) = generation.take() {
                    previous.cancel();
                }
                let token = CancellationToken::new();
                generation = Some(token.clone());
                tokio::spawn(stream_audio(
                    outbox.clone(),
                    state.clone(),
                    session_id.clone(),
                    token,
                ));
            }
            "stream_end" => {
                MockStats::bump(&state.stats.stream_ends);
                if let Some(token) = generation.take() {
                    token.cancel();
                }
                send_json(
                    &outbox,
                    json!({"type": "stream_ended", "session_id": session_id}),
                );
            }
            "synthesize" => {
                MockStats::bump(&state.stats.synthesize_requests);
                let request_id = value["request_id"].as_str().map(String::from);
                if let Some(error) = &state.behavior.error {
                    send_json(
                        &outbox,
                        json!({"type": "error", "error": error, "request_id": request_id}),
                    );
                    continue;
                }
                let token = CancellationToken::new();
                if let Some(previous) = generation.replace(token.clone()) {
                    previous.cancel();
                }
                tokio::spawn(synthesize_audio(
                    outbox.clone(),
                    state.clone(),
                    request_id,
                    token,
                ));
            }
            "cancel" => {
                MockStats::bump(&state.stats.cancels);
                if let Some(token) = generation.take() {
                    token.cancel();
                }
            }
            _ => {}
        }
    }

    if let Some(token) = generation {
        token.cancel();
    }
    MockStats::bump(&state.stats.disconnections);
    writer.abort();
    Ok(())
}

/// Emit header/binary pairs followed by `stream_complete`
async fn stream_audio(
    outbox: Outbox,
    state: Arc<SynthMockState>,
    session_id: Option<String>,
    token: CancellationToken,
) {
    let behavior = &state.behavior;
    for _ in 0..behavior.chunks {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(behavior.chunk_delay) => {}
        }

        send_json(
            &outbox,
            json!({
                "type": "audio_chunk",
                "session_id": session_id,
                "sample_rate": behavior.sample_rate,
                "channels": 1
            }),
        );
        let _ = outbox.send(Message::Binary(Bytes::from(vec![0u8; behavior.chunk_bytes])));
        MockStats::bump(&state.stats.chunks_sent);
    }

    if !token.is_cancelled() {
        send_json(
            &outbox,
            json!({"type": "stream_complete", "session_id": session_id}),
        );
    }
}

/// Emit base64 `audio` messages followed by `synthesis_complete`
async fn synthesize_audio(
    outbox: Outbox,
    state: Arc<SynthMockState>,
    request_id: Option<String>,
    token: CancellationToken,
) {
    let behavior = &state.behavior;
    for _ in 0..behavior.chunks {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(behavior.chunk_delay) => {}
        }

        let pcm = vec![1u8; behavior.chunk_bytes];
        send_json(
            &outbox,
            json!({
                "type": "audio",
                "audio_content": BASE64.encode(&pcm),
                "sample_rate": behavior.sample_rate,
                "request_id": request_id
            }),
        );
        MockStats::bump(&state.stats.chunks_sent);
    }

    if !token.is_cancelled() {
        send_json(
            &outbox,
            json!({"type": "synthesis_complete", "request_id": request_id}),
        );
    }
}

/// Poll `condition` until it holds or `limit` elapses
pub async fn wait_until<F>(limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
