//! Engine lifecycle notifications.
//!
//! Observers subscribe to an [`EventBus`] and receive [`EngineEvent`]s as the
//! connection and sessions change state. Delivery is best effort: a slow
//! subscriber that falls behind skips the oldest events.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::warn;

use super::base::{SessionId, SynthError, SynthesisMode};

const EVENT_CAPACITY: usize = 256;

/// Something observable happened inside the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Connection established by `start`
    Connected,
    /// Connection torn down by `stop`
    Disconnected,
    /// `start` could not connect
    ConnectionFailed { error: SynthError },
    SessionStarted {
        session_id: SessionId,
        mode: SynthesisMode,
    },
    /// First audio frame of a session, measured from text submission
    FirstAudio {
        session_id: SessionId,
        latency: Duration,
    },
    SessionCompleted { session_id: SessionId, frames: usize },
    SessionCancelled { session_id: SessionId, frames: usize },
    SessionFailed {
        session_id: SessionId,
        error: SynthError,
    },
    /// Generation stopped by a barge-in
    Interrupted { session_id: SessionId },
}

impl EngineEvent {
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            EngineEvent::SessionStarted { session_id, .. }
            | EngineEvent::FirstAudio { session_id, .. }
            | EngineEvent::SessionCompleted { session_id, .. }
            | EngineEvent::SessionCancelled { session_id, .. }
            | EngineEvent::SessionFailed { session_id, .. }
            | EngineEvent::Interrupted { session_id } => Some(session_id),
            EngineEvent::Connected
            | EngineEvent::Disconnected
            | EngineEvent::ConnectionFailed { .. } => None,
        }
    }
}

/// Fan-out of engine events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            rx: Some(self.tx.subscribe()),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Receiving end of an [`EventBus`]. Dropping it unsubscribes.
#[derive(Debug)]
pub struct EventSubscription {
    rx: Option<broadcast::Receiver<EngineEvent>>,
}

impl EventSubscription {
    /// Next event, or `None` once cancelled or the engine is gone.
    pub async fn recv(&mut self) -> Option<EngineEvent> {
        loop {
            let rx = self.rx.as_mut()?;
            match rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagging, events dropped");
                }
                Err(RecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
            }
        }
    }

    /// Next already-queued event without waiting.
    pub fn try_recv(&mut self) -> Option<EngineEvent> {
        loop {
            let rx = self.rx.as_mut()?;
            match rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
            }
        }
    }

    /// Stop receiving events.
    pub fn cancel(&mut self) {
        self.rx = None;
    }

    pub fn is_active(&self) -> bool {
        self.rx.is_some()
    }
}
