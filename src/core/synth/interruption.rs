//! Barge-in handling.
//!
//! When the user starts speaking, the current generation must stop at once.
//! The handler flips the generating flag (the session loop notices on its
//! next tick), tells the backend to stop, and then applies the configured
//! [`InterruptPolicy`] to the connection.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::base::{InterruptPolicy, SynthesisMode};
use super::connection::{ActiveSession, ConnectionManager};
use super::events::{EngineEvent, EventBus};
use super::messages::ClientMessage;

/// What an interruption did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptionOutcome {
    /// Nothing was generating
    Idle,
    /// Session forgotten, connection kept
    SoftStopped,
    /// Connection replaced
    Reconnected,
    /// Connection closed but reopening failed; the next session reconnects
    ReconnectFailed,
}

/// Stops in-flight generation on request.
pub struct InterruptionHandler {
    connection: Arc<ConnectionManager>,
    events: EventBus,
    policy: InterruptPolicy,
}

impl InterruptionHandler {
    pub fn new(connection: Arc<ConnectionManager>, events: EventBus, policy: InterruptPolicy) -> Self {
        Self {
            connection,
            events,
            policy,
        }
    }

    pub fn policy(&self) -> InterruptPolicy {
        self.policy
    }

    /// Stop the generating session and tell the backend.
    ///
    /// Sends `stream_end` (streaming) or `cancel` (single-shot) best effort.
    /// Returns the stopped session, or `None` if nothing was generating.
    pub async fn halt(&self) -> Option<ActiveSession> {
        let session = self.connection.stop_generating()?;

        if let Some(transport) = self.connection.open_transport() {
            let stop = match session.mode {
                SynthesisMode::Streaming => ClientMessage::StreamEnd,
                SynthesisMode::Single => ClientMessage::Cancel,
            };
            match transport.send(&stop).await {
                Ok(()) => {
                    self.connection.mark_end_sent(&session.id);
                    debug!(session_id = %session.id, kind = stop.kind(), "Sent stop message");
                }
                Err(e) => {
                    warn!(session_id = %session.id, error = %e, "Failed to send stop message");
                }
            }
        }

        Some(session)
    }

    /// React to the user starting to speak.
    pub async fn on_interruption(&self) -> InterruptionOutcome {
        let Some(session) = self.halt().await else {
            debug!("Interruption with no active generation");
            return InterruptionOutcome::Idle;
        };

        info!(
            session_id = %session.id,
            policy = %self.policy,
            "User started speaking, stopping generation"
        );
        self.events.emit(EngineEvent::Interrupted {
            session_id: session.id.clone(),
        });

        match self.policy {
            InterruptPolicy::Reconnect => {
                self.connection.close().await;
                match self.connection.ensure_connected().await {
                    Ok(_) => {
                        info!("Reconnected after interruption");
                        InterruptionOutcome::Reconnected
                    }
                    Err(e) => {
                        error!(error = %e, "Reconnect after interruption failed");
                        InterruptionOutcome::ReconnectFailed
                    }
                }
            }
            InterruptPolicy::SoftStop => {
                self.connection.clear_session_state();
                InterruptionOutcome::SoftStopped
            }
        }
    }
}
