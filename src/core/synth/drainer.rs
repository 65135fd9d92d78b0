//! Stale message draining.
//!
//! A cancelled session can leave acknowledgements, audio and even a late
//! `stream_ready` on the shared connection. Before a new session starts (and
//! after a cancelled one ends) the drainer reads and discards everything
//! already queued, stopping early when it sees the new session's own
//! `stream_ready`.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use super::base::SessionId;
use super::messages::{ServerMessage, WireMessage};
use super::transport::{Recv, SynthTransport};

/// Result of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Frames read and thrown away
    pub discarded: usize,
    /// Session whose `stream_ready` was captured, if any
    pub ready_for: Option<SessionId>,
    /// The connection closed while draining
    pub closed: bool,
    /// The overall deadline ran out with traffic still arriving
    pub deadline_hit: bool,
}

/// Reads and discards queued frames until one poll times out.
///
/// With a deadline set, draining also stops once that much time has passed,
/// even if the backend keeps sending.
#[derive(Debug, Clone, Copy)]
pub struct MessageDrainer {
    poll: Duration,
    deadline: Option<Duration>,
}

impl MessageDrainer {
    pub fn new(poll: Duration) -> Self {
        Self {
            poll,
            deadline: None,
        }
    }

    /// Bound the whole drain to `total`.
    pub fn with_deadline(mut self, total: Duration) -> Self {
        self.deadline = Some(total);
        self
    }

    /// Drain queued frames.
    ///
    /// With `expected` set, a `stream_ready` for that session ends the drain
    /// and is reported in [`DrainReport::ready_for`] instead of being counted
    /// as discarded.
    pub async fn drain(
        &self,
        transport: &dyn SynthTransport,
        expected: Option<&SessionId>,
    ) -> DrainReport {
        let mut report = DrainReport::default();
        let deadline = self.deadline.map(|total| Instant::now() + total);

        loop {
            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        report.deadline_hit = true;
                        break;
                    }
                    self.poll.min(deadline - now)
                }
                None => self.poll,
            };

            let frame = match transport.recv_timeout(wait).await {
                Recv::Message(frame) => frame,
                Recv::Idle => break,
                Recv::Closed => {
                    report.closed = true;
                    break;
                }
            };

            if let (Some(session), WireMessage::Text(text)) = (expected, &frame)
                && let Ok(ServerMessage::StreamReady(ready)) = ServerMessage::parse(text)
                && ready.session_id.as_ref() == Some(session)
            {
                debug!(session_id = %session, "Captured stream_ready while draining");
                report.ready_for = Some(session.clone());
                break;
            }

            debug!("Drained stale message: {}", describe(&frame));
            report.discarded += 1;
        }

        if report.discarded > 0 {
            debug!(discarded = report.discarded, "Drained stale messages");
        }
        report
    }
}

fn describe(frame: &WireMessage) -> String {
    match frame {
        WireMessage::Text(text) => match ServerMessage::parse(text) {
            Ok(message) => match message.owner() {
                Some(owner) => format!("{} ({owner})", message.kind()),
                None => message.kind().to_string(),
            },
            Err(_) => frame.describe(),
        },
        WireMessage::Binary(_) => frame.describe(),
    }
}

// =============================================================================
// Pending Ready Cache
// =============================================================================

/// Holds a `stream_ready` captured before its session started waiting for it.
///
/// Keyed by session id and consumed at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingReadyCache {
    entry: Option<SessionId>,
}

impl PendingReadyCache {
    pub fn store(&mut self, session: SessionId) {
        self.entry = Some(session);
    }

    /// Consume the cached ready for `session`.
    ///
    /// Returns false when nothing is cached or the entry belongs to another
    /// session; a foreign entry is discarded either way.
    pub fn take(&mut self, session: &SessionId) -> bool {
        match self.entry.take() {
            Some(cached) => cached == *session,
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.entry = None;
    }

    pub fn is_empty(&self) -> bool {
        self.entry.is_none()
    }
}
