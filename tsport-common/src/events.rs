//! Event types for the delivery ports
//!
//! Provides the shared `PortEvent` definitions and the `EventBus` used by the
//! audio port (and its sibling video port) to publish lifecycle and delivery
//! events. Events are serialisable so a host can forward them as JSON.

use crate::timing::RefTime;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Which kind of stream a port carries
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
    Audio,
    Video,
}

impl std::fmt::Display for PortKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortKind::Audio => write!(f, "audio"),
            PortKind::Video => write!(f, "video"),
        }
    }
}

/// Why a discontinuity was signalled downstream
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiscontinuityCause {
    /// First buffer after connect or streaming start
    Start,
    /// Explicit request from the pipeline (channel zap)
    Requested,
    /// First buffer after a seek or rate-direction change
    Seek,
    /// Slow-motion compensation finished, timeline rebased
    SlowMotionExit,
    /// Upstream reported a break or timestamps went backwards
    Upstream,
}

/// Port events
///
/// Emitted by the ports and consumed by hosts for logging, UI, or tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PortEvent {
    /// Connection to a downstream consumer completed
    Connected {
        port_id: Uuid,
        kind: PortKind,
        peer: String,
        buffer_count: u32,
        buffer_size: u32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Connection was torn down
    Disconnected {
        port_id: Uuid,
        kind: PortKind,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Streaming (re)started with a new segment
    NewSegment {
        port_id: Uuid,
        start: RefTime,
        stop: Option<RefTime>,
        rate: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A buffer flagged as a discontinuity was delivered
    DiscontinuityDelivered {
        port_id: Uuid,
        pts: RefTime,
        cause: DiscontinuityCause,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An access unit was dropped because the consumer is running late
    QualityDrop {
        port_id: Uuid,
        pts: RefTime,
        late_by: RefTime,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Upstream ran out of data for the current segment
    EndOfStream {
        port_id: Uuid,
        buffers_delivered: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The delivery worker thread exited
    WorkerStopped {
        port_id: Uuid,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl PortEvent {
    /// Event type name (matches the serde tag)
    pub fn event_type(&self) -> &str {
        match self {
            PortEvent::Connected { .. } => "Connected",
            PortEvent::Disconnected { .. } => "Disconnected",
            PortEvent::NewSegment { .. } => "NewSegment",
            PortEvent::DiscontinuityDelivered { .. } => "DiscontinuityDelivered",
            PortEvent::QualityDrop { .. } => "QualityDrop",
            PortEvent::EndOfStream { .. } => "EndOfStream",
            PortEvent::WorkerStopped { .. } => "WorkerStopped",
        }
    }

    /// Id of the port that emitted the event
    pub fn port_id(&self) -> Uuid {
        match self {
            PortEvent::Connected { port_id, .. }
            | PortEvent::Disconnected { port_id, .. }
            | PortEvent::NewSegment { port_id, .. }
            | PortEvent::DiscontinuityDelivered { port_id, .. }
            | PortEvent::QualityDrop { port_id, .. }
            | PortEvent::EndOfStream { port_id, .. }
            | PortEvent::WorkerStopped { port_id, .. } => *port_id,
        }
    }
}

/// Event distribution bus
///
/// Wraps `tokio::sync::broadcast`:
/// - Non-blocking publish (slow subscribers never block the delivery thread)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// `emit_lossy` is usable from plain threads; receivers can use `recv().await`
/// or `try_recv()`.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PortEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PortEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PortEvent,
    ) -> Result<usize, broadcast::error::SendError<PortEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PortEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
