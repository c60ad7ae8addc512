//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the publish/subscribe hub for [`SprayEvent`]s. It is
//! shared via `Arc<EventBus>` between the connection manager, the sync
//! engine, the batch aggregator and whatever front end subscribes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spray_core::batch::{BatchId, LayoutReport};
use spray_core::target::{ConnectionStatus, StoreTarget};
use spray_core::types::DbId;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// SprayEvent
// ---------------------------------------------------------------------------

/// An externally meaningful state transition.
///
/// Field-level edits never produce events; only status changes, sync
/// progress, batch membership changes and initialization steps do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SprayEvent {
    ConnectionStatusChanged {
        target: StoreTarget,
        status: ConnectionStatus,
    },
    SyncProgress {
        percent: u8,
    },
    SyncCompleted {
        success: bool,
    },
    BatchCreated {
        batch_id: BatchId,
    },
    BatchUpdated {
        batch_id: BatchId,
    },
    BatchDeleted {
        batch_id: BatchId,
    },
    WorkpieceAdded {
        batch_id: BatchId,
        workpiece_id: DbId,
    },
    WorkpieceRemoved {
        batch_id: BatchId,
        workpiece_id: DbId,
    },
    BatchAnalysisCompleted {
        batch_id: BatchId,
        report: LayoutReport,
    },
    InitializationProgress {
        percent: u8,
        message: String,
    },
    ErrorOccurred {
        message: String,
    },
}

impl SprayEvent {
    /// Dot-separated event name, e.g. `"sync.completed"`.
    pub fn event_type(&self) -> &'static str {
        match self {
            SprayEvent::ConnectionStatusChanged { .. } => "connection.status_changed",
            SprayEvent::SyncProgress { .. } => "sync.progress",
            SprayEvent::SyncCompleted { .. } => "sync.completed",
            SprayEvent::BatchCreated { .. } => "batch.created",
            SprayEvent::BatchUpdated { .. } => "batch.updated",
            SprayEvent::BatchDeleted { .. } => "batch.deleted",
            SprayEvent::WorkpieceAdded { .. } => "batch.workpiece_added",
            SprayEvent::WorkpieceRemoved { .. } => "batch.workpiece_removed",
            SprayEvent::BatchAnalysisCompleted { .. } => "batch.analysis_completed",
            SprayEvent::InitializationProgress { .. } => "system.initialization_progress",
            SprayEvent::ErrorOccurred { .. } => "system.error",
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        SprayEvent::ErrorOccurred {
            message: message.into(),
        }
    }
}

/// A published event with the time it was published.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub event: SprayEvent,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// # Usage
///
/// ```rust
/// use spray_events::bus::{EventBus, SprayEvent};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(SprayEvent::SyncCompleted { success: true });
/// ```
pub struct EventBus {
    sender: broadcast::Sender<Envelope>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped.
    pub fn publish(&self, event: SprayEvent) {
        // SendError only means there are zero receivers.
        let _ = self.sender.send(Envelope {
            event,
            timestamp: Utc::now(),
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
