//! Event types for the paperdesk event system
//!
//! Provides the `UploadEvent` definitions and the `EventBus` used to fan
//! session changes out to observers (SSE clients, CLI progress output).

mod upload_types;

pub use upload_types::{AcceptedPaperInfo, FailedEntryInfo};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Upload session events
///
/// Every event that concerns one attempt carries its `attempt_id` so
/// observers can drop events from attempts they no longer display.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UploadEvent {
    /// Session returned to idle (auto-reset, new selection, or cancellation)
    SessionReset {
        /// Attempt that was discarded
        previous_attempt_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Admission control started for a new attempt
    ValidationStarted {
        attempt_id: Uuid,
        file_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Admission control rejected the selection before any network activity
    RejectedLocally {
        attempt_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Transport request about to be sent
    SubmissionStarted {
        attempt_id: Uuid,
        file_count: usize,
        total_bytes: u64,
        timestamp: DateTime<Utc>,
    },

    /// Transfer progress for the whole batch
    ///
    /// Emitted only when the percentage changes.
    TransferProgress {
        attempt_id: Uuid,
        percent: u8,
        bytes_sent: u64,
        bytes_total: u64,
        timestamp: DateTime<Utc>,
    },

    /// Every file accepted
    Succeeded {
        attempt_id: Uuid,
        accepted: Vec<AcceptedPaperInfo>,
        timestamp: DateTime<Utc>,
    },

    /// Some files rejected by the server for per-file reasons
    PartiallyFailed {
        attempt_id: Uuid,
        accepted: Vec<AcceptedPaperInfo>,
        failed: Vec<FailedEntryInfo>,
        timestamp: DateTime<Utc>,
    },

    /// Whole batch rejected (network, quota, auth, timeout, server error)
    Failed {
        attempt_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// In-flight attempt cancelled by the user
    Cancelled {
        attempt_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Server reported an authoritative remaining quota
    QuotaUpdated {
        tier_name: String,
        remaining: u32,
        timestamp: DateTime<Utc>,
    },

    /// Server-side processing progress of one accepted paper
    ProcessingProgress {
        attempt_id: Uuid,
        paper_id: String,
        processing_percent: u8,
        timestamp: DateTime<Utc>,
    },
}

impl UploadEvent {
    /// Event type name, used as the SSE event name
    pub fn event_type(&self) -> &'static str {
        match self {
            UploadEvent::SessionReset { .. } => "SessionReset",
            UploadEvent::ValidationStarted { .. } => "ValidationStarted",
            UploadEvent::RejectedLocally { .. } => "RejectedLocally",
            UploadEvent::SubmissionStarted { .. } => "SubmissionStarted",
            UploadEvent::TransferProgress { .. } => "TransferProgress",
            UploadEvent::Succeeded { .. } => "Succeeded",
            UploadEvent::PartiallyFailed { .. } => "PartiallyFailed",
            UploadEvent::Failed { .. } => "Failed",
            UploadEvent::Cancelled { .. } => "Cancelled",
            UploadEvent::QuotaUpdated { .. } => "QuotaUpdated",
            UploadEvent::ProcessingProgress { .. } => "ProcessingProgress",
        }
    }

    /// Attempt this event belongs to, if any
    pub fn attempt_id(&self) -> Option<Uuid> {
        match self {
            UploadEvent::SessionReset {
                previous_attempt_id,
                ..
            } => Some(*previous_attempt_id),
            UploadEvent::ValidationStarted { attempt_id, .. }
            | UploadEvent::RejectedLocally { attempt_id, .. }
            | UploadEvent::SubmissionStarted { attempt_id, .. }
            | UploadEvent::TransferProgress { attempt_id, .. }
            | UploadEvent::Succeeded { attempt_id, .. }
            | UploadEvent::PartiallyFailed { attempt_id, .. }
            | UploadEvent::Failed { attempt_id, .. }
            | UploadEvent::Cancelled { attempt_id, .. }
            | UploadEvent::ProcessingProgress { attempt_id, .. } => Some(*attempt_id),
            UploadEvent::QuotaUpdated { .. } => None,
        }
    }

    /// True for events that end an attempt
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadEvent::Succeeded { .. }
                | UploadEvent::PartiallyFailed { .. }
                | UploadEvent::Failed { .. }
        )
    }
}

/// Central event distribution bus
///
/// Thin wrapper over `tokio::sync::broadcast`. Cloning the bus shares the
/// underlying channel.
///
/// # Examples
///
/// ```
/// use paperdesk_common::events::{EventBus, UploadEvent};
/// use uuid::Uuid;
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(UploadEvent::Cancelled {
///     attempt_id: Uuid::new_v4(),
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert_eq!(rx.try_recv().unwrap().event_type(), "Cancelled");
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<UploadEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: UploadEvent,
    ) -> Result<usize, broadcast::error::SendError<UploadEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: UploadEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
