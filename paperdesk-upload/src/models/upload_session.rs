//! Upload session state machine
//!
//! ```text
//! Idle -> Validating -> RejectedLocally -> Idle
//!                    -> Submitting -> Succeeded | PartiallyFailed | Failed -> Idle
//!                                  -> Idle (cancelled)
//! ```
//!
//! A session covers exactly one attempt. Terminal states are terminal for the
//! attempt; the next submission starts from a fresh session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use super::file_selection::{BatchMetadata, FileOutcome, FileSelection};
use super::progress::{ProcessingPercent, TransferPercent};
use crate::services::result_reconciler::{ReconciledStatus, Reconciliation};

/// Why admission control refused a selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdmissionRejection {
    EmptySelection,
    ExceedsBatchLimit {
        tier_name: String,
        limit: u32,
        requested: usize,
    },
}

impl fmt::Display for AdmissionRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionRejection::EmptySelection => write!(f, "At least one file required"),
            AdmissionRejection::ExceedsBatchLimit {
                tier_name, limit, ..
            } => write!(f, "Exceeds {} limit of {} files", tier_name, limit),
        }
    }
}

/// Blanket reason for a failed attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// No response reached the client
    NetworkError,
    /// Request exceeded the configured timeout
    Timeout,
    QuotaExceeded,
    Unauthorized,
    Server { status: u16, message: String },
    /// A 2xx response whose body could not be decoded
    InvalidResponse,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NetworkError => write!(f, "Network error"),
            FailureReason::Timeout => write!(f, "Request timed out"),
            FailureReason::QuotaExceeded => write!(f, "Upload quota exceeded"),
            FailureReason::Unauthorized => write!(f, "Not authorized to upload"),
            FailureReason::Server { status, message } => {
                write!(f, "Server error {}: {}", status, message)
            }
            FailureReason::InvalidResponse => write!(f, "Invalid server response"),
        }
    }
}

/// Session status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Validating,
    RejectedLocally { reason: AdmissionRejection },
    Submitting,
    PartiallyFailed,
    Failed { reason: FailureReason },
    Succeeded,
}

impl SessionStatus {
    pub fn name(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Validating => "validating",
            SessionStatus::RejectedLocally { .. } => "rejected_locally",
            SessionStatus::Submitting => "submitting",
            SessionStatus::PartiallyFailed => "partially_failed",
            SessionStatus::Failed { .. } => "failed",
            SessionStatus::Succeeded => "succeeded",
        }
    }

    /// Succeeded, PartiallyFailed and Failed
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Succeeded | SessionStatus::PartiallyFailed | SessionStatus::Failed { .. }
        )
    }

    /// Validating or Submitting
    pub fn is_in_flight(&self) -> bool {
        matches!(self, SessionStatus::Validating | SessionStatus::Submitting)
    }

    pub fn can_transition_to(&self, next: &SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (Idle, Validating) => true,
            (Validating, RejectedLocally { .. }) | (Validating, Submitting) => true,
            (RejectedLocally { .. }, Idle) => true,
            // Idle from Submitting is cancellation
            (Submitting, Succeeded)
            | (Submitting, PartiallyFailed)
            | (Submitting, Failed { .. })
            | (Submitting, Idle) => true,
            (Succeeded, Idle) | (PartiallyFailed, Idle) | (Failed { .. }, Idle) => true,
            _ => false,
        }
    }
}

impl From<ReconciledStatus> for SessionStatus {
    fn from(status: ReconciledStatus) -> Self {
        match status {
            ReconciledStatus::Succeeded => SessionStatus::Succeeded,
            ReconciledStatus::PartiallyFailed => SessionStatus::PartiallyFailed,
            ReconciledStatus::Failed(reason) => SessionStatus::Failed { reason },
        }
    }
}

/// Rejected transition; the session is left unchanged
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid session transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: &'static str,
    pub to: &'static str,
}

/// How a server-reported failure maps back onto the selection
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "snake_case")]
pub enum FailureKey {
    ClientIndex(usize),
    /// Index correlation unavailable: unknown or duplicated filename.
    /// `occurrence` counts earlier failures reported under the same name.
    Filename { name: String, occurrence: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedEntry {
    pub key: FailureKey,
    pub filename: String,
    pub reason: String,
}

/// Paper record confirmed by the server
///
/// Unknown server fields are kept in `extra` and passed through to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedPaper {
    #[serde(alias = "id", default)]
    pub paper_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub processing_progress: ProcessingPercent,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AcceptedPaper {
    pub fn new(paper_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            paper_id: Some(paper_id.into()),
            title: title.into(),
            processing_progress: ProcessingPercent::ZERO,
            extra: Map::new(),
        }
    }
}

/// Status change record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub attempt_id: Uuid,
    pub old_state: SessionStatus,
    pub new_state: SessionStatus,
    pub transitioned_at: DateTime<Utc>,
}

/// One submission attempt and everything observers may see about it
#[derive(Debug, Clone, Serialize)]
pub struct UploadSession {
    /// Nil for the idle placeholder that precedes the first attempt
    pub attempt_id: Uuid,
    pub status: SessionStatus,
    pub selection: FileSelection,
    pub metadata: BatchMetadata,
    pub progress_percent: TransferPercent,
    pub bytes_total: u64,
    pub accepted_papers: Vec<AcceptedPaper>,
    #[serde(serialize_with = "serialize_failed_entries")]
    pub failed_entries: BTreeMap<FailureKey, FailedEntry>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub transitions: Vec<StateTransition>,
}

fn serialize_failed_entries<S: Serializer>(
    entries: &BTreeMap<FailureKey, FailedEntry>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(entries.values())
}

impl UploadSession {
    /// Fresh attempt in `Idle`
    pub fn new(selection: FileSelection, metadata: BatchMetadata) -> Self {
        Self {
            attempt_id: Uuid::new_v4(),
            status: SessionStatus::Idle,
            bytes_total: selection.total_bytes(),
            selection,
            metadata,
            progress_percent: TransferPercent::ZERO,
            accepted_papers: Vec::new(),
            failed_entries: BTreeMap::new(),
            started_at: Utc::now(),
            ended_at: None,
            transitions: Vec::new(),
        }
    }

    /// Placeholder shown before any attempt and after a reset
    pub fn idle() -> Self {
        Self {
            attempt_id: Uuid::nil(),
            ..Self::new(FileSelection::default(), BatchMetadata::default())
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.attempt_id.is_nil()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_in_flight(&self) -> bool {
        self.status.is_in_flight()
    }

    /// Move to `next`, recording the transition
    ///
    /// Entering `Submitting` resets transfer progress. Leaving the attempt
    /// (terminal, local rejection or cancellation) stamps `ended_at`.
    pub fn transition_to(
        &mut self,
        next: SessionStatus,
    ) -> Result<StateTransition, InvalidTransition> {
        if !self.status.can_transition_to(&next) {
            return Err(InvalidTransition {
                from: self.status.name(),
                to: next.name(),
            });
        }

        if next == SessionStatus::Submitting {
            self.progress_percent = TransferPercent::ZERO;
        }

        let ends_attempt = next.is_terminal()
            || matches!(next, SessionStatus::RejectedLocally { .. } | SessionStatus::Idle);
        if ends_attempt && self.ended_at.is_none() {
            self.ended_at = Some(Utc::now());
        }

        let transition = StateTransition {
            attempt_id: self.attempt_id,
            old_state: std::mem::replace(&mut self.status, next.clone()),
            new_state: next,
            transitioned_at: Utc::now(),
        };
        self.transitions.push(transition.clone());
        Ok(transition)
    }

    /// Apply a transfer percentage; returns true if the visible value moved
    ///
    /// Ignored outside `Submitting` and never lowers the current value.
    pub fn record_progress(&mut self, percent: TransferPercent) -> bool {
        if self.status != SessionStatus::Submitting || percent <= self.progress_percent {
            return false;
        }
        self.progress_percent = percent;
        true
    }

    /// Install reconciler output and move to its terminal status
    pub fn apply_reconciliation(
        &mut self,
        reconciliation: Reconciliation,
    ) -> Result<StateTransition, InvalidTransition> {
        let next = SessionStatus::from(reconciliation.status);
        if !self.status.can_transition_to(&next) {
            return Err(InvalidTransition {
                from: self.status.name(),
                to: next.name(),
            });
        }

        // A server reply means the body was fully sent
        if !matches!(next, SessionStatus::Failed { .. }) {
            self.progress_percent = TransferPercent::COMPLETE;
        }
        self.accepted_papers = reconciliation.accepted_papers;
        self.failed_entries = reconciliation.failed_entries;
        self.selection.set_outcomes(reconciliation.entry_outcomes);

        self.transition_to(next)
    }

    /// Blanket failure with no server body
    pub fn fail(&mut self, reason: FailureReason) -> Result<StateTransition, InvalidTransition> {
        self.transition_to(SessionStatus::Failed { reason })
    }

    /// Set one paper's processing progress; returns true if it moved forward
    pub fn update_processing_progress(
        &mut self,
        paper_id: &str,
        progress: ProcessingPercent,
    ) -> bool {
        match self
            .accepted_papers
            .iter_mut()
            .find(|p| p.paper_id.as_deref() == Some(paper_id))
        {
            Some(paper) if progress > paper.processing_progress => {
                paper.processing_progress = progress;
                true
            }
            _ => false,
        }
    }

    /// Papers the server is still working on
    pub fn papers_in_processing(&self) -> Vec<String> {
        self.accepted_papers
            .iter()
            .filter(|p| !p.processing_progress.is_complete())
            .filter_map(|p| p.paper_id.clone())
            .collect()
    }

    /// Count of entries still without an outcome
    pub fn pending_entries(&self) -> usize {
        self.selection
            .entries()
            .iter()
            .filter(|e| e.outcome == FileOutcome::Pending)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FileHandle;

    fn two_file_session() -> UploadSession {
        UploadSession::new(
            FileSelection::new(vec![
                FileHandle::new("a.pdf", vec![0; 10]),
                FileHandle::new("b.pdf", vec![0; 30]),
            ]),
            BatchMetadata::default(),
        )
    }

    fn submitting_session() -> UploadSession {
        let mut session = two_file_session();
        session.transition_to(SessionStatus::Validating).unwrap();
        session.transition_to(SessionStatus::Submitting).unwrap();
        session
    }

    #[test]
    fn test_new_session_is_idle() {
        let session = two_file_session();
        assert_eq!(session.status, SessionStatus::Idle);
        assert_eq!(session.bytes_total, 40);
        assert!(!session.is_placeholder());
        assert!(UploadSession::idle().is_placeholder());
    }

    #[test]
    fn test_happy_path_transitions_recorded() {
        let mut session = submitting_session();
        session.transition_to(SessionStatus::Succeeded).unwrap();

        assert!(session.is_terminal());
        assert!(session.ended_at.is_some());
        assert_eq!(session.transitions.len(), 3);
        assert_eq!(session.transitions[2].old_state, SessionStatus::Submitting);
    }

    #[test]
    fn test_invalid_transition_leaves_session_unchanged() {
        let mut session = two_file_session();
        let err = session.transition_to(SessionStatus::Succeeded).unwrap_err();

        assert_eq!(err.from, "idle");
        assert_eq!(err.to, "succeeded");
        assert_eq!(session.status, SessionStatus::Idle);
        assert!(session.transitions.is_empty());
    }

    #[test]
    fn test_terminal_states_only_reset_to_idle() {
        let failed = SessionStatus::Failed {
            reason: FailureReason::NetworkError,
        };
        assert!(failed.can_transition_to(&SessionStatus::Idle));
        assert!(!failed.can_transition_to(&SessionStatus::Submitting));
        assert!(!SessionStatus::Succeeded.can_transition_to(&SessionStatus::Validating));

        let rejected = SessionStatus::RejectedLocally {
            reason: AdmissionRejection::EmptySelection,
        };
        assert!(rejected.can_transition_to(&SessionStatus::Idle));
        assert!(!rejected.is_terminal());
    }

    #[test]
    fn test_progress_monotonic_while_submitting() {
        let mut session = submitting_session();

        assert!(session.record_progress(TransferPercent::new(40)));
        assert!(!session.record_progress(TransferPercent::new(25)));
        assert_eq!(session.progress_percent.value(), 40);

        session.transition_to(SessionStatus::Idle).unwrap();
        assert!(!session.record_progress(TransferPercent::new(90)));
        assert_eq!(session.progress_percent.value(), 40);
    }

    #[test]
    fn test_cancellation_returns_to_idle() {
        let mut session = submitting_session();
        let transition = session.transition_to(SessionStatus::Idle).unwrap();

        assert_eq!(transition.old_state, SessionStatus::Submitting);
        assert!(session.ended_at.is_some());
        assert!(!session.is_in_flight());
    }

    #[test]
    fn test_processing_progress_only_advances() {
        let mut session = submitting_session();
        session.accepted_papers = vec![AcceptedPaper::new("p-1", "A")];

        assert!(session.update_processing_progress("p-1", ProcessingPercent::new(30)));
        assert!(!session.update_processing_progress("p-1", ProcessingPercent::new(10)));
        assert!(!session.update_processing_progress("p-9", ProcessingPercent::new(50)));
        assert_eq!(session.papers_in_processing(), vec!["p-1".to_string()]);

        session.update_processing_progress("p-1", ProcessingPercent::COMPLETE);
        assert!(session.papers_in_processing().is_empty());
    }

    #[test]
    fn test_status_serializes_with_reason() {
        let status = SessionStatus::RejectedLocally {
            reason: AdmissionRejection::ExceedsBatchLimit {
                tier_name: "free".to_string(),
                limit: 5,
                requested: 6,
            },
        };
        let json = serde_json::to_value(&status).unwrap();

        assert_eq!(json["state"], "rejected_locally");
        assert_eq!(json["reason"]["kind"], "exceeds_batch_limit");
        assert_eq!(json["reason"]["limit"], 5);
    }

    #[test]
    fn test_admission_rejection_messages() {
        assert_eq!(
            AdmissionRejection::EmptySelection.to_string(),
            "At least one file required"
        );
        let over = AdmissionRejection::ExceedsBatchLimit {
            tier_name: "free".to_string(),
            limit: 5,
            requested: 6,
        };
        assert_eq!(over.to_string(), "Exceeds free limit of 5 files");
    }
}
