//! Upload orchestrator
//!
//! Sole owner of the current `UploadSession`. Runs admission, drives the
//! transport, folds progress in order, applies reconciliation and enforces
//! that only one attempt is in flight process-wide.
//!
//! Observers read whole snapshots through a `watch` channel and discrete
//! changes through the `EventBus`.

use chrono::Utc;
use paperdesk_common::events::{AcceptedPaperInfo, EventBus, FailedEntryInfo, UploadEvent};
use sqlx::SqlitePool;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::admission::{self, Admission};
use super::processing_poller::ProcessingPoller;
use super::progress_aggregator::ProgressAggregator;
use super::request_builder::{self, TransportRequest};
use super::result_reconciler;
use super::transport::{
    ProcessingStatusSource, ProgressSink, TransferProgress, TransportError, UploadTransport,
};
use crate::models::{
    AcceptedPaper, BatchMetadata, FailedEntry, FailureKey, FailureReason, FileSelection,
    InvalidTransition, PolicyStore, SessionStatus, SubmissionResponse, TierPolicy, UploadSession,
};

/// Submission errors surfaced to callers
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("An upload is already in progress")]
    AlreadyInFlight,

    #[error("No upload in progress")]
    NothingInFlight,

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
}

/// Timing knobs
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Delay before a succeeded session returns to idle
    pub auto_reset_after: Duration,
    /// Interval between processing progress polls
    pub processing_poll_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            auto_reset_after: Duration::from_secs(3),
            processing_poll_interval: Duration::from_secs(5),
        }
    }
}

/// Shared cell holding the current session
#[derive(Clone)]
pub struct SessionHandle {
    tx: Arc<watch::Sender<UploadSession>>,
}

impl SessionHandle {
    fn new(session: UploadSession) -> Self {
        let (tx, _) = watch::channel(session);
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> UploadSession {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<UploadSession> {
        self.tx.subscribe()
    }

    pub fn current_attempt(&self) -> Uuid {
        self.tx.borrow().attempt_id
    }

    /// Replace the session, returning the previous one
    fn replace(&self, session: UploadSession) -> UploadSession {
        self.tx.send_replace(session)
    }

    /// Mutate the session if it still belongs to `attempt_id`
    ///
    /// Observers are notified only when `f` returns `Some`; `f` must leave
    /// the session untouched when it returns `None`.
    pub(crate) fn update_attempt<R>(
        &self,
        attempt_id: Uuid,
        f: impl FnOnce(&mut UploadSession) -> Option<R>,
    ) -> Option<R> {
        let mut result = None;
        self.tx.send_if_modified(|session| {
            if session.attempt_id != attempt_id {
                return false;
            }
            result = f(session);
            result.is_some()
        });
        result
    }
}

struct InFlightAttempt {
    attempt_id: Uuid,
    cancel: CancellationToken,
}

type InFlightSlot = Arc<Mutex<Option<InFlightAttempt>>>;

fn lock_slot(slot: &InFlightSlot) -> MutexGuard<'_, Option<InFlightAttempt>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Holds the process-wide in-flight slot; releases it on drop
pub struct InFlightGuard {
    slot: InFlightSlot,
    attempt_id: Uuid,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut slot = lock_slot(&self.slot);
        if slot.as_ref().map(|a| a.attempt_id) == Some(self.attempt_id) {
            *slot = None;
        }
    }
}

/// Admitted attempt waiting to be sent
pub struct PendingSubmission {
    guard: InFlightGuard,
    request: TransportRequest,
    cancel: CancellationToken,
    attempt_id: Uuid,
}

impl PendingSubmission {
    pub fn attempt_id(&self) -> Uuid {
        self.attempt_id
    }
}

/// Result of starting an attempt
pub enum Attempt {
    /// Admission control refused the selection; nothing was sent
    RejectedLocally(UploadSession),
    /// Session is `Submitting`; hand to `UploadOrchestrator::run`
    Admitted(PendingSubmission),
}

enum SendOutcome {
    Cancelled,
    Completed(Result<SubmissionResponse, TransportError>),
}

/// Owner of the upload session lifecycle
#[derive(Clone)]
pub struct UploadOrchestrator {
    transport: Arc<dyn UploadTransport>,
    processing_source: Option<Arc<dyn ProcessingStatusSource>>,
    policy: PolicyStore,
    events: EventBus,
    session: SessionHandle,
    in_flight: InFlightSlot,
    history: Option<SqlitePool>,
    config: OrchestratorConfig,
    background: Arc<Mutex<CancellationToken>>,
}

impl UploadOrchestrator {
    pub fn new(transport: Arc<dyn UploadTransport>, policy: PolicyStore, events: EventBus) -> Self {
        Self {
            transport,
            processing_source: None,
            policy,
            events,
            session: SessionHandle::new(UploadSession::idle()),
            in_flight: Arc::new(Mutex::new(None)),
            history: None,
            config: OrchestratorConfig::default(),
            background: Arc::new(Mutex::new(CancellationToken::new())),
        }
    }

    /// Poll processing progress of accepted papers through `source`
    pub fn with_processing_source(mut self, source: Arc<dyn ProcessingStatusSource>) -> Self {
        self.processing_source = Some(source);
        self
    }

    /// Persist every finished attempt to `upload_attempts`
    pub fn with_history(mut self, pool: SqlitePool) -> Self {
        self.history = Some(pool);
        self
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<UploadSession> {
        self.session.subscribe()
    }

    pub fn snapshot(&self) -> UploadSession {
        self.session.snapshot()
    }

    pub fn policy(&self) -> TierPolicy {
        self.policy.snapshot()
    }

    pub fn policy_store(&self) -> &PolicyStore {
        &self.policy
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn is_in_flight(&self) -> bool {
        lock_slot(&self.in_flight).is_some()
    }

    /// Validate and submit a selection, resolving once the attempt ends
    ///
    /// Fails with `AlreadyInFlight`, leaving every state untouched, when
    /// another attempt is validating or submitting.
    pub async fn submit(
        &self,
        selection: FileSelection,
        metadata: BatchMetadata,
    ) -> Result<UploadSession, SubmitError> {
        match self.begin(selection, metadata).await? {
            Attempt::RejectedLocally(session) => Ok(session),
            Attempt::Admitted(pending) => Ok(self.run(pending).await),
        }
    }

    /// Start an attempt: reserve the in-flight slot, run admission control
    /// and build the request
    pub async fn begin(
        &self,
        selection: FileSelection,
        metadata: BatchMetadata,
    ) -> Result<Attempt, SubmitError> {
        let mut session = UploadSession::new(selection, metadata);
        let attempt_id = session.attempt_id;
        let cancel = CancellationToken::new();

        // Reserved before any await so two callers can never both pass
        let guard = self.reserve(attempt_id, cancel.clone())?;
        self.restart_background();

        let policy = self.policy.snapshot();
        session.transition_to(SessionStatus::Validating)?;
        let previous = self.session.replace(session.clone());
        if needs_reset_event(&previous) {
            self.events.emit_lossy(UploadEvent::SessionReset {
                previous_attempt_id: previous.attempt_id,
                timestamp: Utc::now(),
            });
        }
        self.events.emit_lossy(UploadEvent::ValidationStarted {
            attempt_id,
            file_count: session.selection.len(),
            timestamp: Utc::now(),
        });

        match admission::admit(&session.selection, &policy) {
            Admission::Rejected(reason) => {
                session.transition_to(SessionStatus::RejectedLocally {
                    reason: reason.clone(),
                })?;
                self.session.replace(session.clone());
                drop(guard);

                info!(attempt_id = %attempt_id, reason = %reason, "Selection rejected locally");
                self.events.emit_lossy(UploadEvent::RejectedLocally {
                    attempt_id,
                    reason: reason.to_string(),
                    timestamp: Utc::now(),
                });
                self.persist(&session).await;

                Ok(Attempt::RejectedLocally(session))
            }
            Admission::Admitted => {
                let request = request_builder::build(&session.selection, &session.metadata);
                session.transition_to(SessionStatus::Submitting)?;
                self.session.replace(session);

                info!(
                    attempt_id = %attempt_id,
                    files = request.file_count(),
                    bytes = request.total_bytes(),
                    tier = %policy.tier_name(),
                    "Submitting batch"
                );
                self.events.emit_lossy(UploadEvent::SubmissionStarted {
                    attempt_id,
                    file_count: request.file_count(),
                    total_bytes: request.total_bytes(),
                    timestamp: Utc::now(),
                });

                Ok(Attempt::Admitted(PendingSubmission {
                    guard,
                    request,
                    cancel,
                    attempt_id,
                }))
            }
        }
    }

    /// Send an admitted attempt and drive it to its end
    ///
    /// Returns the final session snapshot of the attempt.
    pub async fn run(&self, pending: PendingSubmission) -> UploadSession {
        let PendingSubmission {
            guard,
            request,
            cancel,
            attempt_id,
        } = pending;

        let (sink, mut progress_rx) = ProgressSink::new(attempt_id);
        let mut aggregator = ProgressAggregator::new();
        let mut send = self.transport.submit(request, sink);

        let outcome = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break SendOutcome::Cancelled,
                Some(update) = progress_rx.recv() => {
                    self.apply_progress(attempt_id, &mut aggregator, update);
                }
                result = &mut send => break SendOutcome::Completed(result),
            }
        };
        // Aborts the request if cancellation won the race
        drop(send);

        // Updates emitted before the response are still applied in order
        while let Ok(update) = progress_rx.try_recv() {
            self.apply_progress(attempt_id, &mut aggregator, update);
        }

        match outcome {
            SendOutcome::Cancelled => {
                debug!(attempt_id = %attempt_id, "Attempt cancelled while sending");
            }
            SendOutcome::Completed(Ok(response)) => self.finish_with_response(attempt_id, response),
            SendOutcome::Completed(Err(err)) => self.finish_with_error(attempt_id, err),
        }

        let snapshot = self.session.snapshot();
        if snapshot.status == SessionStatus::Succeeded {
            self.schedule_auto_reset(attempt_id);
        }
        if !snapshot.papers_in_processing().is_empty() {
            self.start_processing_poller(attempt_id);
        }

        // Slot is free before the history write
        drop(guard);
        self.persist(&snapshot).await;
        snapshot
    }

    /// Cancel the in-flight attempt; the session returns to `Idle` at once
    pub fn cancel(&self) -> Result<Uuid, SubmitError> {
        let (attempt_id, token) = lock_slot(&self.in_flight)
            .as_ref()
            .map(|a| (a.attempt_id, a.cancel.clone()))
            .ok_or(SubmitError::NothingInFlight)?;

        let cancelled = self.session.update_attempt(attempt_id, |session| {
            if session.status == SessionStatus::Submitting {
                session.transition_to(SessionStatus::Idle).ok()
            } else {
                None
            }
        });
        if cancelled.is_none() {
            debug!(attempt_id = %attempt_id, "Cancel ignored, attempt already finished");
            return Err(SubmitError::NothingInFlight);
        }
        token.cancel();

        info!(attempt_id = %attempt_id, "Upload cancelled");
        self.events.emit_lossy(UploadEvent::Cancelled {
            attempt_id,
            timestamp: Utc::now(),
        });
        Ok(attempt_id)
    }

    /// User started editing a new selection: return a finished session to `Idle`
    pub fn reset_for_new_selection(&self) -> Result<(), SubmitError> {
        if self.is_in_flight() {
            return Err(SubmitError::AlreadyInFlight);
        }
        let attempt_id = self.session.current_attempt();
        self.reset_attempt(attempt_id);
        Ok(())
    }

    fn reset_attempt(&self, attempt_id: Uuid) -> bool {
        let reset = self
            .session
            .update_attempt(attempt_id, |session| {
                if session.is_terminal()
                    || matches!(session.status, SessionStatus::RejectedLocally { .. })
                {
                    session.transition_to(SessionStatus::Idle).ok()
                } else {
                    None
                }
            })
            .is_some();

        if reset {
            info!(attempt_id = %attempt_id, "Session reset to idle");
            self.events.emit_lossy(UploadEvent::SessionReset {
                previous_attempt_id: attempt_id,
                timestamp: Utc::now(),
            });
        }
        reset
    }

    fn reserve(
        &self,
        attempt_id: Uuid,
        cancel: CancellationToken,
    ) -> Result<InFlightGuard, SubmitError> {
        let mut slot = lock_slot(&self.in_flight);
        if slot.is_some() {
            debug!(attempt_id = %attempt_id, "Submission refused, another attempt is in flight");
            return Err(SubmitError::AlreadyInFlight);
        }
        *slot = Some(InFlightAttempt { attempt_id, cancel });
        Ok(InFlightGuard {
            slot: Arc::clone(&self.in_flight),
            attempt_id,
        })
    }

    /// Stop auto-reset timers and pollers belonging to earlier attempts
    fn restart_background(&self) {
        let mut token = self
            .background
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        token.cancel();
        *token = CancellationToken::new();
    }

    fn background_token(&self) -> CancellationToken {
        self.background
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn apply_progress(
        &self,
        attempt_id: Uuid,
        aggregator: &mut ProgressAggregator,
        update: TransferProgress,
    ) {
        if update.attempt_id != attempt_id {
            debug!(stale = %update.attempt_id, "Discarding progress from another attempt");
            return;
        }

        let percent = aggregator.on_transfer_progress(update.bytes_sent, update.bytes_total);
        let moved = self
            .session
            .update_attempt(attempt_id, |session| session.record_progress(percent).then_some(()))
            .is_some();

        if moved {
            debug!(attempt_id = %attempt_id, percent = percent.value(), "Transfer progress");
            self.events.emit_lossy(UploadEvent::TransferProgress {
                attempt_id,
                percent: percent.value(),
                bytes_sent: update.bytes_sent,
                bytes_total: update.bytes_total,
                timestamp: Utc::now(),
            });
        }
    }

    fn finish_with_response(&self, attempt_id: Uuid, response: SubmissionResponse) {
        let prior_policy = self.policy.snapshot();
        let http_status = response.http_status;

        let applied = self.session.update_attempt(attempt_id, |session| {
            if session.status != SessionStatus::Submitting {
                return None;
            }
            let reconciliation =
                result_reconciler::reconcile(&session.selection, &response, &prior_policy);
            let updated_policy = reconciliation.updated_policy.clone();
            match session.apply_reconciliation(reconciliation) {
                Ok(_) => Some((updated_policy, session.clone())),
                Err(err) => {
                    warn!(attempt_id = %attempt_id, error = %err, "Reconciliation not applied");
                    None
                }
            }
        });

        let Some((updated_policy, session)) = applied else {
            debug!(attempt_id = %attempt_id, "Discarding response for an attempt that already ended");
            return;
        };

        if self.policy.apply_reconciled(updated_policy.clone()) {
            if let Some(remaining) = updated_policy.remaining_this_period().known() {
                info!(tier = %updated_policy.tier_name(), remaining, "Quota updated from server");
                self.events.emit_lossy(UploadEvent::QuotaUpdated {
                    tier_name: updated_policy.tier_name().to_string(),
                    remaining,
                    timestamp: Utc::now(),
                });
            }
        }

        let accepted = accepted_info(&session.accepted_papers);
        let event = match &session.status {
            SessionStatus::Succeeded => {
                info!(attempt_id = %attempt_id, http_status, papers = accepted.len(), "Upload succeeded");
                UploadEvent::Succeeded {
                    attempt_id,
                    accepted,
                    timestamp: Utc::now(),
                }
            }
            SessionStatus::PartiallyFailed => {
                let failed = failed_info(session.failed_entries.values());
                info!(
                    attempt_id = %attempt_id,
                    http_status,
                    accepted = accepted.len(),
                    failed = failed.len(),
                    "Upload partially failed"
                );
                UploadEvent::PartiallyFailed {
                    attempt_id,
                    accepted,
                    failed,
                    timestamp: Utc::now(),
                }
            }
            SessionStatus::Failed { reason } => {
                info!(attempt_id = %attempt_id, http_status, reason = %reason, "Upload failed");
                UploadEvent::Failed {
                    attempt_id,
                    reason: reason.to_string(),
                    timestamp: Utc::now(),
                }
            }
            other => {
                warn!(attempt_id = %attempt_id, status = other.name(), "Unexpected status after reconciliation");
                return;
            }
        };
        self.events.emit_lossy(event);
    }

    fn finish_with_error(&self, attempt_id: Uuid, err: TransportError) {
        let reason = match &err {
            TransportError::Timeout => FailureReason::Timeout,
            TransportError::Decode(_) => FailureReason::InvalidResponse,
            TransportError::Network(_) | TransportError::Build(_) => FailureReason::NetworkError,
        };

        let failed = self.session.update_attempt(attempt_id, |session| {
            if session.status != SessionStatus::Submitting {
                return None;
            }
            session.fail(reason.clone()).ok()
        });

        if failed.is_some() {
            warn!(attempt_id = %attempt_id, error = %err, reason = %reason, "Upload failed");
            self.events.emit_lossy(UploadEvent::Failed {
                attempt_id,
                reason: reason.to_string(),
                timestamp: Utc::now(),
            });
        } else {
            debug!(attempt_id = %attempt_id, error = %err, "Discarding transport error for an attempt that already ended");
        }
    }

    fn schedule_auto_reset(&self, attempt_id: Uuid) {
        let token = self.background_token();
        let delay = self.config.auto_reset_after;
        let orchestrator = self.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    orchestrator.reset_attempt(attempt_id);
                }
            }
        });
    }

    fn start_processing_poller(&self, attempt_id: Uuid) {
        let Some(source) = self.processing_source.clone() else {
            return;
        };
        ProcessingPoller::new(
            source,
            self.session.clone(),
            self.events.clone(),
            attempt_id,
            self.config.processing_poll_interval,
            self.background_token(),
        )
        .spawn();
    }

    async fn persist(&self, session: &UploadSession) {
        let Some(pool) = &self.history else {
            return;
        };
        if let Err(e) = crate::db::attempts::save_attempt(pool, session).await {
            warn!(attempt_id = %session.attempt_id, error = %e, "Failed to record upload attempt");
        }
    }
}

/// Terminal or rejected sessions that were never reset announce their replacement
fn needs_reset_event(previous: &UploadSession) -> bool {
    !previous.is_placeholder() && previous.status != SessionStatus::Idle
}

fn accepted_info(papers: &[AcceptedPaper]) -> Vec<AcceptedPaperInfo> {
    papers
        .iter()
        .map(|p| AcceptedPaperInfo {
            paper_id: p.paper_id.clone(),
            title: p.title.clone(),
            processing_percent: p.processing_progress.value(),
        })
        .collect()
}

fn failed_info<'a>(entries: impl Iterator<Item = &'a FailedEntry>) -> Vec<FailedEntryInfo> {
    entries
        .map(|e| FailedEntryInfo {
            client_index: match e.key {
                FailureKey::ClientIndex(i) => Some(i),
                FailureKey::Filename { .. } => None,
            },
            filename: e.filename.clone(),
            reason: e.reason.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FileHandle;
    use async_trait::async_trait;

    /// Never answers; these tests drive the session by hand
    struct SilentTransport;

    #[async_trait]
    impl UploadTransport for SilentTransport {
        async fn submit(
            &self,
            _request: TransportRequest,
            _progress: ProgressSink,
        ) -> Result<SubmissionResponse, TransportError> {
            std::future::pending().await
        }
    }

    fn orchestrator() -> UploadOrchestrator {
        let policy = TierPolicy::new("free", 5).unwrap();
        UploadOrchestrator::new(
            Arc::new(SilentTransport),
            PolicyStore::new(policy),
            EventBus::new(16),
        )
    }

    fn selection() -> FileSelection {
        FileSelection::new(vec![FileHandle::new("paper.pdf", b"%PDF-1.7".to_vec())])
    }

    #[tokio::test]
    async fn test_cancel_after_terminal_state_is_nothing_in_flight() {
        let orchestrator = orchestrator();
        let mut events = orchestrator.events.subscribe();

        let pending = match orchestrator
            .begin(selection(), BatchMetadata::default())
            .await
            .unwrap()
        {
            Attempt::Admitted(pending) => pending,
            Attempt::RejectedLocally(_) => panic!("one file fits the free tier"),
        };
        let attempt_id = pending.attempt_id;

        // Attempt finished but its slot is not released yet
        orchestrator
            .session
            .update_attempt(attempt_id, |session| {
                session.transition_to(SessionStatus::Succeeded).ok()
            })
            .unwrap();
        assert!(orchestrator.is_in_flight());

        assert!(matches!(
            orchestrator.cancel(),
            Err(SubmitError::NothingInFlight)
        ));
        assert_eq!(orchestrator.snapshot().status, SessionStatus::Succeeded);
        assert!(!pending.cancel.is_cancelled());
        while let Ok(event) = events.try_recv() {
            assert_ne!(event.event_type(), "Cancelled");
        }
    }

    #[tokio::test]
    async fn test_cancel_while_submitting_cancels_token() {
        let orchestrator = orchestrator();

        let pending = match orchestrator
            .begin(selection(), BatchMetadata::default())
            .await
            .unwrap()
        {
            Attempt::Admitted(pending) => pending,
            Attempt::RejectedLocally(_) => panic!("one file fits the free tier"),
        };

        assert_eq!(orchestrator.cancel().unwrap(), pending.attempt_id);
        assert!(pending.cancel.is_cancelled());
        assert_eq!(orchestrator.snapshot().status, SessionStatus::Idle);
    }
}
