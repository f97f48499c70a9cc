//! Server-side processing progress poller
//!
//! Runs after an attempt reaches a terminal state with accepted papers. Only
//! `accepted_papers[i].processing_progress` of that attempt is ever written;
//! transfer progress and status are left alone.

use chrono::Utc;
use paperdesk_common::events::{EventBus, UploadEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::orchestrator::SessionHandle;
use super::transport::ProcessingStatusSource;

/// Periodic processing progress lookup for one attempt
pub struct ProcessingPoller {
    source: Arc<dyn ProcessingStatusSource>,
    session: SessionHandle,
    events: EventBus,
    attempt_id: Uuid,
    interval: Duration,
    cancel: CancellationToken,
}

impl ProcessingPoller {
    pub fn new(
        source: Arc<dyn ProcessingStatusSource>,
        session: SessionHandle,
        events: EventBus,
        attempt_id: Uuid,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            session,
            events,
            attempt_id,
            interval,
            cancel,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Poll until every paper is complete, the attempt is replaced, or cancelled
    pub async fn run(self) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(attempt_id = %self.attempt_id, "Processing progress poller started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if self.session.current_attempt() != self.attempt_id {
                break;
            }
            let pending = self.session.snapshot().papers_in_processing();
            if pending.is_empty() {
                break;
            }

            for paper_id in pending {
                match self.source.processing_progress(&paper_id).await {
                    Ok(progress) => {
                        let moved = self
                            .session
                            .update_attempt(self.attempt_id, |session| {
                                session
                                    .update_processing_progress(&paper_id, progress)
                                    .then_some(())
                            })
                            .is_some();
                        if moved {
                            self.events.emit_lossy(UploadEvent::ProcessingProgress {
                                attempt_id: self.attempt_id,
                                paper_id: paper_id.clone(),
                                processing_percent: progress.value(),
                                timestamp: Utc::now(),
                            });
                        }
                    }
                    Err(e) => {
                        warn!(
                            attempt_id = %self.attempt_id,
                            paper_id = %paper_id,
                            error = %e,
                            "Processing status lookup failed"
                        );
                    }
                }
            }
        }

        debug!(attempt_id = %self.attempt_id, "Processing progress poller stopped");
    }
}
