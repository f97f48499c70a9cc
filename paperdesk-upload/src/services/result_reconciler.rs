//! Result reconciliation
//!
//! Maps one server response back onto the selection that produced it:
//! terminal status, per-entry outcomes, accepted papers and the refreshed
//! tier policy. Pure; the orchestrator applies the output.

use std::collections::BTreeMap;
use tracing::warn;

use crate::models::{
    AcceptedPaper, FailedEntry, FailedFile, FailureKey, FailureReason, FileOutcome,
    FileSelection, SubmissionResponse, TierPolicy,
};

/// Terminal status derived from a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconciledStatus {
    Succeeded,
    PartiallyFailed,
    Failed(FailureReason),
}

/// Everything the session needs to enter its terminal state
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub status: ReconciledStatus,
    pub accepted_papers: Vec<AcceptedPaper>,
    pub failed_entries: BTreeMap<FailureKey, FailedEntry>,
    /// One outcome per selection entry, in `client_index` order
    pub entry_outcomes: Vec<FileOutcome>,
    pub updated_policy: TierPolicy,
    /// Filenames whose failure could not be pinned to one entry
    pub ambiguous: Vec<String>,
}

/// Reconcile a server response against the submitted selection
pub fn reconcile(
    selection: &FileSelection,
    response: &SubmissionResponse,
    prior_policy: &TierPolicy,
) -> Reconciliation {
    let body = &response.body;
    let updated_policy = match body.reported_remaining() {
        Some(remaining) => prior_policy.with_server_remaining(remaining),
        None => prior_policy.clone(),
    };

    let mut entry_outcomes = vec![FileOutcome::Pending; selection.len()];

    if body.failed_files.is_empty() && !response.is_success() {
        // Total rejection: no per-file outcomes
        let reason = classify_failure(
            response.http_status,
            body.message.as_deref(),
            body.reported_remaining(),
        );
        return Reconciliation {
            status: ReconciledStatus::Failed(reason),
            accepted_papers: Vec::new(),
            failed_entries: BTreeMap::new(),
            entry_outcomes,
            updated_policy,
            ambiguous: Vec::new(),
        };
    }

    let mut failed_entries = BTreeMap::new();
    let mut ambiguous = Vec::new();
    let mut name_occurrences: BTreeMap<&str, usize> = BTreeMap::new();

    for failed in &body.failed_files {
        let key = match correlate(selection, failed, &mut entry_outcomes, &mut ambiguous) {
            Some(index) => FailureKey::ClientIndex(index),
            None => {
                let seen = name_occurrences.entry(failed.filename.as_str()).or_insert(0);
                let occurrence = *seen;
                *seen += 1;
                FailureKey::Filename {
                    name: failed.filename.clone(),
                    occurrence,
                }
            }
        };
        let entry = FailedEntry {
            key: key.clone(),
            filename: failed.filename.clone(),
            reason: failed.error.clone(),
        };
        if failed_entries.insert(key, entry).is_some() {
            warn!(filename = %failed.filename, "Server reported the same file as failed twice");
        }
    }

    for outcome in entry_outcomes.iter_mut() {
        if *outcome == FileOutcome::Pending {
            *outcome = FileOutcome::Accepted;
        }
    }

    let accepted_papers = body.papers.clone();
    let accounted = accepted_papers.len() + failed_entries.len();
    if accounted != selection.len() {
        warn!(
            files = selection.len(),
            accepted = accepted_papers.len(),
            failed = failed_entries.len(),
            "Server response does not account for every submitted file"
        );
    }

    let status = if failed_entries.is_empty() {
        ReconciledStatus::Succeeded
    } else {
        ReconciledStatus::PartiallyFailed
    };

    Reconciliation {
        status,
        accepted_papers,
        failed_entries,
        entry_outcomes,
        updated_policy,
        ambiguous,
    }
}

/// Pin one reported failure to a selection entry
///
/// Index wins when present and in range; otherwise the filename must name
/// exactly one entry. `None` when no single entry can be named.
fn correlate(
    selection: &FileSelection,
    failed: &FailedFile,
    entry_outcomes: &mut [FileOutcome],
    ambiguous: &mut Vec<String>,
) -> Option<usize> {
    if let Some(index) = failed.index {
        if let Some(entry) = selection.get(index) {
            if entry.filename() != failed.filename {
                warn!(
                    index,
                    reported = %failed.filename,
                    submitted = %entry.filename(),
                    "Failure index and filename disagree, trusting index"
                );
            }
            entry_outcomes[index] = FileOutcome::Rejected(failed.error.clone());
            return Some(index);
        }
        warn!(index, filename = %failed.filename, "Failure index out of range, falling back to filename");
    }

    let indices = selection.indices_named(&failed.filename);
    match indices.as_slice() {
        [index] => {
            entry_outcomes[*index] = FileOutcome::Rejected(failed.error.clone());
            Some(*index)
        }
        [] => {
            warn!(filename = %failed.filename, "Failure names a file that was not submitted");
            None
        }
        _ => {
            warn!(
                filename = %failed.filename,
                entries = indices.len(),
                "Failure names a filename shared by several entries"
            );
            for index in indices {
                entry_outcomes[index] = FileOutcome::Ambiguous(failed.error.clone());
            }
            if !ambiguous.contains(&failed.filename) {
                ambiguous.push(failed.filename.clone());
            }
            None
        }
    }
}

/// Blanket reason for a response with no per-file failures
pub fn classify_failure(
    http_status: u16,
    message: Option<&str>,
    reported_remaining: Option<u32>,
) -> FailureReason {
    let mentions_quota = message
        .map(|m| {
            let m = m.to_ascii_lowercase();
            m.contains("quota") || m.contains("upload limit")
        })
        .unwrap_or(false);

    match http_status {
        402 | 429 => FailureReason::QuotaExceeded,
        400 | 403 if mentions_quota => FailureReason::QuotaExceeded,
        403 if reported_remaining == Some(0) => FailureReason::QuotaExceeded,
        401 | 403 => FailureReason::Unauthorized,
        status => FailureReason::Server {
            status,
            message: message
                .map(str::to_string)
                .unwrap_or_else(|| format!("HTTP {}", status)),
        },
    }
}
