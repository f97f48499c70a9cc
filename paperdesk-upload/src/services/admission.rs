//! Pre-flight admission control
//!
//! Advisory check run before any network traffic. The server remains the
//! authority on quota; this only refuses selections that can never succeed.

use crate::models::{AdmissionRejection, FileSelection, TierPolicy};

/// Admission decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Rejected(AdmissionRejection),
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

/// Check a selection against the tier's per-batch ceiling
///
/// Pure; safe to call on every selection change.
pub fn admit(selection: &FileSelection, policy: &TierPolicy) -> Admission {
    if selection.is_empty() {
        return Admission::Rejected(AdmissionRejection::EmptySelection);
    }

    if policy.exceeds_batch_limit(selection.len()) {
        return Admission::Rejected(AdmissionRejection::ExceedsBatchLimit {
            tier_name: policy.tier_name().to_string(),
            limit: policy.max_files_per_batch(),
            requested: selection.len(),
        });
    }

    Admission::Admitted
}
