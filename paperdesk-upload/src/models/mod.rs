//! Data models for paperdesk-upload
//!
//! - Tier policy and its shared store
//! - File selection and batch metadata
//! - Upload session state machine
//! - Server response body

pub mod file_selection;
pub mod progress;
pub mod submission_response;
pub mod tier_policy;
pub mod upload_session;

pub use file_selection::{BatchMetadata, FileEntry, FileHandle, FileOutcome, FileSelection};
pub use progress::{ProcessingPercent, TransferPercent};
pub use submission_response::{FailedFile, Limits, SubmissionBody, SubmissionResponse};
pub use tier_policy::{PolicyStore, RemainingQuota, TierPolicy};
pub use upload_session::{
    AcceptedPaper, AdmissionRejection, FailedEntry, FailureKey, FailureReason, InvalidTransition,
    SessionStatus, StateTransition, UploadSession,
};
