//! Upload session services
//!
//! Pure building blocks (admission, request building, progress aggregation,
//! reconciliation) plus the transport and the orchestrator that owns the
//! session lifecycle.

pub mod admission;
pub mod orchestrator;
pub mod processing_poller;
pub mod progress_aggregator;
pub mod request_builder;
pub mod result_reconciler;
pub mod transport;

pub use admission::{admit, Admission};
pub use orchestrator::{
    Attempt, OrchestratorConfig, PendingSubmission, SessionHandle, SubmitError,
    UploadOrchestrator,
};
pub use processing_poller::ProcessingPoller;
pub use progress_aggregator::ProgressAggregator;
pub use request_builder::{FilePart, TransportRequest};
pub use result_reconciler::{reconcile, ReconciledStatus, Reconciliation};
pub use transport::{
    HttpTransport, ProcessingStatusSource, ProgressSink, TransferProgress, TransportError,
    UploadTransport,
};
