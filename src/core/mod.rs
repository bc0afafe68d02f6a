mod coordinator;
mod errors;
mod job;
mod run;
pub mod scanner;
mod stats;
mod traits;
mod types;
mod worker;

pub use coordinator::UploadCoordinator;
pub use errors::{BatchError, ConfigError, Result, ScanError, TransitionError, UploadError};
pub use job::{MAX_TITLE_CHARS, UploadJob};
pub use run::{BatchRun, RunCounters};
pub use scanner::{Rejection, ScanOutcome, scan, scan_detailed};
pub use stats::{BatchSummary, JobOutcome, StatsAggregator, report};
pub use traits::{Session, SubmitMetadata, SubmitResult, UploadClient, UploadedPart};
pub use types::{
    BatchEvent,
    CopyrightMode,
    JobId,
    JobStatus,
    RejectReason,
    UploadPolicy,
    normalize_extension,
};
