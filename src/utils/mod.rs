pub mod format;
pub mod retry;

pub use format::{format_bytes, format_duration};
pub use retry::{
    BackoffRetry, BackoffStrategy, ClassifyingRetry, ErrorClass, FixedDelayRetry,
    RetryDecision, RetryPolicy, classify_validation_as_fatal,
};
