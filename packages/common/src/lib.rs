pub mod backoff;
pub mod config;
pub mod record;
pub mod status;

pub use backoff::{BackoffPolicy, ExponentialBackoff, StagedBackoff};
pub use record::{FailureRecord, MessageOrigin, RecordFilter, RetryStatistics, StatusCounts};
pub use status::{FailureStatus, ParseStatusError};
