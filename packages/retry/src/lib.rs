pub mod clock;
pub mod error;
pub mod machine;
pub mod publisher;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod transition;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{PublishError, RetryError, StoreError};
pub use machine::{RejectReason, RetryOutcome, RetryStateMachine};
pub use publisher::BrokerPublisher;
pub use scheduler::{
    BatchReport, DEFAULT_CLAIM_TIMEOUT, MIN_SCAN_INTERVAL, RetryScheduler, run_retry_scheduler,
};
pub use service::{DEFAULT_MAX_RETRIES, ForceRetry, RetryService};
pub use store::{FailureRecordStore, InMemoryFailureStore};
