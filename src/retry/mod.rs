pub mod engine;
pub mod entry;
pub mod policy;
pub(crate) mod reaper;

pub use engine::{AttemptOutcome, RetryEngine, RetryStats};
pub use entry::{RetryEntry, RetryStatus};
pub use policy::{BackoffKind, RetryPolicy, RetryPolicySet};
