// Core infrastructure shared by the executor and the scheduler

pub mod errors;

// Re-export commonly used types
pub use errors::{BuildError, Result};

/// Shared abort signal for one scheduler invocation. Clones observe the same
/// state and a cancelled token never resets, so build a fresh one per run.
pub use tokio_util::sync::CancellationToken;
