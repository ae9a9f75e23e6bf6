//! Sequential step execution with reverse-order compensation.
//!
//! Steps run one at a time in step-list order. A step counts as executed
//! only once its forward action succeeds; when a later step fails, executed
//! steps are undone newest first and the original error is reported. The
//! failing step itself is never undone here, steps clean up after their own
//! partial work.

mod engine;
mod progress;

pub use engine::Orchestrator;
pub use progress::{ExecutionProgress, RunFailure, RunReport};
