//! Cluster-scoped mutual exclusion through an external lock service.
//!
//! A [`RemoteLock`] covers every host of one [`LockScope`] of a cluster.
//! Hosts are locked in sorted order so concurrent jobs touching the same
//! cells cannot deadlock on each other.

mod file_service;
mod lock;
mod service;

pub use file_service::{FileLockService, LockRecord};
pub use lock::{ClusterLock, LockSettings, RemoteLock};
pub use service::{LockAttempt, LockScope, LockService, LockServiceError, ReleaseOutcome};
