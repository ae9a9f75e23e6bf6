use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Which hosts of the cluster a lock covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockScope {
    Dom0,
    Domu,
    Cell,
    Switch,
}

impl LockScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockScope::Dom0 => "dom0",
            LockScope::Domu => "domu",
            LockScope::Cell => "cell",
            LockScope::Switch => "switch",
        }
    }
}

impl fmt::Display for LockScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one acquisition attempt on one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAttempt {
    Acquired,
    /// A stale lock of another owner had expired and was taken over.
    ExpiredAndAcquired { previous_owner: String },
    Held { owner: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    NotFound,
}

#[derive(Error, Debug)]
pub enum LockServiceError {
    #[error("failed to access lock file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unreadable lock record on {host}: {reason}")]
    Corrupt { host: String, reason: String },

    #[error("lock on {host} is owned by {owner}")]
    NotOwner { host: String, owner: String },

    #[error("lock on {host} is no longer held")]
    Lost { host: String },
}

impl LockServiceError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LockServiceError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Per-host lock primitive offered by the lock store.
#[async_trait]
pub trait LockService: Send + Sync {
    async fn try_acquire(
        &self,
        host: &str,
        scope: LockScope,
        owner: &str,
        validity: Duration,
    ) -> Result<LockAttempt, LockServiceError>;

    /// Push the expiry of a lock `owner` holds on `host` out by `validity`.
    async fn renew(
        &self,
        host: &str,
        scope: LockScope,
        owner: &str,
        validity: Duration,
    ) -> Result<(), LockServiceError>;

    async fn release(
        &self,
        host: &str,
        scope: LockScope,
        owner: &str,
    ) -> Result<ReleaseOutcome, LockServiceError>;
}
