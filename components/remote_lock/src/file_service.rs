//! Lock store backed by a shared directory, one record per host and scope.

use crate::service::{LockAttempt, LockScope, LockService, LockServiceError, ReleaseOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub owner: String,
    pub scope: LockScope,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

fn expiry_after(now: DateTime<Utc>, validity: Duration) -> DateTime<Utc> {
    let validity = chrono::Duration::from_std(validity).unwrap_or(chrono::Duration::MAX);
    now.checked_add_signed(validity)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl LockRecord {
    fn new(owner: &str, scope: LockScope, validity: Duration) -> Self {
        let now = Utc::now();
        Self {
            owner: owner.to_string(),
            scope,
            acquired_at: now,
            expires_at: expiry_after(now, validity),
        }
    }

    fn renewed(self, validity: Duration) -> Self {
        Self {
            expires_at: expiry_after(Utc::now(), validity),
            ..self
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// How long to wait for another job's guard before giving up.
const GUARD_WAIT: Duration = Duration::from_secs(5);
const GUARD_POLL: Duration = Duration::from_millis(20);
/// A guard this old belongs to a crashed job.
const GUARD_STALE: Duration = Duration::from_secs(30);

static SCRATCH_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Marker file serializing every change to an existing record.
///
/// New records never need it: they are published complete with a
/// no-clobber hard link, so readers never see a partial record.
struct RecordGuard {
    path: PathBuf,
}

impl Drop for RecordGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!("Cannot remove lock guard {}: {e}", self.path.display());
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileLockService {
    dir: PathBuf,
}

impl FileLockService {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn record_path(&self, host: &str, scope: LockScope) -> PathBuf {
        self.dir.join(format!("{host}.{scope}.lock"))
    }

    /// Unique sibling of `path` for staging a record.
    fn scratch_path(path: &Path) -> PathBuf {
        let seq = SCRATCH_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        path.with_extension(format!("lock.{}.{seq}.tmp", std::process::id()))
    }

    async fn read_record(
        path: &Path,
        host: &str,
    ) -> Result<Option<LockRecord>, LockServiceError> {
        match tokio::fs::read_to_string(path).await {
            Ok(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| LockServiceError::Corrupt {
                    host: host.to_string(),
                    reason: e.to_string(),
                }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LockServiceError::io(path, e)),
        }
    }

    fn encode(record: &LockRecord, host: &str) -> Result<String, LockServiceError> {
        serde_json::to_string(record).map_err(|e| LockServiceError::Corrupt {
            host: host.to_string(),
            reason: e.to_string(),
        })
    }

    async fn stage(path: &Path, body: &str) -> Result<PathBuf, LockServiceError> {
        let scratch = Self::scratch_path(path);
        tokio::fs::write(&scratch, body)
            .await
            .map_err(|e| LockServiceError::io(&scratch, e))?;
        Ok(scratch)
    }

    /// Create the record at `path` unless one exists. `false` when another
    /// job got there first.
    async fn publish(path: &Path, body: &str) -> Result<bool, LockServiceError> {
        let scratch = Self::stage(path, body).await?;
        let linked = tokio::fs::hard_link(&scratch, path).await;
        if let Err(e) = tokio::fs::remove_file(&scratch).await {
            tracing::warn!("Cannot remove {}: {e}", scratch.display());
        }
        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(LockServiceError::io(path, e)),
        }
    }

    /// Overwrite the record at `path` in one step. Caller holds the guard.
    async fn replace(path: &Path, body: &str) -> Result<(), LockServiceError> {
        let scratch = Self::stage(path, body).await?;
        tokio::fs::rename(&scratch, path)
            .await
            .map_err(|e| LockServiceError::io(path, e))
    }

    async fn guard(path: &Path) -> Result<RecordGuard, LockServiceError> {
        let guard = path.with_extension("lock.guard");
        let deadline = Instant::now() + GUARD_WAIT;
        loop {
            let created = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&guard)
                .await;
            match created {
                Ok(_) => return Ok(RecordGuard { path: guard }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(LockServiceError::io(&guard, e)),
            }

            if Self::is_stale(&guard).await {
                tracing::warn!("Breaking stale lock guard {}", guard.display());
                match tokio::fs::remove_file(&guard).await {
                    Ok(()) => continue,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(LockServiceError::io(&guard, e)),
                }
            }
            if Instant::now() >= deadline {
                return Err(LockServiceError::io(
                    &guard,
                    std::io::Error::new(std::io::ErrorKind::TimedOut, "lock guard busy"),
                ));
            }
            tokio::time::sleep(GUARD_POLL).await;
        }
    }

    async fn is_stale(guard: &Path) -> bool {
        let Ok(metadata) = tokio::fs::metadata(guard).await else {
            return false;
        };
        metadata
            .modified()
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .is_some_and(|age| age > GUARD_STALE)
    }

    async fn is_empty(path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .is_ok_and(|metadata| metadata.len() == 0)
    }

    async fn remove_record(path: &Path) -> Result<ReleaseOutcome, LockServiceError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(ReleaseOutcome::Released),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ReleaseOutcome::NotFound),
            Err(e) => Err(LockServiceError::io(path, e)),
        }
    }
}

#[async_trait]
impl LockService for FileLockService {
    async fn try_acquire(
        &self,
        host: &str,
        scope: LockScope,
        owner: &str,
        validity: Duration,
    ) -> Result<LockAttempt, LockServiceError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| LockServiceError::io(&self.dir, e))?;
        let path = self.record_path(host, scope);
        let record = LockRecord::new(owner, scope, validity);
        let body = Self::encode(&record, host)?;

        if Self::publish(&path, &body).await? {
            return Ok(LockAttempt::Acquired);
        }

        let _guard = Self::guard(&path).await?;
        let existing = match Self::read_record(&path, host).await {
            Ok(existing) => existing,
            // Empty record: a writer without hard-link publication is mid-write.
            Err(LockServiceError::Corrupt { .. }) if Self::is_empty(&path).await => {
                return Ok(LockAttempt::Held {
                    owner: "unknown".into(),
                });
            }
            Err(e) => return Err(e),
        };
        let Some(existing) = existing else {
            // Released since the publish attempt.
            return Ok(if Self::publish(&path, &body).await? {
                LockAttempt::Acquired
            } else {
                LockAttempt::Held {
                    owner: "unknown".into(),
                }
            });
        };

        if existing.owner == owner {
            Self::replace(&path, &body).await?;
            Ok(LockAttempt::Acquired)
        } else if existing.is_expired() {
            Self::remove_record(&path).await?;
            if Self::publish(&path, &body).await? {
                Ok(LockAttempt::ExpiredAndAcquired {
                    previous_owner: existing.owner,
                })
            } else {
                Ok(LockAttempt::Held {
                    owner: "unknown".into(),
                })
            }
        } else {
            Ok(LockAttempt::Held {
                owner: existing.owner,
            })
        }
    }

    async fn renew(
        &self,
        host: &str,
        scope: LockScope,
        owner: &str,
        validity: Duration,
    ) -> Result<(), LockServiceError> {
        let path = self.record_path(host, scope);
        let _guard = Self::guard(&path).await?;
        let Some(existing) = Self::read_record(&path, host).await? else {
            return Err(LockServiceError::Lost {
                host: host.to_string(),
            });
        };
        if existing.owner != owner {
            return Err(LockServiceError::NotOwner {
                host: host.to_string(),
                owner: existing.owner,
            });
        }
        let body = Self::encode(&existing.renewed(validity), host)?;
        Self::replace(&path, &body).await
    }

    async fn release(
        &self,
        host: &str,
        scope: LockScope,
        owner: &str,
    ) -> Result<ReleaseOutcome, LockServiceError> {
        let path = self.record_path(host, scope);
        let _guard = Self::guard(&path).await?;
        let Some(existing) = Self::read_record(&path, host).await? else {
            return Ok(ReleaseOutcome::NotFound);
        };
        if existing.owner != owner {
            return Err(LockServiceError::NotOwner {
                host: host.to_string(),
                owner: existing.owner,
            });
        }
        Self::remove_record(&path).await
    }
}
