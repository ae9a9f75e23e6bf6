use crate::service::{LockAttempt, LockScope, LockService, ReleaseOutcome};
use async_trait::async_trait;
use cluster_context::ClusterContext;
use parking_lot::Mutex;
use provisioning_primitives::{ProvisioningError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

/// Lock held around a bounded critical section of a step.
///
/// `release` without a held lock is a logged no-op.
#[async_trait]
pub trait ClusterLock: Send + Sync {
    async fn acquire(&self) -> Result<()>;
    async fn release(&self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct LockSettings {
    /// Lifetime of a lock record; a crashed holder's lock expires after it.
    /// Held records are renewed every third of it.
    pub validity: Duration,
    /// Give up acquiring after this long.
    pub acquire_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            validity: Duration::from_secs(600),
            acquire_timeout: Duration::from_secs(30 * 60),
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(16),
        }
    }
}

pub struct RemoteLock {
    service: Arc<dyn LockService>,
    scope: LockScope,
    hosts: Vec<String>,
    owner: String,
    enabled: bool,
    settings: LockSettings,
    depth: Mutex<u32>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for RemoteLock {
    fn drop(&mut self) {
        if let Some(heartbeat) = self.heartbeat.lock().take() {
            heartbeat.abort();
        }
    }
}

impl std::fmt::Debug for RemoteLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteLock")
            .field("scope", &self.scope)
            .field("hosts", &self.hosts)
            .field("owner", &self.owner)
            .field("enabled", &self.enabled)
            .field("depth", &*self.depth.lock())
            .finish()
    }
}

impl RemoteLock {
    pub fn new(
        service: Arc<dyn LockService>,
        scope: LockScope,
        hosts: impl IntoIterator<Item = String>,
        owner: impl Into<String>,
        settings: LockSettings,
    ) -> Self {
        let mut hosts: Vec<String> = hosts.into_iter().collect();
        hosts.sort();
        hosts.dedup();
        Self {
            service,
            scope,
            hosts,
            owner: owner.into(),
            enabled: true,
            settings,
            depth: Mutex::new(0),
            heartbeat: Mutex::new(None),
        }
    }

    /// Lock over the hosts of `scope` in `cluster`. Single-VM environments
    /// get a lock that never touches the service.
    pub fn for_cluster(
        cluster: &dyn ClusterContext,
        scope: LockScope,
        service: Arc<dyn LockService>,
        owner: impl Into<String>,
        settings: LockSettings,
    ) -> Self {
        let hosts = match scope {
            LockScope::Dom0 => cluster.dom0s(),
            LockScope::Domu => cluster.domus(),
            LockScope::Cell => cluster.cells().to_vec(),
            LockScope::Switch => cluster.switches().to_vec(),
        };
        let mut lock = Self::new(service, scope, hosts, owner, settings);
        lock.enabled = cluster.is_shared_env();
        lock
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn is_held(&self) -> bool {
        *self.depth.lock() > 0
    }

    async fn acquire_host(&self, host: &str, deadline: Instant) -> Result<()> {
        let mut backoff = self.settings.initial_backoff;
        loop {
            let attempt = self
                .service
                .try_acquire(host, self.scope, &self.owner, self.settings.validity)
                .await
                .map_err(|e| {
                    ProvisioningError::lock_contention(format!(
                        "{} lock on {host}: {e}",
                        self.scope
                    ))
                })?;

            match attempt {
                LockAttempt::Acquired => return Ok(()),
                LockAttempt::ExpiredAndAcquired { previous_owner } => {
                    tracing::warn!(
                        "⚠️  Took over expired {} lock on {host} from {previous_owner}",
                        self.scope
                    );
                    return Ok(());
                }
                LockAttempt::Held { owner } => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(ProvisioningError::lock_contention(format!(
                            "timed out waiting for {} lock on {host}, held by {owner}",
                            self.scope
                        ))
                        .with_suggestion(
                            "another job is working on the same hosts; retry once it completes",
                        ));
                    }
                    let wait = backoff.min(deadline - now);
                    tracing::info!(
                        "🔒 {} lock on {host} held by {owner}, retrying in {:?}",
                        self.scope,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                    backoff = (backoff * 2).min(self.settings.max_backoff);
                }
            }
        }
    }

    /// Keep the records of `held` hosts alive until the task is aborted.
    fn spawn_heartbeat(&self, held: Arc<Mutex<Vec<String>>>) -> JoinHandle<()> {
        let service = self.service.clone();
        let scope = self.scope;
        let owner = self.owner.clone();
        let validity = self.settings.validity;
        let period = (validity / 3).max(MIN_HEARTBEAT);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let hosts = held.lock().clone();
                for host in hosts {
                    if let Err(e) = service.renew(&host, scope, &owner, validity).await {
                        tracing::error!("🔒 Cannot renew {scope} lock on {host}: {e}");
                    }
                }
            }
        })
    }

    /// Release `hosts` in reverse order, collecting failures.
    async fn release_hosts(&self, hosts: &[String]) -> Vec<String> {
        let mut failures = Vec::new();
        for host in hosts.iter().rev() {
            match self.service.release(host, self.scope, &self.owner).await {
                Ok(ReleaseOutcome::Released) => {}
                Ok(ReleaseOutcome::NotFound) => {
                    tracing::warn!("{} lock on {host} already gone", self.scope);
                }
                Err(e) => failures.push(format!("{host}: {e}")),
            }
        }
        failures
    }
}

#[async_trait]
impl ClusterLock for RemoteLock {
    async fn acquire(&self) -> Result<()> {
        if !self.enabled {
            tracing::debug!("Single VM environment, skipping {} lock", self.scope);
            return Ok(());
        }
        {
            let mut depth = self.depth.lock();
            if *depth > 0 {
                *depth += 1;
                tracing::debug!("{} lock already held, depth {}", self.scope, *depth);
                return Ok(());
            }
        }

        tracing::info!("🔒 Acquiring {} lock on {:?}", self.scope, self.hosts);
        let deadline = Instant::now() + self.settings.acquire_timeout;
        let held = Arc::new(Mutex::new(Vec::with_capacity(self.hosts.len())));
        let heartbeat = self.spawn_heartbeat(held.clone());
        for host in &self.hosts {
            if let Err(e) = self.acquire_host(host, deadline).await {
                heartbeat.abort();
                let acquired = held.lock().clone();
                for failure in self.release_hosts(&acquired).await {
                    tracing::error!("Failed to roll back partial lock: {failure}");
                }
                return Err(e);
            }
            held.lock().push(host.clone());
        }

        *self.depth.lock() = 1;
        *self.heartbeat.lock() = Some(heartbeat);
        tracing::info!("✅ {} lock acquired", self.scope);
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        {
            let mut depth = self.depth.lock();
            match *depth {
                0 => {
                    tracing::warn!(
                        "⚠️  Release of {} lock requested but it is not held",
                        self.scope
                    );
                    return Ok(());
                }
                1 => *depth = 0,
                _ => {
                    *depth -= 1;
                    return Ok(());
                }
            }
        }

        if let Some(heartbeat) = self.heartbeat.lock().take() {
            heartbeat.abort();
        }
        let failures = self.release_hosts(&self.hosts).await;
        if failures.is_empty() {
            tracing::info!("🔓 {} lock released", self.scope);
            Ok(())
        } else {
            Err(ProvisioningError::lock_contention(format!(
                "failed to release {} lock: {}",
                self.scope,
                failures.join("; ")
            ))
            .retryable(false))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::LockServiceError;
    use assert_matches::assert_matches;
    use provisioning_primitives::ErrorKind;
    use std::collections::HashMap;

    /// In-memory lock store; `busy` hosts report `Held` for N attempts.
    #[derive(Default)]
    struct MemoryService {
        held: Mutex<HashMap<String, String>>,
        busy: Mutex<HashMap<String, u32>>,
        journal: Mutex<Vec<String>>,
        fail_release: bool,
    }

    #[async_trait]
    impl LockService for MemoryService {
        async fn try_acquire(
            &self,
            host: &str,
            _scope: LockScope,
            owner: &str,
            _validity: Duration,
        ) -> std::result::Result<LockAttempt, LockServiceError> {
            self.journal.lock().push(format!("acquire {host}"));
            if let Some(n) = self.busy.lock().get_mut(host) {
                if *n > 0 {
                    *n -= 1;
                    return Ok(LockAttempt::Held {
                        owner: "other-job".into(),
                    });
                }
            }
            self.held.lock().insert(host.into(), owner.into());
            Ok(LockAttempt::Acquired)
        }

        async fn renew(
            &self,
            host: &str,
            _scope: LockScope,
            _owner: &str,
            _validity: Duration,
        ) -> std::result::Result<(), LockServiceError> {
            self.journal.lock().push(format!("renew {host}"));
            Ok(())
        }

        async fn release(
            &self,
            host: &str,
            _scope: LockScope,
            _owner: &str,
        ) -> std::result::Result<ReleaseOutcome, LockServiceError> {
            self.journal.lock().push(format!("release {host}"));
            if self.fail_release {
                return Err(LockServiceError::Corrupt {
                    host: host.into(),
                    reason: "store unavailable".into(),
                });
            }
            Ok(match self.held.lock().remove(host) {
                Some(_) => ReleaseOutcome::Released,
                None => ReleaseOutcome::NotFound,
            })
        }
    }

    fn fast_settings() -> LockSettings {
        LockSettings {
            validity: Duration::from_secs(600),
            acquire_timeout: Duration::from_millis(50),
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    fn lock_over(service: Arc<MemoryService>) -> RemoteLock {
        RemoteLock::new(
            service,
            LockScope::Cell,
            vec!["cell03".into(), "cell01".into(), "cell02".into()],
            "job-1",
            fast_settings(),
        )
    }

    #[tokio::test]
    async fn acquires_hosts_in_sorted_order() {
        let service = Arc::new(MemoryService::default());
        let lock = lock_over(service.clone());

        lock.acquire().await.unwrap();
        assert!(lock.is_held());
        lock.release().await.unwrap();
        assert!(!lock.is_held());

        assert_eq!(
            *service.journal.lock(),
            vec![
                "acquire cell01",
                "acquire cell02",
                "acquire cell03",
                "release cell03",
                "release cell02",
                "release cell01",
            ]
        );
    }

    #[tokio::test]
    async fn nested_acquire_only_locks_once() {
        let service = Arc::new(MemoryService::default());
        let lock = lock_over(service.clone());

        lock.acquire().await.unwrap();
        lock.acquire().await.unwrap();
        lock.release().await.unwrap();
        assert!(lock.is_held());
        lock.release().await.unwrap();
        assert!(!lock.is_held());

        let journal = service.journal.lock();
        assert_eq!(journal.iter().filter(|e| e.starts_with("acquire")).count(), 3);
        assert_eq!(journal.iter().filter(|e| e.starts_with("release")).count(), 3);
    }

    #[tokio::test]
    async fn release_without_acquire_is_a_no_op() {
        let service = Arc::new(MemoryService::default());
        let lock = lock_over(service.clone());

        lock.release().await.unwrap();
        lock.release().await.unwrap();
        assert!(!lock.is_held());
        assert!(service.journal.lock().is_empty());

        lock.acquire().await.unwrap();
        assert!(lock.is_held());
    }

    #[tokio::test]
    async fn retries_while_held_elsewhere() {
        let service = Arc::new(MemoryService::default());
        service.busy.lock().insert("cell02".into(), 2);
        let lock = lock_over(service.clone());

        lock.acquire().await.unwrap();
        let attempts = service
            .journal
            .lock()
            .iter()
            .filter(|e| *e == "acquire cell02")
            .count();
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn contention_times_out_and_rolls_back_partial_locks() {
        let service = Arc::new(MemoryService::default());
        service.busy.lock().insert("cell02".into(), u32::MAX);
        let lock = lock_over(service.clone());

        let err = lock.acquire().await.unwrap_err();
        assert_matches!(err.kind(), ErrorKind::LockContention);
        assert!(!lock.is_held());
        assert!(service.held.lock().is_empty());
        assert!(service
            .journal
            .lock()
            .iter()
            .any(|e| e == "release cell01"));
    }

    #[tokio::test]
    async fn failed_release_reports_error_and_clears_depth() {
        let service = Arc::new(MemoryService {
            fail_release: true,
            ..Default::default()
        });
        let lock = lock_over(service);

        lock.acquire().await.unwrap();
        let err = lock.release().await.unwrap_err();
        assert_matches!(err.kind(), ErrorKind::LockContention);
        assert!(!err.is_retryable());
        assert!(!lock.is_held());
    }

    #[tokio::test]
    async fn disabled_lock_never_calls_service() {
        let service = Arc::new(MemoryService::default());
        let mut lock = lock_over(service.clone());
        lock.enabled = false;

        lock.acquire().await.unwrap();
        lock.release().await.unwrap();
        assert!(service.journal.lock().is_empty());
    }

    #[tokio::test]
    async fn held_lock_is_renewed_until_release() {
        let service = Arc::new(MemoryService::default());
        let lock = RemoteLock::new(
            service.clone(),
            LockScope::Cell,
            vec!["cell01".into()],
            "job-1",
            LockSettings {
                validity: Duration::from_millis(30),
                ..fast_settings()
            },
        );
        let renewals = || {
            service
                .journal
                .lock()
                .iter()
                .filter(|e| *e == "renew cell01")
                .count()
        };

        lock.acquire().await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(renewals() > 0);

        lock.release().await.unwrap();
        let after_release = renewals();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(renewals(), after_release);
    }
}
