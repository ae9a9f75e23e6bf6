use async_trait::async_trait;
use cluster_context::{ClusterContext, InfraOps, InfraTask, JobOptions};
use image_ledger::Ledger;
use provisioning_primitives::{Result, StepList, StepName};
use remote_lock::ClusterLock;
use std::future::Future;
use std::sync::Arc;
use step_executor::{OedaRequest, StepExecutor};

/// A named provisioning step with a forward and a compensating action.
///
/// Steps hold nothing but their name; everything a run needs comes in
/// through the [`ProvisioningContext`] and the job options.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &StepName;

    async fn do_execute(
        &self,
        ctx: &ProvisioningContext,
        options: &JobOptions,
        step_list: &StepList,
    ) -> Result<()>;

    /// Must cope with `do_execute` never having run, or having stopped
    /// half way.
    async fn undo_execute(
        &self,
        ctx: &ProvisioningContext,
        options: &JobOptions,
        step_list: &StepList,
    ) -> Result<()>;
}

/// Collaborators shared by all steps of one run.
pub struct ProvisioningContext {
    cluster: Arc<dyn ClusterContext>,
    ledger: Ledger,
    executor: Arc<dyn StepExecutor>,
    remote_lock: Arc<dyn ClusterLock>,
    infra: Arc<dyn InfraOps>,
}

impl ProvisioningContext {
    pub fn new(
        cluster: Arc<dyn ClusterContext>,
        ledger: Ledger,
        executor: Arc<dyn StepExecutor>,
        remote_lock: Arc<dyn ClusterLock>,
        infra: Arc<dyn InfraOps>,
    ) -> Self {
        Self {
            cluster,
            ledger,
            executor,
            remote_lock,
            infra,
        }
    }

    pub fn cluster(&self) -> &dyn ClusterContext {
        self.cluster.as_ref()
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn remote_lock(&self) -> &dyn ClusterLock {
        self.remote_lock.as_ref()
    }

    pub fn infra(&self) -> &dyn InfraOps {
        self.infra.as_ref()
    }

    pub fn is_sub_step_done(&self, step: &StepName, sub_step: &str) -> bool {
        self.ledger.is_sub_step_done(step.as_str(), sub_step)
    }

    /// Run one sub-operation of the external tool on behalf of `step`.
    pub async fn oeda(
        &self,
        step: &StepName,
        step_list: &StepList,
        request: OedaRequest,
    ) -> Result<()> {
        self.executor
            .run(self.cluster.as_ref(), step, step_list, request)
            .await
    }

    pub async fn perform(&self, step: &StepName, task: InfraTask) -> Result<()> {
        tracing::debug!("{step}: {task}");
        self.infra
            .perform(&task)
            .await
            .map_err(|e| e.in_step(step))
    }

    /// Perform `task` unless the ledger says `sub_step` is already done.
    pub async fn perform_unless_done(
        &self,
        step: &StepName,
        sub_step: &str,
        task: InfraTask,
    ) -> Result<()> {
        if self.is_sub_step_done(step, sub_step) {
            return Ok(());
        }
        self.perform(step, task).await
    }

    /// Run `work` while holding the remote lock.
    ///
    /// The lock is released whatever `work` returns. A failed release is
    /// logged as a leaked lock and does not fail the step.
    pub async fn with_remote_lock<F, T>(&self, step: &StepName, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.remote_lock
            .acquire()
            .await
            .map_err(|e| e.in_step(step))?;
        let outcome = work.await;
        if let Err(e) = self.remote_lock.release().await {
            tracing::error!(
                "🔒 Leaked remote lock in {step}, it must expire or be cleared manually: {e}"
            );
        }
        outcome
    }

    /// Best-effort variant of [`perform`](Self::perform) for undo paths.
    pub async fn perform_or_warn(&self, step: &StepName, task: InfraTask) {
        let description = task.to_string();
        if let Err(e) = self.perform(step, task).await {
            tracing::warn!("⚠️  {step}: {description} failed, continuing: {e}");
        }
    }
}
