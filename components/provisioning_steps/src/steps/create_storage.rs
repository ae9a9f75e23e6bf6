use super::named_step;
use crate::step::{ProvisioningContext, Step};
use async_trait::async_trait;
use cluster_context::{InfraTask, JobOptions};
use provisioning_primitives::{steps, Result, StepList, StepName};
use step_executor::{OedaRequest, SubOperation};

named_step!(
    /// Connects the storage cells to the cluster.
    ///
    /// Cell setup touches cells shared with other clusters of the rack and
    /// runs under the remote cell lock. Cell creation, fabric verification
    /// and calibration run after the lock is released.
    CreateStorage,
    steps::CREATE_STORAGE
);

impl CreateStorage {
    async fn setup_cells(&self, ctx: &ProvisioningContext, step_list: &StepList) -> Result<()> {
        if ctx.cluster().config_flag("delete_cloud_user", false) {
            ctx.perform_or_warn(&self.name, InfraTask::DeleteCloudUsers)
                .await;
        }
        let request = OedaRequest::forward(SubOperation::SetupCell).without_host_lock();
        ctx.oeda(&self.name, step_list, request).await
    }

    /// Cell disks stay when disabled by configuration or still in use by
    /// another cluster of a shared rack.
    async fn keep_cell_disks(&self, ctx: &ProvisioningContext) -> Result<bool> {
        if ctx.cluster().config_flag("skip_cell_delete", false) {
            tracing::warn!("⚠️  Cell disk deletion disabled by configuration");
            return Ok(true);
        }
        if !ctx.cluster().is_shared_env() {
            return Ok(false);
        }
        let shared = ctx
            .with_remote_lock(&self.name, ctx.infra().cells_used_by_other_clusters())
            .await?;
        if shared {
            tracing::warn!("⚠️  Another cluster still uses the cells, keeping cell disks");
        }
        Ok(shared)
    }
}

#[async_trait]
impl Step for CreateStorage {
    fn name(&self) -> &StepName {
        &self.name
    }

    async fn do_execute(
        &self,
        ctx: &ProvisioningContext,
        _options: &JobOptions,
        step_list: &StepList,
    ) -> Result<()> {
        let step = &self.name;
        ctx.cluster().update_status(step, 0, "Configuring storage cells");

        ctx.with_remote_lock(step, self.setup_cells(ctx, step_list))
            .await?;

        if ctx.cluster().config_flag("skip_cell_create", false) {
            tracing::info!("Cell creation disabled by configuration");
        } else {
            ctx.oeda(step, step_list, OedaRequest::forward(SubOperation::CreateCell))
                .await?;
        }
        ctx.oeda(step, step_list, OedaRequest::forward(SubOperation::VerifyFabric))
            .await?;
        ctx.oeda(step, step_list, OedaRequest::forward(SubOperation::CalibrateCells))
            .await?;

        ctx.cluster().update_status(step, 100, "Storage cells configured");
        Ok(())
    }

    async fn undo_execute(
        &self,
        ctx: &ProvisioningContext,
        _options: &JobOptions,
        step_list: &StepList,
    ) -> Result<()> {
        let step = &self.name;
        ctx.oeda(step, step_list, OedaRequest::undo(SubOperation::CalibrateCells))
            .await?;

        ctx.with_remote_lock(step, async {
            ctx.perform_or_warn(step, InfraTask::DeleteCloudUsers).await;
            Ok(())
        })
        .await?;

        if !self.keep_cell_disks(ctx).await? {
            let request = OedaRequest::undo(SubOperation::CreateCell).without_host_lock();
            ctx.oeda(step, step_list, request).await?;
        }

        let request = OedaRequest::undo(SubOperation::SetupCell).without_host_lock();
        if let Err(e) = ctx.oeda(step, step_list, request).await {
            tracing::warn!("⚠️  Undo of cell setup did not complete, continuing: {e}");
        }
        Ok(())
    }
}
