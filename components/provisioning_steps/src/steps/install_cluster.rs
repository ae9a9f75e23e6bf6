use super::named_step;
use crate::step::{ProvisioningContext, Step};
use async_trait::async_trait;
use cluster_context::{InfraTask, JobOptions};
use provisioning_primitives::{steps, Result, StepList, StepName};
use step_executor::{OedaRequest, SubOperation};

named_step!(
    /// Installs and initialises the clusterware.
    InstallCluster,
    steps::INSTALL_CLUSTER
);

#[async_trait]
impl Step for InstallCluster {
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
        ctx.cluster().update_status(step, 0, "Installing cluster software");
        ctx.perform(step, InfraTask::RefreshDependencies).await?;

        if !ctx.infra().grid_disks_present().await? {
            tracing::info!("Grid disks missing, creating them before cluster install");
            ctx.oeda(step, step_list, OedaRequest::forward(SubOperation::CreateGridDisks))
                .await?;
        }

        ctx.perform(step, InfraTask::PatchVmConfig).await?;
        for operation in [SubOperation::InstallCluster, SubOperation::InitCluster] {
            let request = OedaRequest::forward(operation).without_host_lock();
            ctx.oeda(step, step_list, request).await?;
        }

        ctx.cluster().update_status(step, 100, "Cluster software installed");
        Ok(())
    }

    async fn undo_execute(
        &self,
        ctx: &ProvisioningContext,
        _options: &JobOptions,
        step_list: &StepList,
    ) -> Result<()> {
        let step = &self.name;
        for operation in [SubOperation::InitCluster, SubOperation::InstallCluster] {
            let request = OedaRequest::undo(operation).without_host_lock().skip_fail();
            ctx.oeda(step, step_list, request).await?;
        }
        ctx.oeda(step, step_list, OedaRequest::undo(SubOperation::CreateGridDisks))
            .await?;

        if ctx.infra().cell_services_running().await? {
            ctx.perform(step, InfraTask::ForceDeleteGridDisks).await?;
        } else {
            tracing::warn!("⚠️  Cell services down, leaving residual grid disks in place");
        }
        Ok(())
    }
}
