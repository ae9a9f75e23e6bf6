use super::named_step;
use crate::step::{ProvisioningContext, Step};
use async_trait::async_trait;
use cluster_context::{InfraTask, JobOptions};
use provisioning_primitives::{steps, Result, StepList, StepName};
use step_executor::{OedaRequest, SubOperation};

named_step!(
    /// Creates the ASM disk groups and applies the security fixes.
    PostGiInstall,
    steps::POSTGI_INSTALL
);

#[async_trait]
impl Step for PostGiInstall {
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
        ctx.cluster().update_status(step, 0, "Configuring disk groups");
        ctx.with_remote_lock(step, ctx.perform(step, InfraTask::ConfigureCells))
            .await?;
        ctx.oeda(step, step_list, OedaRequest::forward(SubOperation::CreateAsm))
            .await?;
        ctx.oeda(
            step,
            step_list,
            OedaRequest::forward(SubOperation::ApplySecurityFixes),
        )
        .await?;
        ctx.cluster().update_status(step, 100, "Disk groups configured");
        Ok(())
    }

    async fn undo_execute(
        &self,
        ctx: &ProvisioningContext,
        _options: &JobOptions,
        step_list: &StepList,
    ) -> Result<()> {
        let request = OedaRequest::undo(SubOperation::CreateAsm).without_host_lock();
        ctx.with_remote_lock(&self.name, ctx.oeda(&self.name, step_list, request))
            .await
    }
}
