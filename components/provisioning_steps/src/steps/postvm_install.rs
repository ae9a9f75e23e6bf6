use super::{named_step, sub_steps};
use crate::step::{ProvisioningContext, Step};
use async_trait::async_trait;
use cluster_context::{InfraTask, JobOptions};
use provisioning_primitives::{steps, Result, StepList, StepName};

named_step!(PostVmInstall, steps::POSTVM_INSTALL);

#[async_trait]
impl Step for PostVmInstall {
    fn name(&self) -> &StepName {
        &self.name
    }

    async fn do_execute(
        &self,
        ctx: &ProvisioningContext,
        _options: &JobOptions,
        _step_list: &StepList,
    ) -> Result<()> {
        let step = &self.name;
        ctx.cluster().update_status(step, 0, "Finishing guest configuration");

        // Exascale guests have no cell-side patching to do.
        if !ctx.cluster().is_xs() {
            ctx.perform_unless_done(step, sub_steps::POST_VM_PATCHING, InfraTask::PatchPostVm)
                .await?;
        }
        ctx.perform_unless_done(step, sub_steps::SSH_KEY_MANAGEMENT, InfraTask::ManageSshKeys)
            .await?;
        ctx.perform_unless_done(
            step,
            sub_steps::SECURE_SSH_PASSWORD,
            InfraTask::SecureSshPassword,
        )
        .await?;

        ctx.cluster().update_status(step, 100, "Guest configuration complete");
        Ok(())
    }

    async fn undo_execute(
        &self,
        ctx: &ProvisioningContext,
        _options: &JobOptions,
        _step_list: &StepList,
    ) -> Result<()> {
        ctx.perform(&self.name, InfraTask::RunPreVmDeleteHooks)
            .await?;
        ctx.perform(&self.name, InfraTask::ShredImages).await
    }
}
