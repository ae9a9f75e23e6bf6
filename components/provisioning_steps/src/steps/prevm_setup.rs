use super::{named_step, sub_steps};
use crate::step::{ProvisioningContext, Step};
use async_trait::async_trait;
use cluster_context::{InfraTask, JobOptions};
use provisioning_primitives::{steps, Result, StepList, StepName};

named_step!(
    /// Stages images and prepares the hypervisors.
    PreVmSetup,
    steps::PREVM_SETUP
);

#[async_trait]
impl Step for PreVmSetup {
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
        ctx.cluster().update_status(step, 0, "Preparing hypervisors");
        ctx.perform_unless_done(step, sub_steps::COPY_IMAGES, InfraTask::CopyImages)
            .await?;
        ctx.perform_unless_done(step, sub_steps::DOM0_SETUP, InfraTask::ConfigureDom0)
            .await?;
        ctx.perform_unless_done(step, sub_steps::NETWORK_DISCOVERY, InfraTask::DiscoverNetwork)
            .await?;
        ctx.cluster().update_status(step, 100, "Hypervisors prepared");
        Ok(())
    }

    async fn undo_execute(
        &self,
        ctx: &ProvisioningContext,
        _options: &JobOptions,
        _step_list: &StepList,
    ) -> Result<()> {
        ctx.perform_or_warn(&self.name, InfraTask::RemoveImages).await;
        Ok(())
    }
}

named_step!(
    /// Base-DB flavour: hypervisor setup plus EDV volume preparation.
    BaseDbPreVmSetup,
    steps::PREVM_SETUP
);

#[async_trait]
impl Step for BaseDbPreVmSetup {
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
        ctx.cluster().update_status(step, 0, "Preparing base-DB hypervisors");
        ctx.perform_unless_done(step, sub_steps::COPY_IMAGES, InfraTask::CopyImages)
            .await?;
        ctx.perform_unless_done(step, sub_steps::DOM0_SETUP, InfraTask::ConfigureDom0)
            .await?;
        ctx.perform_unless_done(step, sub_steps::EDV_VOLUMES, InfraTask::PrepareEdvVolumes)
            .await?;
        ctx.cluster().update_status(step, 100, "Base-DB hypervisors prepared");
        Ok(())
    }

    async fn undo_execute(
        &self,
        ctx: &ProvisioningContext,
        _options: &JobOptions,
        _step_list: &StepList,
    ) -> Result<()> {
        // Volumes left attached block the next provisioning attempt.
        ctx.perform(&self.name, InfraTask::ReleaseEdvVolumes).await?;
        ctx.perform_or_warn(&self.name, InfraTask::RemoveImages).await;
        Ok(())
    }
}
