use super::named_step;
use crate::step::{ProvisioningContext, Step};
use async_trait::async_trait;
use cluster_context::JobOptions;
use provisioning_primitives::{steps, Result, StepList, StepName};
use step_executor::{OedaRequest, SubOperation};

named_step!(
    /// Exascale only: registers the KVM hosts and the storage vault.
    ConfigCompute,
    steps::CONFIG_COMPUTE
);

#[async_trait]
impl Step for ConfigCompute {
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
        ctx.cluster().update_status(step, 0, "Configuring Exascale compute");
        ctx.oeda(step, step_list, OedaRequest::forward(SubOperation::ConfigKvmHosts))
            .await?;
        ctx.oeda(step, step_list, OedaRequest::forward(SubOperation::ConfigStorage))
            .await?;
        ctx.cluster().update_status(step, 100, "Exascale compute configured");
        Ok(())
    }

    async fn undo_execute(
        &self,
        ctx: &ProvisioningContext,
        _options: &JobOptions,
        step_list: &StepList,
    ) -> Result<()> {
        let step = &self.name;
        ctx.oeda(step, step_list, OedaRequest::undo(SubOperation::ConfigKvmHosts))
            .await?;
        ctx.oeda(
            step,
            step_list,
            OedaRequest::undo(SubOperation::ConfigStorage).force_override(),
        )
        .await
    }
}
