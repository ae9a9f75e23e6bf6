use super::{named_step, sub_steps};
use crate::step::{ProvisioningContext, Step};
use async_trait::async_trait;
use cluster_context::{InfraTask, JobOptions};
use provisioning_primitives::{steps, Result, StepList, StepName};
use step_executor::{OedaRequest, SubOperation};

named_step!(
    /// Final step of Exascale and base-DB pipelines.
    ///
    /// Hardens the guests, patches their VM configuration (part of it with
    /// the guests shut down) and attaches the vault.
    ExascaleComplete,
    steps::EXASCALE_COMPLETE
);

impl ExascaleComplete {
    /// Memory tuning plus the VM config patch that needs the guests down.
    async fn patch_vm_config(&self, ctx: &ProvisioningContext) -> Result<()> {
        let step = &self.name;
        ctx.perform(step, InfraTask::ConfigureHugePages).await?;
        ctx.perform(step, InfraTask::ConfigureShmAll).await?;

        ctx.with_remote_lock(step, async {
            ctx.perform(step, InfraTask::ShutdownGuests).await?;
            ctx.perform(step, InfraTask::PatchVmOnShutdown).await?;
            ctx.perform(step, InfraTask::StartGuests).await
        })
        .await?;

        ctx.perform(step, InfraTask::PatchVmAfterBoot).await?;
        ctx.perform(step, InfraTask::ResizeGuestFilesystems).await
    }
}

#[async_trait]
impl Step for ExascaleComplete {
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
        let base_db = ctx.cluster().is_base_db();
        ctx.cluster().update_status(step, 0, "Completing Exascale provisioning");

        ctx.perform_unless_done(
            step,
            sub_steps::MAKE_FIPS_COMPLIANCE,
            InfraTask::MakeFipsCompliant,
        )
        .await?;
        if !base_db {
            ctx.perform_unless_done(step, sub_steps::MANAGE_OPC_KEY, InfraTask::ManageOpcKey)
                .await?;
            if !ctx.is_sub_step_done(step, sub_steps::PATCH_VM_BEFORE_BOOT) {
                ctx.cluster()
                    .update_status(step, 20, "Patching VM configuration before boot");
                ctx.with_remote_lock(step, ctx.perform(step, InfraTask::PatchVmBeforeBoot))
                    .await?;
            }
        }
        if !ctx.is_sub_step_done(step, sub_steps::PATCH_VM_CFG) {
            ctx.cluster().update_status(step, 40, "Patching VM configuration");
            self.patch_vm_config(ctx).await?;
        }

        if base_db {
            tracing::debug!("Base-DB cluster, security fixes ship with the image");
        } else {
            ctx.oeda(
                step,
                step_list,
                OedaRequest::forward(SubOperation::ApplySecurityFixes),
            )
            .await?;
        }
        ctx.perform(step, InfraTask::AttachVault).await?;
        ctx.cluster().update_status(step, 100, "Exascale provisioning complete");
        Ok(())
    }

    async fn undo_execute(
        &self,
        ctx: &ProvisioningContext,
        _options: &JobOptions,
        _step_list: &StepList,
    ) -> Result<()> {
        ctx.perform_or_warn(&self.name, InfraTask::DetachVault).await;
        Ok(())
    }
}
