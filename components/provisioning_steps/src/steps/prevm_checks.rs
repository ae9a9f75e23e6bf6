use super::{named_step, sub_steps};
use crate::step::{ProvisioningContext, Step};
use async_trait::async_trait;
use cluster_context::{InfraTask, JobOptions};
use provisioning_primitives::{steps, ProvisioningError, Result, StepList, StepName};
use std::time::Duration;

const HW_ALERT_ATTEMPTS: u32 = 3;
const DEFAULT_HW_ALERT_DELAY_SECS: u64 = 5;

named_step!(
    /// Validates the hosts before any VM is created.
    PreVmChecks,
    steps::PREVM_CHECKS
);

impl PreVmChecks {
    /// Fix the cells' PMEM log and cache on the first cluster of a KVM rack,
    /// recognised by the cells carrying no grid disks yet.
    async fn fix_pmem(&self, ctx: &ProvisioningContext) -> Result<()> {
        let cluster = ctx.cluster();
        if !cluster.is_kvm() || cluster.is_exascale() || cluster.is_xs() {
            return Ok(());
        }
        if ctx.infra().grid_disks_present().await? {
            tracing::debug!("Cells already carry grid disks, leaving PMEM alone");
            return Ok(());
        }
        tracing::info!("Checking PMEMLOG and PMEMCACHE of the cells");
        ctx.with_remote_lock(&self.name, ctx.perform(&self.name, InfraTask::FixPmemComponents))
            .await
    }

    async fn check_hardware_alerts(&self, ctx: &ProvisioningContext) -> Result<()> {
        let delay = ctx
            .cluster()
            .config_option("hw_alert_retry_delay_secs")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_HW_ALERT_DELAY_SECS);

        let mut alerts = Vec::new();
        for attempt in 1..=HW_ALERT_ATTEMPTS {
            alerts = ctx.infra().hardware_alerts().await?;
            if alerts.is_empty() {
                return Ok(());
            }
            tracing::warn!(
                "⚠️  Hardware alerts on attempt {attempt}/{HW_ALERT_ATTEMPTS}: {}",
                alerts.join("; ")
            );
            if attempt < HW_ALERT_ATTEMPTS {
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }
        }

        Err(ProvisioningError::precondition(format!(
            "hardware alerts persist after {HW_ALERT_ATTEMPTS} attempts: {}",
            alerts.join("; ")
        ))
        .with_code(0x0390)
        .with_step(self.name.clone())
        .with_suggestion("clear the hardware alerts on the listed hosts and retry"))
    }
}

#[async_trait]
impl Step for PreVmChecks {
    fn name(&self) -> &StepName {
        &self.name
    }

    async fn do_execute(
        &self,
        ctx: &ProvisioningContext,
        options: &JobOptions,
        _step_list: &StepList,
    ) -> Result<()> {
        let step = &self.name;
        ctx.cluster().update_status(step, 0, "Running pre-VM checks");

        if options.payload_flag("skip_sysimage_version_check") {
            tracing::info!("System image consistency check disabled by request");
        } else {
            ctx.perform_unless_done(
                step,
                sub_steps::IMG_CONSISTENCY_CHECKS,
                InfraTask::CheckImageConsistency,
            )
            .await?;
        }

        if !ctx.is_sub_step_done(step, sub_steps::PMEMLOG_PMEMCACHE) {
            self.fix_pmem(ctx).await?;
        }

        if ctx.infra().vm_exists().await? {
            let domus = ctx.cluster().domus().join(", ");
            return Err(ProvisioningError::precondition(format!(
                "VMs already existing: {domus}"
            ))
            .with_step(step.clone())
            .with_suggestion("delete the existing guests or run the delete flow first"));
        }

        if !ctx.is_sub_step_done(step, sub_steps::HW_PRECHECKS) {
            self.check_hardware_alerts(ctx).await?;
        }

        if ctx.cluster().config_flag("exachk_pre_create_vm", false) {
            ctx.perform_unless_done(step, sub_steps::EXECUTE_EXACHK, InfraTask::RunExachk)
                .await?;
        }

        ctx.perform_unless_done(step, sub_steps::CLEANUP_BONDING, InfraTask::CleanupBonding)
            .await?;
        ctx.perform_unless_done(step, sub_steps::DOM0_PRECHECKS, InfraTask::RunDom0Prechecks)
            .await?;

        ctx.cluster().update_status(step, 100, "Pre-VM checks complete");
        Ok(())
    }

    async fn undo_execute(
        &self,
        ctx: &ProvisioningContext,
        _options: &JobOptions,
        _step_list: &StepList,
    ) -> Result<()> {
        ctx.perform_or_warn(&self.name, InfraTask::RestoreBonding).await;
        Ok(())
    }
}
