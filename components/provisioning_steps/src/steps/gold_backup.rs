use super::named_step;
use crate::step::{ProvisioningContext, Step};
use async_trait::async_trait;
use cluster_context::{InfraTask, JobOptions};
use provisioning_primitives::{steps, Result, StepList, StepName};

const ENABLE_BACKUP: &str = "enable_goldvm_backup";
const RAISE_ON_ERROR: &str = "raise_gold_backup_on_error";

named_step!(
    /// Snapshots a freshly provisioned guest as the cluster's gold image.
    ///
    /// Disabled unless the site enables it; backup failures only fail the
    /// run when the site asks for it.
    GoldImageBackup,
    steps::BACKUPVM_GOLDIMAGE
);

#[async_trait]
impl Step for GoldImageBackup {
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
        if !ctx.cluster().config_flag(ENABLE_BACKUP, false) {
            tracing::info!("Gold image backup disabled, nothing to do");
            return Ok(());
        }

        ctx.cluster().update_status(step, 0, "Backing up gold image");
        match ctx.perform(step, InfraTask::BackupGoldImage).await {
            Ok(()) => {
                ctx.cluster().update_status(step, 100, "Gold image backed up");
                Ok(())
            }
            Err(e) if ctx.cluster().config_flag(RAISE_ON_ERROR, false) => Err(e),
            Err(e) => {
                tracing::error!("❌ Gold image backup failed, provisioning continues: {e}");
                Ok(())
            }
        }
    }

    async fn undo_execute(
        &self,
        ctx: &ProvisioningContext,
        _options: &JobOptions,
        _step_list: &StepList,
    ) -> Result<()> {
        if ctx.cluster().config_flag(ENABLE_BACKUP, false) {
            ctx.perform_or_warn(&self.name, InfraTask::DeleteBackupBucket)
                .await;
        }
        Ok(())
    }
}
