use super::{named_step, sub_steps};
use crate::step::{ProvisioningContext, Step};
use async_trait::async_trait;
use cluster_context::{InfraTask, JobOptions, UserIds};
use provisioning_primitives::{steps, ProvisioningError, Result, StepList, StepName};
use step_executor::{OedaRequest, SubOperation};

const CLOUD_USER: &str = "opc";
const DB_USER: &str = "oracle";

named_step!(
    /// Creates the OS users of the guests.
    CreateUser,
    steps::CREATE_USER
);

impl CreateUser {
    /// Job payload first, then the site configuration.
    fn cloud_user_ids(&self, ctx: &ProvisioningContext, options: &JobOptions) -> Result<UserIds> {
        if let Some(ids) = options.user_ids(CLOUD_USER) {
            return Ok(ids);
        }
        let cluster = ctx.cluster();
        match cluster.config_option("opc_uid") {
            Some(uid) => Ok(UserIds {
                uid: uid.to_string(),
                gid: cluster.config_option("opc_gid").map(str::to_string),
            }),
            None => Err(ProvisioningError::configuration(format!(
                "no user-ID mapping for {CLOUD_USER}"
            ))
            .with_step(self.name.clone())
            .with_suggestion("set users.opc.uid in the request or opc_uid in the site configuration")),
        }
    }
}

#[async_trait]
impl Step for CreateUser {
    fn name(&self) -> &StepName {
        &self.name
    }

    async fn do_execute(
        &self,
        ctx: &ProvisioningContext,
        options: &JobOptions,
        step_list: &StepList,
    ) -> Result<()> {
        let step = &self.name;
        let ids = self.cloud_user_ids(ctx, options)?;
        ctx.cluster().update_status(step, 0, "Creating users");

        if !ctx.is_sub_step_done(step, sub_steps::OEDA_STEP) {
            let request = OedaRequest::forward(SubOperation::CreateUser).without_host_lock();
            ctx.oeda(step, step_list, request).await?;
        }

        if ctx.is_sub_step_done(step, sub_steps::OPC_USER) {
            ctx.perform(
                step,
                InfraTask::ConfigurePasswordless {
                    user: CLOUD_USER.into(),
                },
            )
            .await?;
        } else {
            ctx.perform(
                step,
                InfraTask::CreateOsUser {
                    user: CLOUD_USER.into(),
                    uid: ids.uid,
                    gid: ids.gid,
                },
            )
            .await?;
        }

        ctx.perform_unless_done(step, sub_steps::SAVE_SSH_KEYS, InfraTask::SaveSshKeys)
            .await?;
        ctx.perform_unless_done(
            step,
            sub_steps::PASSWORDLESS,
            InfraTask::ConfigurePasswordless {
                user: DB_USER.into(),
            },
        )
        .await?;
        ctx.perform_unless_done(step, sub_steps::LOCK_DBUSERS, InfraTask::LockDbUsers)
            .await?;

        ctx.cluster().update_status(step, 100, "Users created");
        Ok(())
    }

    async fn undo_execute(
        &self,
        ctx: &ProvisioningContext,
        _options: &JobOptions,
        step_list: &StepList,
    ) -> Result<()> {
        let request = OedaRequest::undo(SubOperation::CreateUser).without_host_lock();
        ctx.oeda(&self.name, step_list, request).await?;
        ctx.perform_or_warn(&self.name, InfraTask::RemoveSshDirectories)
            .await;
        Ok(())
    }
}
