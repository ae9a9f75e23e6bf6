use super::{named_step, sub_steps};
use crate::step::{ProvisioningContext, Step};
use async_trait::async_trait;
use cluster_context::{InfraTask, JobOptions, SnapshotMount, VmVolume};
use provisioning_primitives::{steps, CommandKind, Result, StepList, StepName};
use step_executor::{OedaRequest, SubOperation};

named_step!(
    /// Creates the guest VMs on every hypervisor of the cluster.
    CreateVm,
    steps::CREATE_VM
);

impl CreateVm {
    fn vm_request(ctx: &ProvisioningContext, request: OedaRequest) -> OedaRequest {
        if ctx.cluster().is_exascale() {
            request.without_host_lock()
        } else {
            request
        }
    }

    /// Unmount LVM snapshots backing the guest volumes before the guests go.
    async fn unmount_snapshots(&self, ctx: &ProvisioningContext) -> Result<()> {
        for pair in ctx.cluster().host_pairs() {
            for volume in VmVolume::ALL {
                let Some(snapshot) = ctx.infra().snapshot_device(pair, volume).await? else {
                    tracing::debug!("No snapshot behind {volume} of {}", pair.domu);
                    continue;
                };
                ctx.perform(
                    &self.name,
                    InfraTask::UnmountVolume(SnapshotMount {
                        dom0: pair.dom0.clone(),
                        domu: pair.domu.clone(),
                        lvm: snapshot.lvm,
                        device: snapshot.device,
                    }),
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn delete_vms(&self, ctx: &ProvisioningContext, step_list: &StepList) -> Result<()> {
        let request = Self::vm_request(ctx, OedaRequest::undo(SubOperation::CreateVm));
        if let Err(e) = ctx.oeda(&self.name, step_list, request).await {
            tracing::warn!("⚠️  OEDA VM deletion failed, forcing removal: {e}");
        }
        ctx.perform(&self.name, InfraTask::ForceDeleteVms).await
    }
}

#[async_trait]
impl Step for CreateVm {
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
        let cluster = ctx.cluster();
        cluster.update_status(step, 0, "Creating VMs");

        if cluster.is_kvm() {
            ctx.perform_unless_done(step, sub_steps::KVM_CPU_MANAGE, InfraTask::ManageKvmCpu)
                .await?;
        }
        ctx.perform_unless_done(
            step,
            sub_steps::CLEANUP_OLD_PROVISIONING,
            InfraTask::CleanupOldProvisioning,
        )
        .await?;
        if cluster.is_kvm() {
            ctx.perform_unless_done(
                step,
                sub_steps::DELETE_STALE_DUMMY_BRIDGE,
                InfraTask::DeleteStaleBridges,
            )
            .await?;
        }
        if cluster.is_base_db() && cluster.is_clone() {
            ctx.perform(step, InfraTask::MarkVolumeReuse).await?;
        }

        let zdlra = cluster.config_flag("zdlra_prov", false);
        if zdlra {
            ctx.perform_unless_done(
                step,
                sub_steps::CONFIGURE_DOMU_PASSWORD_OEDA,
                InfraTask::UpdateToolPassword,
            )
            .await?;
        }

        let request = Self::vm_request(ctx, OedaRequest::forward(SubOperation::CreateVm));
        ctx.oeda(step, step_list, request).await?;

        if !ctx.is_sub_step_done(step, sub_steps::CONFIGURE_DOMU_PASSWORD_EXACLOUD) {
            if zdlra {
                ctx.perform(step, InfraTask::StoreGuestPassword).await?;
            }
            if cluster.is_exascale() {
                ctx.perform(step, InfraTask::SetGuestStorageEnv).await?;
            }
        }

        if cluster.is_kvm() && !cluster.is_exascale() {
            ctx.perform_unless_done(
                step,
                sub_steps::START_VM_EXACS_SERVICE,
                InfraTask::StartVmService,
            )
            .await?;
        }
        ctx.perform_unless_done(step, sub_steps::ADD_MISSING_DNS_NTP, InfraTask::AddMissingDnsNtp)
            .await?;

        cluster.update_status(step, 100, "VMs created");
        Ok(())
    }

    async fn undo_execute(
        &self,
        ctx: &ProvisioningContext,
        _options: &JobOptions,
        step_list: &StepList,
    ) -> Result<()> {
        if *ctx.cluster().command() == CommandKind::DeleteService {
            self.unmount_snapshots(ctx).await?;
        }
        self.delete_vms(ctx, step_list).await?;
        ctx.perform_or_warn(&self.name, InfraTask::CleanupBondingMonitor)
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::{Harness, ASM_CLUSTER};
    use cluster_context::SnapshotDevice;
    use image_ledger::Ledger;
    use provisioning_primitives::ProvisioningFlavor;

    fn delete_harness() -> Harness {
        Harness::new(&ASM_CLUSTER.replace("createservice", "deleteservice"))
    }

    #[tokio::test]
    async fn snapshot_is_unmounted_before_vm_delete() {
        let harness = delete_harness();
        harness.infra.snapshots.lock().insert(
            ("dom0a".into(), VmVolume::U01),
            SnapshotDevice {
                lvm: "VGExaDb".into(),
                device: "/dev/VGExaDb/u01_snap".into(),
            },
        );

        CreateVm::default()
            .undo_execute(&harness.context(), &JobOptions::default(), &StepList::default())
            .await
            .unwrap();

        let unmount = harness.position("infra unmount").unwrap();
        let oeda_delete = harness.position("oeda undo CREATE_VM").unwrap();
        let force_delete = harness.position("infra ForceDeleteVms").unwrap();
        assert!(unmount < oeda_delete);
        assert!(oeda_delete < force_delete);
        assert_eq!(harness.count("infra unmount"), 1);
    }

    #[tokio::test]
    async fn no_snapshot_means_no_unmount() {
        let harness = delete_harness();

        CreateVm::default()
            .undo_execute(&harness.context(), &JobOptions::default(), &StepList::default())
            .await
            .unwrap();

        assert_eq!(harness.count("infra unmount"), 0);
        assert_eq!(harness.count("infra ForceDeleteVms"), 1);
    }

    #[tokio::test]
    async fn rollback_outside_delete_flow_skips_snapshot_lookup() {
        let harness = Harness::asm();
        harness.infra.snapshots.lock().insert(
            ("dom0a".into(), VmVolume::U02),
            SnapshotDevice {
                lvm: "VGExaDb".into(),
                device: "/dev/VGExaDb/u02_snap".into(),
            },
        );

        CreateVm::default()
            .undo_execute(&harness.context(), &JobOptions::default(), &StepList::default())
            .await
            .unwrap();

        assert_eq!(harness.count("infra unmount"), 0);
    }

    #[tokio::test]
    async fn failed_oeda_delete_still_forces_removal() {
        let harness = delete_harness();
        harness.executor.fail_on(SubOperation::CreateVm, true);

        CreateVm::default()
            .undo_execute(&harness.context(), &JobOptions::default(), &StepList::default())
            .await
            .unwrap();

        assert_eq!(harness.count("infra ForceDeleteVms"), 1);
    }

    #[tokio::test]
    async fn create_runs_tool_between_host_preparation_and_services() {
        let harness = Harness::asm();

        CreateVm::default()
            .do_execute(&harness.context(), &JobOptions::default(), &StepList::default())
            .await
            .unwrap();

        assert_eq!(
            harness.journal(),
            vec![
                "infra ManageKvmCpu",
                "infra CleanupOldProvisioning",
                "infra DeleteStaleBridges",
                "oeda do CREATE_VM",
                "infra StartVmService",
                "infra AddMissingDnsNtp",
            ]
        );
        assert!(harness.executor.calls()[0].1.lock_host);
    }

    #[tokio::test]
    async fn gold_image_skips_baked_sub_steps() {
        let harness = Harness::asm();
        let ledger = Ledger::from_json_str(
            ProvisioningFlavor::GoldImage,
            r#"{"ESTP_CREATE_VM": {
                "KVM_CPU_MANAGE": {"status": "DONE"},
                "START_VM_EXACS_SERVICE": {"status": "DONE"}
            }}"#,
        )
        .unwrap();

        CreateVm::default()
            .do_execute(
                &harness.context_with_ledger(ledger),
                &JobOptions::default(),
                &StepList::default(),
            )
            .await
            .unwrap();

        assert_eq!(harness.count("infra ManageKvmCpu"), 0);
        assert_eq!(harness.count("infra StartVmService"), 0);
        assert_eq!(harness.count("oeda do CREATE_VM"), 1);
    }

    #[tokio::test]
    async fn guest_password_is_set_around_vm_creation() {
        let harness = Harness::new(&ASM_CLUSTER.replace(
            r#""config": {"#,
            r#""config": {"zdlra_prov": "true", "#,
        ));

        CreateVm::default()
            .do_execute(&harness.context(), &JobOptions::default(), &StepList::default())
            .await
            .unwrap();

        let create = harness.position("oeda do CREATE_VM").unwrap();
        assert!(harness.position("infra UpdateToolPassword").unwrap() < create);
        assert!(create < harness.position("infra StoreGuestPassword").unwrap());
        assert_eq!(harness.count("infra SetGuestStorageEnv"), 0);
    }

    #[tokio::test]
    async fn exascale_guests_get_storage_env_unless_baked() {
        let exascale = ASM_CLUSTER.replace(r#""rack_size""#, r#""exascale": true, "rack_size""#);

        let harness = Harness::new(&exascale);
        CreateVm::default()
            .do_execute(&harness.context(), &JobOptions::default(), &StepList::default())
            .await
            .unwrap();
        assert_eq!(harness.count("infra SetGuestStorageEnv"), 1);
        assert!(!harness.executor.calls()[0].1.lock_host);

        let harness = Harness::new(&exascale);
        let ledger = Ledger::from_json_str(
            ProvisioningFlavor::GoldImage,
            r#"{"ESTP_CREATE_VM": {"CONFIGURE_DOMU_PASSWORD_EXACLOUD": {"status": "DONE"}}}"#,
        )
        .unwrap();
        CreateVm::default()
            .do_execute(
                &harness.context_with_ledger(ledger),
                &JobOptions::default(),
                &StepList::default(),
            )
            .await
            .unwrap();
        assert_eq!(harness.count("infra SetGuestStorageEnv"), 0);
    }
}
