//! Infrastructure operations that steps perform directly on hosts, outside
//! of the external provisioning tool.

use async_trait::async_trait;
use provisioning_primitives::{HostPair, Result};
use serde::Serialize;
use std::fmt;

/// Guest volume that may be backed by an LVM snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VmVolume {
    U01,
    U02,
}

impl VmVolume {
    pub const ALL: [VmVolume; 2] = [VmVolume::U01, VmVolume::U02];

    pub fn as_str(&self) -> &'static str {
        match self {
            VmVolume::U01 => "u01",
            VmVolume::U02 => "u02",
        }
    }
}

impl fmt::Display for VmVolume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// LVM snapshot backing a guest volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotDevice {
    pub lvm: String,
    pub device: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotMount {
    pub dom0: String,
    pub domu: String,
    pub lvm: String,
    pub device: String,
}

/// A host-side action performed by a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum InfraTask {
    // prevm checks
    CheckImageConsistency,
    FixPmemComponents,
    RunExachk,
    CleanupBonding,
    RestoreBonding,
    RunDom0Prechecks,
    // prevm setup
    CopyImages,
    RemoveImages,
    ConfigureDom0,
    DiscoverNetwork,
    PrepareEdvVolumes,
    ReleaseEdvVolumes,
    // vm creation
    UpdateToolPassword,
    StoreGuestPassword,
    SetGuestStorageEnv,
    ManageKvmCpu,
    CleanupOldProvisioning,
    DeleteStaleBridges,
    MarkVolumeReuse,
    StartVmService,
    AddMissingDnsNtp,
    UnmountVolume(SnapshotMount),
    ForceDeleteVms,
    CleanupBondingMonitor,
    // users
    CreateOsUser {
        user: String,
        uid: String,
        gid: Option<String>,
    },
    ConfigurePasswordless {
        user: String,
    },
    SaveSshKeys,
    LockDbUsers,
    RemoveSshDirectories,
    // storage
    DeleteCloudUsers,
    ConfigureCells,
    ForceDeleteGridDisks,
    // cluster software
    RefreshDependencies,
    PatchVmConfig,
    // post install
    PatchPostVm,
    ManageSshKeys,
    SecureSshPassword,
    RunPreVmDeleteHooks,
    ShredImages,
    // exascale completion
    MakeFipsCompliant,
    ManageOpcKey,
    PatchVmBeforeBoot,
    ConfigureHugePages,
    ConfigureShmAll,
    ShutdownGuests,
    PatchVmOnShutdown,
    StartGuests,
    PatchVmAfterBoot,
    ResizeGuestFilesystems,
    AttachVault,
    DetachVault,
    BackupGoldImage,
    DeleteBackupBucket,
}

impl fmt::Display for InfraTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InfraTask::UnmountVolume(m) => {
                write!(f, "unmount {} on {}:{}", m.device, m.dom0, m.domu)
            }
            InfraTask::CreateOsUser { user, uid, .. } => {
                write!(f, "create OS user {user} (uid {uid})")
            }
            InfraTask::ConfigurePasswordless { user } => {
                write!(f, "configure passwordless ssh for {user}")
            }
            other => write!(f, "{other:?}"),
        }
    }
}

/// Host operations and queries backing the steps.
#[async_trait]
pub trait InfraOps: Send + Sync {
    async fn perform(&self, task: &InfraTask) -> Result<()>;

    /// Any guest of the cluster is already defined on its hypervisor.
    async fn vm_exists(&self) -> Result<bool>;

    /// Outstanding hardware alerts; empty when the hosts are healthy.
    async fn hardware_alerts(&self) -> Result<Vec<String>>;

    /// LVM snapshot backing `volume` of the pair's guest, if any.
    async fn snapshot_device(
        &self,
        pair: &HostPair,
        volume: VmVolume,
    ) -> Result<Option<SnapshotDevice>>;

    async fn grid_disks_present(&self) -> Result<bool>;

    async fn cell_services_running(&self) -> Result<bool>;

    /// The cells carry grid disks of clusters other than this one.
    async fn cells_used_by_other_clusters(&self) -> Result<bool>;
}
