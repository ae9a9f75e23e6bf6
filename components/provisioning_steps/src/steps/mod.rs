//! Step implementations, one module per step name.

/// Declares a stateless step type that carries only its name.
macro_rules! named_step {
    ($(#[$meta:meta])* $ty:ident, $name:expr) => {
        $(#[$meta])*
        pub struct $ty {
            name: provisioning_primitives::StepName,
        }

        impl Default for $ty {
            fn default() -> Self {
                Self {
                    name: provisioning_primitives::StepName::from($name),
                }
            }
        }
    };
}

pub(crate) use named_step;

mod config_compute;
mod create_storage;
mod create_user;
mod create_vm;
mod exascale_complete;
mod gold_backup;
mod install_cluster;
mod postgi_install;
mod postvm_install;
mod prevm_checks;
mod prevm_setup;

pub use config_compute::ConfigCompute;
pub use create_storage::CreateStorage;
pub use create_user::CreateUser;
pub use create_vm::CreateVm;
pub use exascale_complete::ExascaleComplete;
pub use gold_backup::GoldImageBackup;
pub use install_cluster::InstallCluster;
pub use postgi_install::PostGiInstall;
pub use postvm_install::PostVmInstall;
pub use prevm_checks::PreVmChecks;
pub use prevm_setup::{BaseDbPreVmSetup, PreVmSetup};

/// Ledger keys of the idempotent sub-actions.
pub mod sub_steps {
    pub const IMG_CONSISTENCY_CHECKS: &str = "IMG_CONSISTENCY_CHECKS";
    pub const PMEMLOG_PMEMCACHE: &str = "PMEMLOG_PMEMCACHE";
    pub const HW_PRECHECKS: &str = "HW_PRECHECKS";
    pub const EXECUTE_EXACHK: &str = "EXECUTE_EXACHK";
    pub const CLEANUP_BONDING: &str = "CLEANUP_BONDING";
    pub const DOM0_PRECHECKS: &str = "DOM0_PRECHECKS";

    pub const COPY_IMAGES: &str = "COPY_IMAGES";
    pub const DOM0_SETUP: &str = "DOM0_SETUP";
    pub const NETWORK_DISCOVERY: &str = "NETWORK_DISCOVERY";
    pub const EDV_VOLUMES: &str = "EDV_VOLUMES";

    pub const CONFIGURE_DOMU_PASSWORD_OEDA: &str = "CONFIGURE_DOMU_PASSWORD_OEDA";
    pub const CONFIGURE_DOMU_PASSWORD_EXACLOUD: &str = "CONFIGURE_DOMU_PASSWORD_EXACLOUD";
    pub const KVM_CPU_MANAGE: &str = "KVM_CPU_MANAGE";
    pub const CLEANUP_OLD_PROVISIONING: &str = "CLEANUP_OLD_PROVISIONING";
    pub const DELETE_STALE_DUMMY_BRIDGE: &str = "DELETE_STALE_DUMMY_BRIDGE";
    pub const START_VM_EXACS_SERVICE: &str = "START_VM_EXACS_SERVICE";
    pub const ADD_MISSING_DNS_NTP: &str = "ADD_MISSING_DNS_NTP";

    pub const OEDA_STEP: &str = "OEDA_STEP";
    pub const OPC_USER: &str = "OPC_USER";
    pub const SAVE_SSH_KEYS: &str = "SAVE_SSH_KEYS";
    pub const PASSWORDLESS: &str = "PASSWORDLESS";
    pub const LOCK_DBUSERS: &str = "LOCK_DBUSERS";

    pub const POST_VM_PATCHING: &str = "POST_VM_PATCHING";
    pub const SSH_KEY_MANAGEMENT: &str = "SSH_KEY_MANAGEMENT";
    pub const SECURE_SSH_PASSWORD: &str = "SECURE_SSH_PASSWORD";

    pub const MAKE_FIPS_COMPLIANCE: &str = "MAKE_FIPS_COMPLIANCE";
    pub const MANAGE_OPC_KEY: &str = "MANAGE_OPC_KEY";
    pub const PATCH_VM_BEFORE_BOOT: &str = "PATCH_VM_BEFORE_BOOT";
    pub const PATCH_VM_CFG: &str = "PATCH_VM_CFG";
}
