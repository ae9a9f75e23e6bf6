//! Shared vocabulary of the provisioning engine: step names, deployment
//! variant flags, host topology and the structured provisioning error.

mod error;
mod names;
mod variant;

pub use error::{ErrorKind, ProvisioningError, Result};
pub use names::{StepList, StepName, SubStepName};
pub use variant::{CommandKind, HostPair, ProvisioningFlavor, RackSize, VariantFlags};

/// Well-known step names.
pub mod steps {
    pub const PREVM_CHECKS: &str = "ESTP_PREVM_CHECKS";
    pub const PREVM_SETUP: &str = "ESTP_PREVM_SETUP";
    pub const CREATE_VM: &str = "ESTP_CREATE_VM";
    pub const CREATE_STORAGE: &str = "ESTP_CREATE_STORAGE";
    pub const CONFIG_COMPUTE: &str = "ESTP_CONFIG_COMPUTE";
    pub const INSTALL_CLUSTER: &str = "ESTP_INSTALL_CLUSTER";
    pub const CREATE_USER: &str = "ESTP_CREATE_USER";
    pub const POSTVM_INSTALL: &str = "ESTP_POSTVM_INSTALL";
    pub const POSTGI_INSTALL: &str = "ESTP_POSTGI_INSTALL";
    pub const EXASCALE_COMPLETE: &str = "ESTP_EXASCALE_COMPLETE";
    pub const BACKUPVM_GOLDIMAGE: &str = "ESTP_BACKUPVM_GOLDIMAGE";
}
