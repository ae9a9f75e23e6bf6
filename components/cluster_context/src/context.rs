use provisioning_primitives::{
    CommandKind, HostPair, ProvisioningFlavor, RackSize, StepName, VariantFlags,
};
use serde::Serialize;

/// Status line recorded by `ClusterContext::update_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusUpdate {
    pub step: StepName,
    pub percent: u8,
    pub comment: String,
}

/// Read-only view of the target cluster, plus the status channel the
/// engine reports progress through.
pub trait ClusterContext: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;
    fn command(&self) -> &CommandKind;

    /// Storage layer is Exascale rather than ASM.
    fn is_xs(&self) -> bool;
    /// Cluster is deployed through the Exascale service.
    fn is_exascale(&self) -> bool;
    fn rack_size(&self) -> RackSize;
    fn is_base_db(&self) -> bool;
    fn is_exacompute_vm(&self) -> bool;
    fn is_edv_image_supported(&self) -> bool;
    fn is_clone(&self) -> bool;
    fn is_kvm(&self) -> bool;
    /// Several VM clusters share the same hosts; remote locking is needed.
    fn is_shared_env(&self) -> bool;
    fn flavor(&self) -> ProvisioningFlavor;

    fn host_pairs(&self) -> &[HostPair];
    fn cells(&self) -> &[String];
    fn switches(&self) -> &[String];

    /// Site level option, as configured for the provisioning service.
    fn config_option(&self, key: &str) -> Option<&str>;

    fn update_status(&self, step: &StepName, percent: u8, comment: &str);

    fn dom0s(&self) -> Vec<String> {
        self.host_pairs().iter().map(|p| p.dom0.clone()).collect()
    }

    fn domus(&self) -> Vec<String> {
        self.host_pairs().iter().map(|p| p.domu.clone()).collect()
    }

    /// Boolean option; anything but `true`/`false` falls back to `default`.
    fn config_flag(&self, key: &str, default: bool) -> bool {
        match self.config_option(key).map(str::to_ascii_lowercase).as_deref() {
            Some("true") => true,
            Some("false") => false,
            _ => default,
        }
    }

    fn variant_flags(&self) -> VariantFlags {
        VariantFlags {
            is_xs: self.is_xs(),
            rack_size: self.rack_size(),
            is_base_db: self.is_base_db(),
            is_exacompute_vm: self.is_exacompute_vm(),
            is_edv_image_supported: self.is_edv_image_supported(),
        }
    }
}
