use crate::error::ProvisioningError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Physical rack shape of the target cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RackSize {
    #[serde(rename = "eighthrack")]
    Eighth,
    #[serde(rename = "quarterrack")]
    Quarter,
    #[serde(rename = "halfrack")]
    Half,
    #[serde(rename = "fullrack")]
    Full,
    #[serde(rename = "zrack")]
    ZRack,
    Elastic,
}

impl RackSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            RackSize::Eighth => "eighthrack",
            RackSize::Quarter => "quarterrack",
            RackSize::Half => "halfrack",
            RackSize::Full => "fullrack",
            RackSize::ZRack => "zrack",
            RackSize::Elastic => "elastic",
        }
    }
}

impl fmt::Display for RackSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RackSize {
    type Err = ProvisioningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eighthrack" => Ok(RackSize::Eighth),
            "quarterrack" => Ok(RackSize::Quarter),
            "halfrack" => Ok(RackSize::Half),
            "fullrack" => Ok(RackSize::Full),
            "zrack" => Ok(RackSize::ZRack),
            "elastic" => Ok(RackSize::Elastic),
            other => Err(ProvisioningError::configuration(format!(
                "unknown rack size '{other}'"
            ))),
        }
    }
}

/// Deployment-variant flags consumed by the pipeline selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VariantFlags {
    pub is_xs: bool,
    pub rack_size: RackSize,
    pub is_base_db: bool,
    pub is_exacompute_vm: bool,
    pub is_edv_image_supported: bool,
}

impl VariantFlags {
    /// Plain ASM deployment of the given rack size with no special flavor.
    pub fn asm(rack_size: RackSize) -> Self {
        Self {
            is_xs: false,
            rack_size,
            is_base_db: false,
            is_exacompute_vm: false,
            is_edv_image_supported: false,
        }
    }
}

/// Top-level service command the run belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    CreateService,
    DeleteService,
    #[serde(rename = "vmgi_delete")]
    VmGiDelete,
    #[serde(rename = "gi_delete")]
    GiDelete,
    #[serde(rename = "vm_delete")]
    VmDelete,
    #[serde(untagged)]
    Other(String),
}

impl CommandKind {
    /// Delete flows tolerate failing external tool calls outside VM deletion.
    pub fn is_delete(&self) -> bool {
        matches!(
            self,
            CommandKind::DeleteService
                | CommandKind::VmGiDelete
                | CommandKind::GiDelete
                | CommandKind::VmDelete
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            CommandKind::CreateService => "createservice",
            CommandKind::DeleteService => "deleteservice",
            CommandKind::VmGiDelete => "vmgi_delete",
            CommandKind::GiDelete => "gi_delete",
            CommandKind::VmDelete => "vm_delete",
            CommandKind::Other(s) => s,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provisioning flavor of the run; decides whether the ledger is consulted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningFlavor {
    #[default]
    Standard,
    GoldImage,
    BaseDb,
}

impl ProvisioningFlavor {
    pub fn uses_ledger(&self) -> bool {
        matches!(self, ProvisioningFlavor::GoldImage | ProvisioningFlavor::BaseDb)
    }
}

/// A hypervisor host and the guest VM it carries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostPair {
    pub dom0: String,
    pub domu: String,
}

impl HostPair {
    pub fn new(dom0: impl Into<String>, domu: impl Into<String>) -> Self {
        Self {
            dom0: dom0.into(),
            domu: domu.into(),
        }
    }
}
