//! JSON description of a cluster, used by the command line tool and tests.

use crate::context::{ClusterContext, StatusUpdate};
use parking_lot::Mutex;
use provisioning_primitives::{
    CommandKind, HostPair, ProvisioningError, ProvisioningFlavor, RackSize, Result, StepName,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageLayer {
    #[default]
    Asm,
    Xs,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hypervisor {
    #[default]
    Kvm,
    Xen,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ClusterDescriptor {
    pub name: String,
    pub command: CommandKind,
    #[serde(default)]
    pub storage: StorageLayer,
    #[serde(default)]
    pub exascale: bool,
    pub rack_size: RackSize,
    #[serde(default)]
    pub base_db: bool,
    #[serde(default)]
    pub exacompute_vm: bool,
    #[serde(default)]
    pub edv_image_supported: bool,
    #[serde(default)]
    pub clone: bool,
    #[serde(default)]
    pub hypervisor: Hypervisor,
    #[serde(default = "default_true")]
    pub shared_env: bool,
    #[serde(default)]
    pub flavor: ProvisioningFlavor,
    pub host_pairs: Vec<HostPair>,
    #[serde(default)]
    pub cells: Vec<String>,
    #[serde(default)]
    pub switches: Vec<String>,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
    #[serde(skip)]
    status: Mutex<Vec<StatusUpdate>>,
}

impl ClusterDescriptor {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let descriptor: Self = serde_json::from_str(json).map_err(|e| {
            ProvisioningError::configuration(format!("invalid cluster description: {e}"))
        })?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            ProvisioningError::configuration(format!(
                "cannot read cluster description {}: {e}",
                path.display()
            ))
        })?;
        Self::from_json_str(&json)
    }

    fn validate(&self) -> Result<()> {
        if self.host_pairs.is_empty() {
            return Err(ProvisioningError::configuration(format!(
                "cluster {} has no host pairs",
                self.name
            )));
        }
        if self.storage == StorageLayer::Asm && self.cells.is_empty() && !self.base_db {
            return Err(ProvisioningError::configuration(format!(
                "ASM cluster {} has no storage cells",
                self.name
            ))
            .with_suggestion("list the cells of the rack under \"cells\""));
        }
        Ok(())
    }

    /// Status lines reported so far, oldest first.
    pub fn status_history(&self) -> Vec<StatusUpdate> {
        self.status.lock().clone()
    }
}

impl ClusterContext for ClusterDescriptor {
    fn name(&self) -> &str {
        &self.name
    }

    fn command(&self) -> &CommandKind {
        &self.command
    }

    fn is_xs(&self) -> bool {
        self.storage == StorageLayer::Xs
    }

    fn is_exascale(&self) -> bool {
        self.exascale
    }

    fn rack_size(&self) -> RackSize {
        self.rack_size
    }

    fn is_base_db(&self) -> bool {
        self.base_db
    }

    fn is_exacompute_vm(&self) -> bool {
        self.exacompute_vm
    }

    fn is_edv_image_supported(&self) -> bool {
        self.edv_image_supported
    }

    fn is_clone(&self) -> bool {
        self.clone
    }

    fn is_kvm(&self) -> bool {
        self.hypervisor == Hypervisor::Kvm
    }

    fn is_shared_env(&self) -> bool {
        self.shared_env
    }

    fn flavor(&self) -> ProvisioningFlavor {
        self.flavor
    }

    fn host_pairs(&self) -> &[HostPair] {
        &self.host_pairs
    }

    fn cells(&self) -> &[String] {
        &self.cells
    }

    fn switches(&self) -> &[String] {
        &self.switches
    }

    fn config_option(&self, key: &str) -> Option<&str> {
        self.config.get(key).map(String::as_str)
    }

    fn update_status(&self, step: &StepName, percent: u8, comment: &str) {
        tracing::info!("📊 {} {step}: {percent}% {comment}", self.name);
        self.status.lock().push(StatusUpdate {
            step: step.clone(),
            percent,
            comment: comment.to_string(),
        });
    }
}
