use crate::operation::SubOperation;
use provisioning_primitives::{ProvisioningError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where the tool lives and how it is driven.
///
/// ```json
/// {
///   "oeda_path": "/u01/oeda/clu01",
///   "remote_config": "/u01/oeda/clu01/clu01.xml",
///   "timeouts_secs": { "CREATE_VM": 3600 }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OedaSettings {
    pub oeda_path: PathBuf,
    pub install_script: String,
    pub remote_config: PathBuf,
    pub extra_args: Vec<String>,
    pub step_numbers: BTreeMap<SubOperation, u32>,
    /// Per host pair; multiplied by the number of pairs.
    pub timeouts_secs: BTreeMap<SubOperation, u64>,
}

impl Default for OedaSettings {
    fn default() -> Self {
        Self {
            oeda_path: PathBuf::from("/u01/oeda"),
            install_script: "install.sh".into(),
            remote_config: PathBuf::from("/u01/oeda/cluster.xml"),
            extra_args: Vec::new(),
            step_numbers: BTreeMap::new(),
            timeouts_secs: BTreeMap::new(),
        }
    }
}

impl OedaSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            ProvisioningError::configuration(format!(
                "cannot read executor settings {}: {e}",
                path.display()
            ))
        })?;
        serde_json::from_str(&json).map_err(|e| {
            ProvisioningError::configuration(format!(
                "invalid executor settings {}: {e}",
                path.display()
            ))
        })
    }

    pub fn step_number(&self, operation: SubOperation) -> u32 {
        self.step_numbers
            .get(&operation)
            .copied()
            .unwrap_or_else(|| operation.default_step_number())
    }

    pub fn timeout_per_node(&self, operation: SubOperation) -> Duration {
        self.timeouts_secs
            .get(&operation)
            .map(|secs| Duration::from_secs(*secs))
            .unwrap_or_else(|| operation.default_timeout_per_node())
    }
}
