//! Idempotency ledger ("BOM") for gold-image and base-DB provisioning.
//!
//! The ledger records which named sub-actions of a step were already baked
//! into the image the cluster is provisioned from. It is loaded once per
//! orchestration context and is read-only afterwards.
//!
//! Persisted format:
//!
//! ```json
//! {
//!   "ESTP_CREATE_VM": {
//!     "KVM_CPU_MANAGE": { "status": "DONE", "image": "23.1.0" }
//!   }
//! }
//! ```

use provisioning_primitives::{ProvisioningError, ProvisioningFlavor, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubStepStatus {
    #[serde(rename = "DONE")]
    Done,
    #[serde(rename = "NOT_DONE")]
    NotDone,
}

/// One ledger record; metadata besides `status` is preserved verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub status: SubStepStatus,
    #[serde(flatten)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

type Document = BTreeMap<String, BTreeMap<String, LedgerEntry>>;

#[derive(Debug, Clone, Default)]
pub struct Ledger {
    flavor: ProvisioningFlavor,
    entries: Document,
}

impl Ledger {
    /// Ledger with no records. Every lookup reports "not done".
    pub fn empty(flavor: ProvisioningFlavor) -> Self {
        Self {
            flavor,
            entries: Document::new(),
        }
    }

    pub fn from_json_str(flavor: ProvisioningFlavor, json: &str) -> Result<Self> {
        let entries: Document = serde_json::from_str(json).map_err(|e| {
            ProvisioningError::corrupt_state(format!("malformed ledger document: {e}"))
                .with_suggestion("regenerate the image BOM file or remove it to provision without skips")
        })?;
        tracing::debug!(
            "📒 Ledger loaded: {} steps, flavor {:?}",
            entries.len(),
            flavor
        );
        Ok(Self { flavor, entries })
    }

    /// Load the ledger from a file. A missing file is corruption only when
    /// the flavor actually relies on the ledger.
    pub fn load(flavor: ProvisioningFlavor, path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(json) => Self::from_json_str(flavor, &json),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !flavor.uses_ledger() => {
                tracing::debug!("No ledger at {}, standard provisioning", path.display());
                Ok(Self::empty(flavor))
            }
            Err(e) => Err(ProvisioningError::corrupt_state(format!(
                "cannot read ledger {}: {e}",
                path.display()
            ))),
        }
    }

    pub fn flavor(&self) -> ProvisioningFlavor {
        self.flavor
    }

    /// True only for gold-image/base-DB runs whose record says DONE.
    pub fn is_sub_step_done(&self, step: &str, sub_step: &str) -> bool {
        if !self.flavor.uses_ledger() {
            return false;
        }
        let done = self
            .entry(step, sub_step)
            .is_some_and(|e| e.status == SubStepStatus::Done);
        if done {
            tracing::info!("⏭️  {step}/{sub_step} already present in image, skipping");
        }
        done
    }

    pub fn entry(&self, step: &str, sub_step: &str) -> Option<&LedgerEntry> {
        self.entries.get(step)?.get(sub_step)
    }

    /// Sub-steps recorded for a step, in name order.
    pub fn sub_steps(&self, step: &str) -> impl Iterator<Item = (&str, &LedgerEntry)> {
        self.entries
            .get(step)
            .into_iter()
            .flat_map(|m| m.iter().map(|(k, v)| (k.as_str(), v)))
    }
}
