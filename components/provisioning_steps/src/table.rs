//! Human-readable pipeline tables, used for progress reporting only.
//!
//! Serialized as an ordered JSON object:
//! `{"1": [1, "Pre-VM checks", "PREVM"], "2": [...]}`.

use provisioning_primitives::{steps, StepName};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::sync::LazyLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineEntry {
    pub index: u32,
    pub step: StepName,
    pub description: String,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineTable {
    name: &'static str,
    entries: Vec<PipelineEntry>,
}

impl PipelineTable {
    fn build(name: &'static str, rows: &[(&str, &str, &str)]) -> Self {
        let entries = rows
            .iter()
            .zip(1u32..)
            .map(|((step, description, category), index)| PipelineEntry {
                index,
                step: StepName::from(*step),
                description: description.to_string(),
                category: category.to_string(),
            })
            .collect();
        Self { name, entries }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn entries(&self) -> &[PipelineEntry] {
        &self.entries
    }

    pub fn entry_for(&self, step: &StepName) -> Option<&PipelineEntry> {
        self.entries.iter().find(|e| &e.step == step)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pretty JSON object keyed by table position.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl Serialize for PipelineTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for entry in &self.entries {
            map.serialize_entry(
                &entry.index.to_string(),
                &(entry.index, &entry.description, &entry.category),
            )?;
        }
        map.end()
    }
}

const PREVM: &str = "PREVM";
const VM: &str = "VM";
const STORAGE: &str = "STORAGE";
const CLUSTER: &str = "CLUSTER";
const POST: &str = "POSTINSTALL";

fn asm_rows(rack: &str, storage: &'static str) -> Vec<(&'static str, String, &'static str)> {
    vec![
        (steps::PREVM_CHECKS, format!("Pre-VM checks ({rack})"), PREVM),
        (steps::PREVM_SETUP, "Pre-VM setup".to_string(), PREVM),
        (steps::CREATE_VM, "Create virtual machines".to_string(), VM),
        (steps::CREATE_USER, "Create users".to_string(), VM),
        (steps::CREATE_STORAGE, storage.to_string(), STORAGE),
        (steps::POSTVM_INSTALL, "Post-VM install".to_string(), VM),
        (steps::INSTALL_CLUSTER, "Install cluster software".to_string(), CLUSTER),
        (steps::POSTGI_INSTALL, "Create ASM disk groups".to_string(), CLUSTER),
        (steps::BACKUPVM_GOLDIMAGE, "Back up gold image".to_string(), POST),
    ]
}

fn xs_rows(rack: &str) -> Vec<(&'static str, String, &'static str)> {
    vec![
        (steps::PREVM_CHECKS, format!("Pre-VM checks ({rack})"), PREVM),
        (steps::PREVM_SETUP, "Pre-VM setup".to_string(), PREVM),
        (steps::CONFIG_COMPUTE, "Configure Exascale compute".to_string(), STORAGE),
        (steps::CREATE_VM, "Create virtual machines".to_string(), VM),
        (steps::CREATE_USER, "Create users".to_string(), VM),
        (steps::POSTVM_INSTALL, "Post-VM install".to_string(), VM),
        (steps::EXASCALE_COMPLETE, "Complete Exascale setup".to_string(), CLUSTER),
        (steps::BACKUPVM_GOLDIMAGE, "Back up gold image".to_string(), POST),
    ]
}

fn table(name: &'static str, rows: Vec<(&'static str, String, &'static str)>) -> PipelineTable {
    let borrowed: Vec<(&str, &str, &str)> = rows
        .iter()
        .map(|(step, description, category)| (*step, description.as_str(), *category))
        .collect();
    PipelineTable::build(name, &borrowed)
}

pub(crate) static DEFAULT_TABLE: LazyLock<PipelineTable> = LazyLock::new(|| {
    table("default", asm_rows("full rack", "Create storage cells"))
});

pub(crate) static EIGHTH_TABLE: LazyLock<PipelineTable> = LazyLock::new(|| {
    table("eighth", asm_rows("eighth rack", "Create storage cells (eighth rack)"))
});

pub(crate) static ZRACK_TABLE: LazyLock<PipelineTable> = LazyLock::new(|| {
    table("zrack", asm_rows("Z rack", "Create storage cells (Z rack)"))
});

pub(crate) static EDV_TABLE: LazyLock<PipelineTable> = LazyLock::new(|| {
    table("edv", asm_rows("EDV image", "Create storage cells"))
});

pub(crate) static XS_TABLE: LazyLock<PipelineTable> =
    LazyLock::new(|| table("xs", xs_rows("Exascale")));

pub(crate) static XS_EIGHTH_TABLE: LazyLock<PipelineTable> =
    LazyLock::new(|| table("xs-eighth", xs_rows("Exascale eighth rack")));

pub(crate) static BASE_DB_TABLE: LazyLock<PipelineTable> = LazyLock::new(|| {
    table(
        "base-db",
        vec![
            (steps::PREVM_CHECKS, "Pre-VM checks (base DB)".to_string(), PREVM),
            (steps::PREVM_SETUP, "Pre-VM setup and EDV volumes".to_string(), PREVM),
            (steps::CREATE_VM, "Create virtual machines".to_string(), VM),
            (steps::CREATE_USER, "Create users".to_string(), VM),
            (steps::POSTVM_INSTALL, "Post-VM install".to_string(), VM),
            (steps::EXASCALE_COMPLETE, "Complete base DB setup".to_string(), CLUSTER),
            (steps::BACKUPVM_GOLDIMAGE, "Back up gold image".to_string(), POST),
        ],
    )
});
