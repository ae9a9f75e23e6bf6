use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Sub-operation of the external provisioning tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubOperation {
    CreateVm,
    CreateUser,
    SetupCell,
    VerifyFabric,
    CalibrateCells,
    CreateCell,
    #[serde(rename = "CREATE_GDISK")]
    CreateGridDisks,
    InstallCluster,
    InitCluster,
    CreateAsm,
    #[serde(rename = "APPLY_FIX")]
    ApplySecurityFixes,
    ConfigKvmHosts,
    ConfigStorage,
}

impl SubOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubOperation::CreateVm => "CREATE_VM",
            SubOperation::CreateUser => "CREATE_USER",
            SubOperation::SetupCell => "SETUP_CELL",
            SubOperation::VerifyFabric => "VERIFY_FABRIC",
            SubOperation::CalibrateCells => "CALIBRATE_CELLS",
            SubOperation::CreateCell => "CREATE_CELL",
            SubOperation::CreateGridDisks => "CREATE_GDISK",
            SubOperation::InstallCluster => "INSTALL_CLUSTER",
            SubOperation::InitCluster => "INIT_CLUSTER",
            SubOperation::CreateAsm => "CREATE_ASM",
            SubOperation::ApplySecurityFixes => "APPLY_FIX",
            SubOperation::ConfigKvmHosts => "CONFIG_KVM_HOSTS",
            SubOperation::ConfigStorage => "CONFIG_STORAGE",
        }
    }

    /// Step number in the tool's standard step listing.
    pub fn default_step_number(&self) -> u32 {
        match self {
            SubOperation::CreateVm => 2,
            SubOperation::CreateUser => 3,
            SubOperation::SetupCell => 4,
            SubOperation::VerifyFabric => 5,
            SubOperation::CalibrateCells => 6,
            SubOperation::CreateCell => 7,
            SubOperation::CreateGridDisks => 8,
            SubOperation::InstallCluster => 9,
            SubOperation::InitCluster => 10,
            SubOperation::CreateAsm => 13,
            SubOperation::ApplySecurityFixes => 15,
            SubOperation::ConfigKvmHosts => 20,
            SubOperation::ConfigStorage => 21,
        }
    }

    /// Time budget per host pair when no override is configured.
    pub fn default_timeout_per_node(&self) -> Duration {
        let minutes = match self {
            SubOperation::CreateVm => 45,
            SubOperation::CreateUser => 15,
            SubOperation::SetupCell => 30,
            SubOperation::CreateCell => 30,
            SubOperation::CreateGridDisks => 20,
            SubOperation::InstallCluster => 15,
            SubOperation::InitCluster => 45,
            SubOperation::CreateAsm => 15,
            SubOperation::ApplySecurityFixes => 15,
            _ => 30,
        };
        Duration::from_secs(minutes * 60)
    }
}

impl fmt::Display for SubOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One executor call: which sub-operation, which direction and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OedaRequest {
    pub operation: SubOperation,
    pub undo: bool,
    /// Hold the host lock for the duration of the call.
    pub lock_host: bool,
    /// Log a failure instead of raising it.
    pub skip_fail: bool,
    pub force_override: bool,
}

impl OedaRequest {
    pub fn forward(operation: SubOperation) -> Self {
        Self {
            operation,
            undo: false,
            lock_host: true,
            skip_fail: false,
            force_override: false,
        }
    }

    pub fn undo(operation: SubOperation) -> Self {
        Self {
            undo: true,
            ..Self::forward(operation)
        }
    }

    pub fn without_host_lock(mut self) -> Self {
        self.lock_host = false;
        self
    }

    pub fn skip_fail(mut self) -> Self {
        self.skip_fail = true;
        self
    }

    pub fn force_override(mut self) -> Self {
        self.force_override = true;
        self
    }
}

impl fmt::Display for OedaRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = if self.undo { "undo" } else { "do" };
        write!(f, "{direction} {}", self.operation)
    }
}
