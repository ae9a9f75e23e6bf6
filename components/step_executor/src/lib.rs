//! Adapter around the external provisioning tool (OEDA).
//!
//! One [`StepExecutor::run`] call drives one tool sub-operation forward or
//! backward for the whole cluster, optionally under the host lock, and turns
//! a non-success into an `ExternalToolFailure`.

mod oeda;
mod operation;
mod runner;
mod settings;

pub use oeda::OedaExecutor;
pub use operation::{OedaRequest, SubOperation};
pub use runner::{CommandError, CommandOutput, CommandRunner, DryRunCommandRunner, ShellCommandRunner};
pub use settings::OedaSettings;

use async_trait::async_trait;
use cluster_context::ClusterContext;
use provisioning_primitives::{Result, StepList, StepName};

#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn run(
        &self,
        cluster: &dyn ClusterContext,
        step: &StepName,
        step_list: &StepList,
        request: OedaRequest,
    ) -> Result<()>;
}
