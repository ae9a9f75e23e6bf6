//! Provisioning steps, the per-variant step factories and pipeline tables,
//! and the selector choosing between them.

mod factory;
mod selector;
mod step;
pub mod steps;
mod table;

#[cfg(any(test, feature = "test-support"))]
pub mod stub;

pub use factory::{FactoryKind, StepConstructor, StepFactory};
pub use selector::{select, Pipeline, PipelineKind};
pub use step::{ProvisioningContext, Step};
pub use table::{PipelineEntry, PipelineTable};
