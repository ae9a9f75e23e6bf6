//! Collaborator contracts the provisioning engine consumes: the cluster
//! context (variant predicates, topology, status) and the infrastructure
//! operations steps perform outside the external provisioning tool.

mod context;
mod descriptor;
mod infra;
mod options;

pub use context::{ClusterContext, StatusUpdate};
pub use descriptor::{ClusterDescriptor, Hypervisor, StorageLayer};
pub use infra::{InfraOps, InfraTask, SnapshotDevice, SnapshotMount, VmVolume};
pub use options::{JobOptions, UserIds};
