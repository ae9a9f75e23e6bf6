//! Recording collaborators for tests.
//!
//! Every stub appends to one shared journal so tests can assert the
//! interleaving of tool calls, lock operations and host tasks.

use crate::step::{ProvisioningContext, Step};
use async_trait::async_trait;
use cluster_context::{
    ClusterContext, ClusterDescriptor, InfraOps, InfraTask, JobOptions, SnapshotDevice, VmVolume,
};
use image_ledger::Ledger;
use parking_lot::Mutex;
use provisioning_primitives::{
    HostPair, ProvisioningError, ProvisioningFlavor, Result, StepList, StepName,
};
use remote_lock::ClusterLock;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use step_executor::{OedaRequest, StepExecutor, SubOperation};

pub type Journal = Arc<Mutex<Vec<String>>>;

pub const ASM_CLUSTER: &str = r#"{
    "name": "clu01",
    "command": "createservice",
    "rack_size": "quarterrack",
    "host_pairs": [
        {"dom0": "dom0a", "domu": "vm01"},
        {"dom0": "dom0b", "domu": "vm02"}
    ],
    "cells": ["cell01", "cell02", "cell03"],
    "config": {"hw_alert_retry_delay_secs": "0"}
}"#;

pub struct RecordingExecutor {
    journal: Journal,
    calls: Mutex<Vec<(StepName, OedaRequest)>>,
    failures: Mutex<HashMap<(SubOperation, bool), ProvisioningError>>,
}

impl RecordingExecutor {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Make the given direction of `operation` fail.
    pub fn fail_on(&self, operation: SubOperation, undo: bool) {
        let err = ProvisioningError::external_tool(format!("OEDA step {operation} failed"));
        self.failures.lock().insert((operation, undo), err);
    }

    pub fn calls(&self) -> Vec<(StepName, OedaRequest)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl StepExecutor for RecordingExecutor {
    async fn run(
        &self,
        _cluster: &dyn ClusterContext,
        step: &StepName,
        _step_list: &StepList,
        request: OedaRequest,
    ) -> Result<()> {
        self.journal.lock().push(format!("oeda {request}"));
        self.calls.lock().push((step.clone(), request));
        match self.failures.lock().get(&(request.operation, request.undo)) {
            Some(err) => Err(err.clone().with_step(step.clone())),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct RecordingLock {
    journal: Journal,
    pub fail_acquire: bool,
    pub fail_release: bool,
}

impl RecordingLock {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            fail_acquire: false,
            fail_release: false,
        }
    }
}

#[async_trait]
impl ClusterLock for RecordingLock {
    async fn acquire(&self) -> Result<()> {
        self.journal.lock().push("lock acquire".into());
        if self.fail_acquire {
            return Err(ProvisioningError::lock_contention("cell lock held by another job"));
        }
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        self.journal.lock().push("lock release".into());
        if self.fail_release {
            return Err(ProvisioningError::lock_contention("lock store unavailable"));
        }
        Ok(())
    }
}

pub struct RecordingInfra {
    journal: Journal,
    tasks: Mutex<Vec<InfraTask>>,
    failing: Mutex<HashSet<String>>,
    pub vm_exists: Mutex<bool>,
    pub alerts: Mutex<VecDeque<Vec<String>>>,
    pub alert_checks: Mutex<u32>,
    pub snapshots: Mutex<HashMap<(String, VmVolume), SnapshotDevice>>,
    pub grid_disks_present: Mutex<bool>,
    pub cell_services_running: Mutex<bool>,
    pub other_clusters_on_cells: Mutex<bool>,
}

impl RecordingInfra {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            tasks: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            vm_exists: Mutex::new(false),
            alerts: Mutex::new(VecDeque::new()),
            alert_checks: Mutex::new(0),
            snapshots: Mutex::new(HashMap::new()),
            grid_disks_present: Mutex::new(true),
            cell_services_running: Mutex::new(true),
            other_clusters_on_cells: Mutex::new(false),
        }
    }

    /// Make every task whose display text starts with `prefix` fail.
    pub fn fail_task(&self, prefix: &str) {
        self.failing.lock().insert(prefix.to_string());
    }

    pub fn tasks(&self) -> Vec<InfraTask> {
        self.tasks.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&InfraTask) -> bool) -> usize {
        self.tasks.lock().iter().filter(|t| predicate(t)).count()
    }
}

#[async_trait]
impl InfraOps for RecordingInfra {
    async fn perform(&self, task: &InfraTask) -> Result<()> {
        let text = task.to_string();
        self.journal.lock().push(format!("infra {text}"));
        self.tasks.lock().push(task.clone());
        if self.failing.lock().iter().any(|p| text.starts_with(p.as_str())) {
            return Err(ProvisioningError::external_tool(format!("{text} failed")));
        }
        Ok(())
    }

    async fn vm_exists(&self) -> Result<bool> {
        Ok(*self.vm_exists.lock())
    }

    async fn hardware_alerts(&self) -> Result<Vec<String>> {
        *self.alert_checks.lock() += 1;
        Ok(self.alerts.lock().pop_front().unwrap_or_default())
    }

    async fn snapshot_device(
        &self,
        pair: &HostPair,
        volume: VmVolume,
    ) -> Result<Option<SnapshotDevice>> {
        Ok(self
            .snapshots
            .lock()
            .get(&(pair.dom0.clone(), volume))
            .cloned())
    }

    async fn grid_disks_present(&self) -> Result<bool> {
        Ok(*self.grid_disks_present.lock())
    }

    async fn cell_services_running(&self) -> Result<bool> {
        Ok(*self.cell_services_running.lock())
    }

    async fn cells_used_by_other_clusters(&self) -> Result<bool> {
        Ok(*self.other_clusters_on_cells.lock())
    }
}

/// Step that only records its calls; used to test the orchestrator.
pub struct RecordingStep {
    name: StepName,
    journal: Journal,
    fail_do: bool,
    fail_undo: bool,
}

impl RecordingStep {
    pub fn new(name: &str, journal: Journal) -> Self {
        Self {
            name: StepName::from(name),
            journal,
            fail_do: false,
            fail_undo: false,
        }
    }

    pub fn failing_do(mut self) -> Self {
        self.fail_do = true;
        self
    }

    pub fn failing_undo(mut self) -> Self {
        self.fail_undo = true;
        self
    }
}

#[async_trait]
impl Step for RecordingStep {
    fn name(&self) -> &StepName {
        &self.name
    }

    async fn do_execute(
        &self,
        _ctx: &ProvisioningContext,
        _options: &JobOptions,
        _step_list: &StepList,
    ) -> Result<()> {
        self.journal.lock().push(format!("do {}", self.name));
        if self.fail_do {
            return Err(ProvisioningError::external_tool("forward action failed")
                .with_step(self.name.clone()));
        }
        Ok(())
    }

    async fn undo_execute(
        &self,
        _ctx: &ProvisioningContext,
        _options: &JobOptions,
        _step_list: &StepList,
    ) -> Result<()> {
        self.journal.lock().push(format!("undo {}", self.name));
        if self.fail_undo {
            return Err(ProvisioningError::external_tool("compensation failed")
                .with_step(self.name.clone()));
        }
        Ok(())
    }
}

/// A cluster plus recording collaborators sharing one journal.
pub struct Harness {
    pub journal: Journal,
    pub cluster: Arc<ClusterDescriptor>,
    pub executor: Arc<RecordingExecutor>,
    pub lock: Arc<RecordingLock>,
    pub infra: Arc<RecordingInfra>,
}

impl Harness {
    pub fn new(cluster_json: &str) -> Self {
        Self::with_lock(cluster_json, |_| {})
    }

    pub fn asm() -> Self {
        Self::new(ASM_CLUSTER)
    }

    /// Harness whose lock is adjusted by `configure` before use.
    pub fn with_lock(cluster_json: &str, configure: impl FnOnce(&mut RecordingLock)) -> Self {
        let journal = Journal::default();
        let cluster = match ClusterDescriptor::from_json_str(cluster_json) {
            Ok(cluster) => cluster,
            Err(e) => panic!("invalid test cluster: {e}"),
        };
        let mut lock = RecordingLock::new(journal.clone());
        configure(&mut lock);
        Self {
            cluster: Arc::new(cluster),
            executor: Arc::new(RecordingExecutor::new(journal.clone())),
            lock: Arc::new(lock),
            infra: Arc::new(RecordingInfra::new(journal.clone())),
            journal,
        }
    }

    pub fn context(&self) -> ProvisioningContext {
        self.context_with_ledger(Ledger::empty(ProvisioningFlavor::Standard))
    }

    pub fn context_with_ledger(&self, ledger: Ledger) -> ProvisioningContext {
        ProvisioningContext::new(
            self.cluster.clone(),
            ledger,
            self.executor.clone(),
            self.lock.clone(),
            self.infra.clone(),
        )
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().clone()
    }

    /// Position of the first journal entry starting with `prefix`.
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.journal.lock().iter().position(|e| e.starts_with(prefix))
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.journal
            .lock()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }
}
