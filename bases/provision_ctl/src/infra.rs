// bases/provision_ctl/src/infra.rs
//! Host operations over the shared command runner.
//!
//! Standard system tools are called directly. Everything site specific goes
//! through a hook script named after the task, `<hook_dir>/<task>.sh`,
//! called with the cluster name.

use async_trait::async_trait;
use cluster_context::{ClusterContext, InfraOps, InfraTask, SnapshotDevice, VmVolume};
use provisioning_primitives::{HostPair, ProvisioningError, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use step_executor::{CommandOutput, CommandRunner};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const QUERY_TIMEOUT: Duration = Duration::from_secs(120);

/// Which hosts a task runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Dom0s,
    Domus,
    Cells,
    Host(String),
    Local,
}

pub struct RemoteInfraOps {
    runner: Arc<dyn CommandRunner>,
    cluster: Arc<dyn ClusterContext>,
    hook_dir: PathBuf,
    timeout: Duration,
}

impl RemoteInfraOps {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        cluster: Arc<dyn ClusterContext>,
        hook_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            cluster,
            hook_dir: hook_dir.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    fn hosts(&self, target: &Target) -> Vec<Option<String>> {
        match target {
            Target::Dom0s => self.cluster.dom0s().into_iter().map(Some).collect(),
            Target::Domus => self.cluster.domus().into_iter().map(Some).collect(),
            Target::Cells => self.cluster.cells().iter().cloned().map(Some).collect(),
            Target::Host(host) => vec![Some(host.clone())],
            Target::Local => vec![None],
        }
    }

    fn hook(&self, task: &InfraTask) -> String {
        format!(
            "{}/{}.sh {}",
            self.hook_dir.display(),
            task_name(task),
            self.cluster.name()
        )
    }

    fn plan(&self, task: &InfraTask) -> (Target, String) {
        match task {
            InfraTask::UnmountVolume(mount) => (
                Target::Host(mount.dom0.clone()),
                format!(
                    "if findmnt -rn -S {device} >/dev/null; then umount {device}; fi \
                     && lvremove -f {device}",
                    device = mount.device
                ),
            ),
            InfraTask::CreateOsUser { user, uid, gid } => {
                let (group, group_arg) = match gid {
                    Some(gid) => (
                        format!("getent group {gid} >/dev/null || groupadd -g {gid} {user}; "),
                        format!(" -g {gid}"),
                    ),
                    None => (String::new(), String::new()),
                };
                (
                    Target::Domus,
                    format!(
                        "{group}id -u {user} >/dev/null 2>&1 || useradd -m -u {uid}{group_arg} {user}"
                    ),
                )
            }
            InfraTask::ConfigurePasswordless { user } => {
                (Target::Domus, format!("{} {user}", self.hook(task)))
            }
            InfraTask::RemoveSshDirectories => (
                Target::Domus,
                "rm -rf /home/opc/.ssh /home/oracle/.ssh /home/grid/.ssh".to_string(),
            ),
            InfraTask::DeleteCloudUsers
            | InfraTask::ConfigureCells
            | InfraTask::FixPmemComponents
            | InfraTask::ForceDeleteGridDisks => (Target::Cells, self.hook(task)),
            InfraTask::DeleteBackupBucket
            | InfraTask::UpdateToolPassword
            | InfraTask::StoreGuestPassword => (Target::Local, self.hook(task)),
            InfraTask::AddMissingDnsNtp
            | InfraTask::SaveSshKeys
            | InfraTask::LockDbUsers
            | InfraTask::RefreshDependencies
            | InfraTask::PatchPostVm
            | InfraTask::ManageSshKeys
            | InfraTask::SecureSshPassword
            | InfraTask::RunPreVmDeleteHooks
            | InfraTask::SetGuestStorageEnv
            | InfraTask::MakeFipsCompliant
            | InfraTask::ManageOpcKey
            | InfraTask::ConfigureHugePages
            | InfraTask::ConfigureShmAll
            | InfraTask::ResizeGuestFilesystems
            | InfraTask::AttachVault
            | InfraTask::DetachVault => (Target::Domus, self.hook(task)),
            _ => (Target::Dom0s, self.hook(task)),
        }
    }

    async fn run_on(
        &self,
        host: Option<&str>,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let on = host.unwrap_or("localhost");
        let output = self
            .runner
            .run(host, command, timeout)
            .await
            .map_err(|e| ProvisioningError::external_tool(format!("{on}: {e}")))?;
        if !output.succeeded() {
            let reason = output.stderr.trim();
            return Err(ProvisioningError::external_tool(format!(
                "{on}: `{command}` exited with {:?}: {reason}",
                output.exit_code
            )));
        }
        Ok(output)
    }

    /// Run `command` on every dom0, returning each host's output.
    async fn query_dom0s(&self, command: &str) -> Result<Vec<(String, String)>> {
        let mut outputs = Vec::new();
        for dom0 in self.cluster.dom0s() {
            let output = self.run_on(Some(&dom0), command, QUERY_TIMEOUT).await?;
            outputs.push((dom0, output.stdout));
        }
        Ok(outputs)
    }

    async fn check_image_consistency(&self) -> Result<()> {
        let versions = self.query_dom0s("imageinfo -ver").await?;
        let mut distinct: Vec<&str> = versions.iter().map(|(_, v)| v.trim()).collect();
        distinct.sort_unstable();
        distinct.dedup();
        if distinct.len() > 1 {
            let detail: Vec<String> = versions
                .iter()
                .map(|(host, v)| format!("{host}={}", v.trim()))
                .collect();
            return Err(ProvisioningError::precondition(format!(
                "hypervisor images differ: {}",
                detail.join(", ")
            ))
            .with_suggestion("upgrade all hosts to the same image before provisioning"));
        }
        Ok(())
    }

    async fn query_cells(&self, command: &str) -> Result<Vec<String>> {
        let mut outputs = Vec::new();
        for cell in self.cluster.cells() {
            let output = self.run_on(Some(cell), command, QUERY_TIMEOUT).await?;
            outputs.push(output.stdout);
        }
        Ok(outputs)
    }
}

/// Hook script name of a task, e.g. `cleanup_bonding`.
fn task_name(task: &InfraTask) -> String {
    let debug = match task {
        InfraTask::UnmountVolume(_) => "UnmountVolume".to_string(),
        InfraTask::CreateOsUser { .. } => "CreateOsUser".to_string(),
        InfraTask::ConfigurePasswordless { .. } => "ConfigurePasswordless".to_string(),
        other => format!("{other:?}"),
    };
    let mut name = String::with_capacity(debug.len() + 4);
    for (i, c) in debug.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                name.push('_');
            }
            name.push(c.to_ascii_lowercase());
        } else {
            name.push(c);
        }
    }
    name
}

fn non_empty_lines(output: &str) -> impl Iterator<Item = &str> {
    output.lines().map(str::trim).filter(|l| !l.is_empty())
}

#[async_trait]
impl InfraOps for RemoteInfraOps {
    async fn perform(&self, task: &InfraTask) -> Result<()> {
        if *task == InfraTask::CheckImageConsistency {
            return self.check_image_consistency().await;
        }
        let (target, command) = self.plan(task);
        for host in self.hosts(&target) {
            self.run_on(host.as_deref(), &command, self.timeout).await?;
        }
        Ok(())
    }

    async fn vm_exists(&self) -> Result<bool> {
        let list = if self.cluster.is_kvm() {
            "virsh list --all --name"
        } else {
            "xm list"
        };
        let domus = self.cluster.domus();
        let listings = self.query_dom0s(list).await?;
        Ok(listings.iter().any(|(_, out)| {
            non_empty_lines(out).any(|line| {
                let guest = line.split_whitespace().next().unwrap_or_default();
                domus.iter().any(|d| d == guest)
            })
        }))
    }

    async fn hardware_alerts(&self) -> Result<Vec<String>> {
        let command = "dbmcli -e \"list alerthistory where severity = 'critical' \
                       and examinedBy = '' attributes name, alertMessage\"";
        let outputs = self.query_dom0s(command).await?;
        Ok(outputs
            .iter()
            .flat_map(|(host, out)| non_empty_lines(out).map(move |l| format!("{host}: {l}")))
            .collect())
    }

    async fn snapshot_device(
        &self,
        pair: &HostPair,
        volume: VmVolume,
    ) -> Result<Option<SnapshotDevice>> {
        let command = format!(
            "lvs --noheadings -o lv_name,lv_path --select 'lv_name=~{}_{volume}_snap'",
            pair.domu
        );
        let output = self.run_on(Some(&pair.dom0), &command, QUERY_TIMEOUT).await?;
        let snapshot = non_empty_lines(&output.stdout).next().and_then(|line| {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next()) {
                (Some(lvm), Some(device)) => Some(SnapshotDevice {
                    lvm: lvm.to_string(),
                    device: device.to_string(),
                }),
                _ => None,
            }
        });
        Ok(snapshot)
    }

    async fn grid_disks_present(&self) -> Result<bool> {
        let prefix = self.cluster.name().to_ascii_uppercase();
        let outputs = self
            .query_cells("cellcli -e list griddisk attributes name")
            .await?;
        Ok(outputs.iter().any(|out| {
            non_empty_lines(out).any(|l| l.to_ascii_uppercase().contains(&prefix))
        }))
    }

    async fn cell_services_running(&self) -> Result<bool> {
        if self.cluster.cells().is_empty() {
            return Ok(false);
        }
        let outputs = self
            .query_cells("cellcli -e list cell attributes cellsrvStatus")
            .await?;
        Ok(outputs.iter().all(|out| out.trim() == "running"))
    }

    async fn cells_used_by_other_clusters(&self) -> Result<bool> {
        let prefix = self.cluster.name().to_ascii_uppercase();
        let outputs = self
            .query_cells("cellcli -e list griddisk attributes name")
            .await?;
        Ok(outputs.iter().any(|out| {
            non_empty_lines(out).any(|l| !l.to_ascii_uppercase().contains(&prefix))
        }))
    }
}
