use crate::operation::{OedaRequest, SubOperation};
use crate::runner::{CommandOutput, CommandRunner};
use crate::settings::OedaSettings;
use crate::StepExecutor;
use async_trait::async_trait;
use cluster_context::ClusterContext;
use provisioning_primitives::{steps, ProvisioningError, Result, StepList, StepName};
use remote_lock::ClusterLock;
use std::sync::Arc;
use std::time::Duration;

const FLAT_TIMEOUT_PER_NODE: Duration = Duration::from_secs(30 * 60);

pub struct OedaExecutor {
    runner: Arc<dyn CommandRunner>,
    host_lock: Arc<dyn ClusterLock>,
    settings: OedaSettings,
}

impl OedaExecutor {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        host_lock: Arc<dyn ClusterLock>,
        settings: OedaSettings,
    ) -> Self {
        Self {
            runner,
            host_lock,
            settings,
        }
    }

    pub fn settings(&self) -> &OedaSettings {
        &self.settings
    }

    /// Exascale, base-DB, Exacompute and EDV clusters get a flat budget per
    /// pair; everything else uses the per-operation table.
    pub fn timeout_for(&self, cluster: &dyn ClusterContext, operation: SubOperation) -> Duration {
        let nodes = cluster.host_pairs().len().max(1) as u32;
        let per_node = if cluster.is_xs()
            || cluster.is_base_db()
            || cluster.is_exacompute_vm()
            || cluster.is_edv_image_supported()
        {
            FLAT_TIMEOUT_PER_NODE
        } else {
            self.settings.timeout_per_node(operation)
        };
        per_node * nodes
    }

    pub fn command_line(&self, cluster: &dyn ClusterContext, request: &OedaRequest) -> String {
        let flag = if request.undo { "-u" } else { "-s" };
        let mut command = format!(
            "cd {} && /bin/bash {} -cf {} {flag} {}",
            self.settings.oeda_path.display(),
            self.settings.install_script,
            self.settings.remote_config.display(),
            self.settings.step_number(request.operation),
        );
        for arg in &self.settings.extra_args {
            command.push(' ');
            command.push_str(arg);
        }

        let asm_disk_undo = request.undo
            && !cluster.is_xs()
            && !cluster.is_base_db()
            && matches!(
                request.operation,
                SubOperation::CreateCell | SubOperation::CreateGridDisks
            );
        if asm_disk_undo || request.force_override {
            command.push_str(" -override");
        }
        command
    }

    async fn invoke(
        &self,
        cluster: &dyn ClusterContext,
        request: &OedaRequest,
    ) -> std::result::Result<(), String> {
        let command = self.command_line(cluster, request);
        let timeout = self.timeout_for(cluster, request.operation);
        tracing::info!("⚙️  OEDA {request} (timeout {:?}): {command}", timeout);

        let output = self
            .runner
            .run(None, &command, timeout)
            .await
            .map_err(|e| e.to_string())?;
        match tool_error(&output) {
            None => Ok(()),
            Some(reason) => Err(reason),
        }
    }
}

/// Failure reason from the tool's exit status and output, if it failed.
fn tool_error(output: &CommandOutput) -> Option<String> {
    let marker = output
        .stdout
        .lines()
        .chain(output.stderr.lines())
        .map(str::trim)
        .find(|line| line.contains("ERROR:") || line.starts_with("OEDA-"));

    match (output.succeeded(), marker) {
        (true, None) => None,
        (_, Some(line)) => Some(line.to_string()),
        (false, None) => Some(format!(
            "exit code {}",
            output
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".into())
        )),
    }
}

#[async_trait]
impl StepExecutor for OedaExecutor {
    async fn run(
        &self,
        cluster: &dyn ClusterContext,
        step: &StepName,
        step_list: &StepList,
        request: OedaRequest,
    ) -> Result<()> {
        tracing::debug!("{step} ({} steps requested): {request}", step_list.len());

        if request.lock_host {
            self.host_lock.acquire().await.map_err(|e| e.in_step(step))?;
        }

        let outcome = self.invoke(cluster, &request).await;

        if request.lock_host {
            if let Err(e) = self.host_lock.release().await {
                tracing::error!("🔓 Failed to release host lock after {request}: {e}");
            }
        }

        let Err(reason) = outcome else {
            tracing::info!("✅ OEDA {request} complete");
            return Ok(());
        };

        let delete_flow = cluster.command().is_delete() && step != steps::CREATE_VM;
        if delete_flow || request.skip_fail {
            tracing::warn!("⚠️  OEDA {request} failed in {step}, continuing: {reason}");
            return Ok(());
        }

        tracing::error!("❌ OEDA {request} failed in {step}: {reason}");
        Err(ProvisioningError::external_tool(format!(
            "OEDA step {} failed: {reason}",
            request.operation
        ))
        .with_step(step.clone())
        .with_suggestion(format!(
            "inspect the OEDA logs under {}/log and rerun from {step}",
            self.settings.oeda_path.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::CommandError;
    use assert_matches::assert_matches;
    use cluster_context::ClusterDescriptor;
    use parking_lot::Mutex;
    use provisioning_primitives::ErrorKind;
    use rstest::rstest;

    #[derive(Default)]
    struct ScriptedRunner {
        outputs: Mutex<Vec<CommandOutput>>,
        calls: Mutex<Vec<(String, Duration)>>,
        journal: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(
            &self,
            _host: Option<&str>,
            command: &str,
            timeout: Duration,
        ) -> std::result::Result<CommandOutput, CommandError> {
            self.calls.lock().push((command.to_string(), timeout));
            self.journal.lock().push("run".into());
            let mut outputs = self.outputs.lock();
            Ok(if outputs.is_empty() {
                CommandOutput::success("Successfully completed execution of step")
            } else {
                outputs.remove(0)
            })
        }
    }

    struct JournalLock {
        journal: Arc<Mutex<Vec<String>>>,
        fail_acquire: bool,
    }

    #[async_trait]
    impl ClusterLock for JournalLock {
        async fn acquire(&self) -> Result<()> {
            if self.fail_acquire {
                return Err(ProvisioningError::lock_contention("busy"));
            }
            self.journal.lock().push("acquire".into());
            Ok(())
        }

        async fn release(&self) -> Result<()> {
            self.journal.lock().push("release".into());
            Ok(())
        }
    }

    fn cluster(command: &str, storage: &str) -> ClusterDescriptor {
        ClusterDescriptor::from_json_str(&format!(
            r#"{{
                "name": "clu01",
                "command": "{command}",
                "storage": "{storage}",
                "rack_size": "quarterrack",
                "host_pairs": [
                    {{"dom0": "dom0a", "domu": "vm01"}},
                    {{"dom0": "dom0b", "domu": "vm02"}}
                ],
                "cells": ["cell01", "cell02", "cell03"]
            }}"#
        ))
        .unwrap()
    }

    fn executor(outputs: Vec<CommandOutput>) -> (OedaExecutor, Arc<ScriptedRunner>, Arc<Mutex<Vec<String>>>) {
        executor_with_lock(outputs, false)
    }

    fn executor_with_lock(
        outputs: Vec<CommandOutput>,
        fail_acquire: bool,
    ) -> (OedaExecutor, Arc<ScriptedRunner>, Arc<Mutex<Vec<String>>>) {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let runner = Arc::new(ScriptedRunner {
            outputs: Mutex::new(outputs),
            journal: journal.clone(),
            ..Default::default()
        });
        let lock = Arc::new(JournalLock {
            journal: journal.clone(),
            fail_acquire,
        });
        let settings = OedaSettings {
            oeda_path: "/u01/oeda/clu01".into(),
            remote_config: "/u01/oeda/clu01/clu01.xml".into(),
            ..Default::default()
        };
        (OedaExecutor::new(runner.clone(), lock, settings), runner, journal)
    }

    fn step(name: &str) -> StepName {
        StepName::from(name)
    }

    #[rstest]
    #[case(OedaRequest::forward(SubOperation::CreateVm), "asm", "-s 2")]
    #[case(OedaRequest::undo(SubOperation::SetupCell), "asm", "-u 4")]
    #[case(OedaRequest::undo(SubOperation::CreateGridDisks), "asm", "-u 8 -override")]
    #[case(OedaRequest::undo(SubOperation::CreateCell), "xs", "-u 7")]
    #[case(OedaRequest::forward(SubOperation::ConfigStorage).force_override(), "xs", "-s 21 -override")]
    fn builds_install_command(
        #[case] request: OedaRequest,
        #[case] storage: &str,
        #[case] suffix: &str,
    ) {
        let (executor, _, _) = executor(vec![]);
        let cluster = cluster("createservice", storage);
        let command = executor.command_line(&cluster, &request);
        assert!(
            command.starts_with("cd /u01/oeda/clu01 && /bin/bash install.sh -cf /u01/oeda/clu01/clu01.xml"),
            "{command}"
        );
        assert!(command.ends_with(suffix), "{command}");
    }

    #[test]
    fn timeouts_scale_with_host_pairs() {
        let (executor, _, _) = executor(vec![]);
        let asm = cluster("createservice", "asm");
        assert_eq!(
            executor.timeout_for(&asm, SubOperation::CreateVm),
            Duration::from_secs(2 * 45 * 60)
        );
        let xs = cluster("createservice", "xs");
        assert_eq!(
            executor.timeout_for(&xs, SubOperation::CreateVm),
            Duration::from_secs(2 * 30 * 60)
        );
    }

    #[tokio::test]
    async fn success_holds_host_lock_around_call() {
        let (executor, runner, journal) = executor(vec![]);
        let cluster = cluster("createservice", "asm");

        executor
            .run(
                &cluster,
                &step(steps::CREATE_VM),
                &StepList::default(),
                OedaRequest::forward(SubOperation::CreateVm),
            )
            .await
            .unwrap();

        assert_eq!(*journal.lock(), vec!["acquire", "run", "release"]);
        assert_eq!(runner.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn without_host_lock_skips_locking() {
        let (executor, _, journal) = executor(vec![]);
        let cluster = cluster("createservice", "asm");

        executor
            .run(
                &cluster,
                &step(steps::CREATE_STORAGE),
                &StepList::default(),
                OedaRequest::forward(SubOperation::SetupCell).without_host_lock(),
            )
            .await
            .unwrap();

        assert_eq!(*journal.lock(), vec!["run"]);
    }

    #[tokio::test]
    async fn failure_raises_external_tool_failure_and_releases_lock() {
        let (executor, _, journal) = executor(vec![CommandOutput::failure(1, "boom")]);
        let cluster = cluster("createservice", "asm");

        let err = executor
            .run(
                &cluster,
                &step(steps::CREATE_USER),
                &StepList::default(),
                OedaRequest::forward(SubOperation::CreateUser),
            )
            .await
            .unwrap_err();

        assert_matches!(err.kind(), ErrorKind::ExternalToolFailure);
        assert_eq!(err.code(), 0x0411);
        assert_eq!(err.step().unwrap(), steps::CREATE_USER);
        assert_eq!(*journal.lock(), vec!["acquire", "run", "release"]);
    }

    #[tokio::test]
    async fn error_marker_in_output_is_failure() {
        let (executor, _, _) = executor(vec![CommandOutput::success(
            "Step 9\nERROR: Cluster Verification failed\n",
        )]);
        let cluster = cluster("createservice", "asm");

        let err = executor
            .run(
                &cluster,
                &step(steps::INSTALL_CLUSTER),
                &StepList::default(),
                OedaRequest::forward(SubOperation::InstallCluster).without_host_lock(),
            )
            .await
            .unwrap_err();
        assert!(err.message().contains("Cluster Verification failed"));
    }

    #[tokio::test]
    async fn delete_flows_tolerate_failures_outside_vm_deletion() {
        let (executor, _, _) = executor(vec![CommandOutput::failure(1, "gone")]);
        let cluster = cluster("deleteservice", "asm");

        executor
            .run(
                &cluster,
                &step(steps::INSTALL_CLUSTER),
                &StepList::default(),
                OedaRequest::undo(SubOperation::InstallCluster),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn delete_flows_still_fail_vm_deletion() {
        let (executor, _, _) = executor(vec![CommandOutput::failure(1, "busy")]);
        let cluster = cluster("deleteservice", "asm");

        let err = executor
            .run(
                &cluster,
                &step(steps::CREATE_VM),
                &StepList::default(),
                OedaRequest::undo(SubOperation::CreateVm),
            )
            .await
            .unwrap_err();
        assert_matches!(err.kind(), ErrorKind::ExternalToolFailure);
    }

    #[tokio::test]
    async fn skip_fail_logs_instead_of_raising() {
        let (executor, _, _) = executor(vec![CommandOutput::failure(2, "no cluster")]);
        let cluster = cluster("createservice", "asm");

        executor
            .run(
                &cluster,
                &step(steps::INSTALL_CLUSTER),
                &StepList::default(),
                OedaRequest::undo(SubOperation::InitCluster).skip_fail(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn host_lock_contention_prevents_the_call() {
        let (executor, runner, _) = executor_with_lock(vec![], true);
        let cluster = cluster("createservice", "asm");

        let err = executor
            .run(
                &cluster,
                &step(steps::CREATE_VM),
                &StepList::default(),
                OedaRequest::forward(SubOperation::CreateVm),
            )
            .await
            .unwrap_err();
        assert_matches!(err.kind(), ErrorKind::LockContention);
        assert_eq!(err.step().unwrap(), steps::CREATE_VM);
        assert!(runner.calls.lock().is_empty());
    }
}
