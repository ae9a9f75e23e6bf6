// bases/provision_ctl/src/main.rs
use clap::Parser;
use cluster_context::{ClusterContext, ClusterDescriptor};
use color_eyre::Result;
use image_ledger::Ledger;
use orchestrator::{ExecutionProgress, Orchestrator};
use provisioning_steps::{select, ProvisioningContext};
use remote_lock::{FileLockService, LockScope, LockService, LockSettings, RemoteLock};
use std::sync::Arc;
use step_executor::{
    CommandRunner, DryRunCommandRunner, OedaExecutor, OedaSettings, ShellCommandRunner,
};
use tokio::sync::mpsc;

mod config;
mod infra;

use config::{Config, ExecutionMode};
use infra::RemoteInfraOps;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "provision_ctl=info,orchestrator=info,provisioning_steps=info,\
                 step_executor=info,remote_lock=info,image_ledger=info"
                    .into()
            }),
        )
        .init();

    let args = config::CliArgs::parse();
    let config = Config::from_args(args);

    if config.is_check_mode() {
        tracing::warn!("🔍 CHECK MODE: commands are logged, no host is touched");
        tracing::warn!("   Use --apply to actually provision the cluster");
    } else {
        tracing::warn!("⚠️  APPLY MODE: Changes WILL be made to the cluster!");
    }

    let cluster = Arc::new(ClusterDescriptor::load(&config.cluster_path)?);
    let pipeline = select(&cluster.variant_flags())?;
    tracing::info!(
        "🧭 Cluster {} ({}) uses the {} pipeline",
        cluster.name(),
        cluster.command().as_str(),
        pipeline.kind
    );

    if config.show_pipeline {
        println!("{}", pipeline.table.to_json()?);
        return Ok(());
    }

    let step_list = match &config.steps {
        Some(steps) => steps.clone(),
        None if config.undo => pipeline.full_step_list().reversed(),
        None => pipeline.full_step_list(),
    };
    let options = config.job_options()?;

    let ledger = match &config.ledger_path {
        Some(path) => Ledger::load(cluster.flavor(), path)?,
        None => Ledger::empty(cluster.flavor()),
    };
    let settings = match &config.settings_path {
        Some(path) => OedaSettings::load(path)?,
        None => OedaSettings::default(),
    };

    let runner: Arc<dyn CommandRunner> = match config.execution_mode {
        ExecutionMode::DryRun => Arc::new(DryRunCommandRunner),
        ExecutionMode::Apply => Arc::new(ShellCommandRunner::new(config.ssh_user.clone())),
    };

    let lock_service: Arc<dyn LockService> = Arc::new(FileLockService::new(&config.lock_dir));
    let owner = format!("{}:{}", cluster.name(), std::process::id());
    let cell_lock = Arc::new(RemoteLock::for_cluster(
        cluster.as_ref(),
        LockScope::Cell,
        lock_service.clone(),
        owner.clone(),
        LockSettings::default(),
    ));
    let host_lock = Arc::new(RemoteLock::for_cluster(
        cluster.as_ref(),
        LockScope::Dom0,
        lock_service,
        owner,
        LockSettings::default(),
    ));

    let executor = Arc::new(OedaExecutor::new(runner.clone(), host_lock, settings));
    let infra = Arc::new(RemoteInfraOps::new(
        runner,
        cluster.clone(),
        config.hook_dir.clone(),
    ));
    let ctx = ProvisioningContext::new(cluster.clone(), ledger, executor, cell_lock, infra);

    let (tx, rx) = mpsc::channel(64);
    let reporter = tokio::spawn(report_progress(rx, config.json_progress));

    let outcome = Orchestrator::new(pipeline)
        .with_progress(tx)
        .execute(&ctx, &options, &step_list)
        .await;
    reporter.await?;

    match outcome {
        Ok(report) => {
            tracing::info!(
                "🎉 {} step(s) {} for cluster {}",
                report.completed.len(),
                if config.undo { "undone" } else { "complete" },
                cluster.name()
            );
            Ok(())
        }
        Err(failure) => {
            if let Some(suggestion) = failure.error.suggestion() {
                tracing::error!("💡 {suggestion}");
            }
            if !failure.rolled_back.is_empty() {
                let undone: Vec<&str> = failure.rolled_back.iter().map(|s| s.as_str()).collect();
                tracing::warn!("↩️  Rolled back: {}", undone.join(", "));
            }
            if let Some(rollback_error) = &failure.rollback_error {
                tracing::error!("🧹 Rollback incomplete, manual cleanup needed: {rollback_error}");
            }
            Err(failure.into())
        }
    }
}

async fn report_progress(mut rx: mpsc::Receiver<ExecutionProgress>, json: bool) {
    while let Some(event) = rx.recv().await {
        if !json {
            tracing::debug!("{event:?}");
            continue;
        }
        match serde_json::to_string(&event) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!("Cannot encode progress event: {e}"),
        }
    }
}
