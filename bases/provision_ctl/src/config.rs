// bases/provision_ctl/src/config.rs
use clap::Parser;
use cluster_context::JobOptions;
use color_eyre::eyre::{eyre, WrapErr};
use provisioning_primitives::StepList;
use std::path::{Path, PathBuf};

/// Execution mode for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Log every remote command instead of running it
    DryRun,
    /// Actually run commands against the cluster
    Apply,
}

/// provision_ctl configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub cluster_path: PathBuf,

    /// Explicit step list; the whole selected pipeline when absent
    pub steps: Option<StepList>,

    pub undo: bool,
    pub ledger_path: Option<PathBuf>,
    pub settings_path: Option<PathBuf>,
    pub payload_path: Option<PathBuf>,
    pub lock_dir: PathBuf,
    pub hook_dir: PathBuf,
    pub ssh_user: Option<String>,
    pub show_pipeline: bool,
    pub json_progress: bool,

    /// Execution mode (DryRun or Apply)
    pub execution_mode: ExecutionMode,
}

/// Provision or tear down a VM cluster step by step
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Cluster descriptor (JSON)
    #[arg(long)]
    pub cluster: PathBuf,

    /// Comma separated step names, e.g. ESTP_PREVM_CHECKS,ESTP_CREATE_VM
    #[arg(long)]
    pub steps: Option<String>,

    /// Undo the listed steps, in the order given
    ///
    /// Without --steps the selected pipeline is undone newest step first.
    #[arg(long)]
    pub undo: bool,

    /// Image ledger (JSON) for gold-image and base DB provisioning
    #[arg(long)]
    pub ledger: Option<PathBuf>,

    /// Provisioning tool settings (JSON)
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Job payload (JSON), e.g. user-ID mappings
    #[arg(long)]
    pub payload: Option<PathBuf>,

    /// Shared directory holding remote lock records
    /// (defaults: a temp directory in check mode, /var/lib/provision_ctl/locks in apply mode)
    #[arg(long)]
    pub lock_dir: Option<PathBuf>,

    /// Directory of host-side hook scripts
    #[arg(long, default_value = "/opt/provision_ctl/hooks")]
    pub hook_dir: PathBuf,

    /// User for ssh connections to cluster hosts
    #[arg(long)]
    pub ssh_user: Option<String>,

    /// Print the selected pipeline table and exit
    #[arg(long)]
    pub show_pipeline: bool,

    /// Print progress events as JSON lines on stdout
    #[arg(long)]
    pub json_progress: bool,

    /// Actually run commands against the cluster (DANGEROUS!)
    ///
    /// By default provision_ctl runs in --check mode which only logs the commands.
    #[arg(long, alias = "danger")]
    pub apply: bool,

    /// Check mode (dry run) - log what would be run without touching any host
    ///
    /// This is the DEFAULT mode.
    #[arg(long, conflicts_with = "apply")]
    pub check: bool,
}

impl Config {
    /// Create configuration from CLI arguments
    pub fn from_args(args: CliArgs) -> Self {
        let execution_mode = if args.apply {
            ExecutionMode::Apply
        } else {
            ExecutionMode::DryRun
        };

        let lock_dir = args.lock_dir.unwrap_or_else(|| match execution_mode {
            ExecutionMode::Apply => PathBuf::from("/var/lib/provision_ctl/locks"),
            ExecutionMode::DryRun => std::env::temp_dir().join("provision_ctl-locks"),
        });

        Self {
            cluster_path: args.cluster,
            steps: args
                .steps
                .as_deref()
                .map(StepList::parse)
                .filter(|list| !list.is_empty()),
            undo: args.undo,
            ledger_path: args.ledger,
            settings_path: args.settings,
            payload_path: args.payload,
            lock_dir,
            hook_dir: args.hook_dir,
            ssh_user: args.ssh_user,
            show_pipeline: args.show_pipeline,
            json_progress: args.json_progress,
            execution_mode,
        }
    }

    pub fn is_check_mode(&self) -> bool {
        self.execution_mode == ExecutionMode::DryRun
    }

    pub fn is_apply_mode(&self) -> bool {
        self.execution_mode == ExecutionMode::Apply
    }

    /// Job options from the payload file, if one was given.
    pub fn job_options(&self) -> color_eyre::Result<JobOptions> {
        let payload = match &self.payload_path {
            Some(path) => read_payload(path)?,
            None => serde_json::Value::Null,
        };
        Ok(JobOptions {
            undo: self.undo,
            payload,
        })
    }
}

fn read_payload(path: &Path) -> color_eyre::Result<serde_json::Value> {
    let json = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("cannot read payload {}", path.display()))?;
    let payload: serde_json::Value = serde_json::from_str(&json)
        .wrap_err_with(|| format!("invalid payload {}", path.display()))?;
    if !payload.is_object() {
        return Err(eyre!("payload {} must be a JSON object", path.display()));
    }
    Ok(payload)
}
