use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("failed to spawn `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` timed out after {timeout:?}")]
    TimedOut { command: String, timeout: Duration },
}

/// Runs a shell command locally (`host == None`) or on a remote host.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        host: Option<&str>,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError>;
}

/// Runs commands through `/bin/bash`, remote ones through `ssh`.
#[derive(Debug, Clone, Default)]
pub struct ShellCommandRunner {
    ssh_user: Option<String>,
}

impl ShellCommandRunner {
    pub fn new(ssh_user: Option<String>) -> Self {
        Self { ssh_user }
    }

    fn command_for(&self, host: Option<&str>, command: &str) -> Command {
        match host {
            None => {
                let mut cmd = Command::new("/bin/bash");
                cmd.arg("-c").arg(command);
                cmd
            }
            Some(host) => {
                let target = match &self.ssh_user {
                    Some(user) => format!("{user}@{host}"),
                    None => host.to_string(),
                };
                let mut cmd = Command::new("ssh");
                cmd.args(["-o", "BatchMode=yes", "-o", "StrictHostKeyChecking=no"])
                    .arg(target)
                    .arg(command);
                cmd
            }
        }
    }
}

#[async_trait]
impl CommandRunner for ShellCommandRunner {
    async fn run(
        &self,
        host: Option<&str>,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        let mut cmd = self.command_for(host, command);
        cmd.kill_on_drop(true);
        tracing::debug!("Running on {}: {command}", host.unwrap_or("localhost"));

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(result) => result.map_err(|source| CommandError::Spawn {
                command: command.to_string(),
                source,
            })?,
            Err(_) => {
                return Err(CommandError::TimedOut {
                    command: command.to_string(),
                    timeout,
                })
            }
        };

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Logs commands instead of running them; every command succeeds.
#[derive(Debug, Clone, Default)]
pub struct DryRunCommandRunner;

#[async_trait]
impl CommandRunner for DryRunCommandRunner {
    async fn run(
        &self,
        host: Option<&str>,
        command: &str,
        _timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        tracing::info!(
            "🔍 [dry-run] {}: {command}",
            host.unwrap_or("localhost")
        );
        Ok(CommandOutput::success(""))
    }
}
