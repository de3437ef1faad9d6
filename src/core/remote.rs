use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::config::TargetConfig;
use crate::error::{Error, Result};

/// Captured result of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Runs shell commands and moves files on a remote host.
///
/// `run` reports non-zero exits through `CommandOutput::status`; an `Err` means
/// the command could not be delivered at all (spawn failure, transport
/// timeout).
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn run(&self, target: &TargetConfig, command: &str) -> Result<CommandOutput>;

    async fn upload(&self, target: &TargetConfig, local: &Path, remote_dir: &str) -> Result<()>;

    async fn download(&self, target: &TargetConfig, remote: &str, local: &Path) -> Result<()>;
}

/// Run a command and treat a non-zero exit as a transfer failure.
///
/// Returns trimmed stdout.
pub async fn run_checked(
    executor: &dyn RemoteExecutor,
    target: &TargetConfig,
    command: &str,
) -> Result<String> {
    debug!(target = %target.name, command = %command, "Running remote command");

    let output = executor.run(target, command).await?;
    if !output.success() {
        let stderr = output.stderr.trim();
        return Err(Error::transfer(
            &target.name,
            format!(
                "`{}` exited with status {}{}",
                command,
                output.status,
                if stderr.is_empty() {
                    String::new()
                } else {
                    format!(": {}", stderr)
                }
            ),
        ));
    }

    Ok(output.stdout.trim().to_string())
}

/// Prefix a command with `sudo` when privileged execution is configured.
pub fn privileged(use_sudo: bool, command: &str) -> String {
    if use_sudo {
        format!("sudo {}", command)
    } else {
        command.to_string()
    }
}
