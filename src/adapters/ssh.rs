use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::config::TargetConfig;
use crate::core::remote::{CommandOutput, RemoteExecutor};
use crate::error::{Error, Result};

const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Executes commands through the system `ssh` and `scp` binaries.
pub struct SshExecutor {
    command_timeout: Duration,
}

impl SshExecutor {
    pub fn new(command_timeout: Duration) -> Self {
        Self { command_timeout }
    }

    fn common_args(target: &TargetConfig) -> Vec<String> {
        vec![
            "-i".to_string(),
            expand_home(&target.key_file).display().to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", CONNECT_TIMEOUT_SECS),
        ]
    }

    fn destination(target: &TargetConfig) -> String {
        format!("{}@{}", target.user, target.host)
    }

    async fn execute(&self, target: &TargetConfig, mut cmd: Command) -> Result<CommandOutput> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| Error::transfer(&target.name, format!("failed to spawn: {}", e)))?;

        let output = tokio::time::timeout(self.command_timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                Error::transfer(
                    &target.name,
                    format!("timed out after {}s", self.command_timeout.as_secs()),
                )
            })?
            .map_err(|e| Error::transfer(&target.name, format!("failed to wait: {}", e)))?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            // Killed by a signal has no code
            status: output.status.code().unwrap_or(-1),
        })
    }

    async fn copy(&self, target: &TargetConfig, from: &str, to: &str) -> Result<()> {
        let mut cmd = Command::new("scp");
        cmd.args(Self::common_args(target)).arg("-q").arg(from).arg(to);

        let output = self.execute(target, cmd).await?;
        if !output.success() {
            return Err(Error::transfer(
                &target.name,
                format!(
                    "scp {} -> {} exited with status {}: {}",
                    from,
                    to,
                    output.status,
                    output.stderr.trim()
                ),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(&self, target: &TargetConfig, command: &str) -> Result<CommandOutput> {
        debug!(target = %target.name, host = %target.host, "ssh: {}", command);

        let mut cmd = Command::new("ssh");
        cmd.args(Self::common_args(target))
            .arg(Self::destination(target))
            .arg("--")
            .arg(command);

        self.execute(target, cmd).await
    }

    async fn upload(&self, target: &TargetConfig, local: &Path, remote_dir: &str) -> Result<()> {
        let remote = format!(
            "{}:{}/",
            Self::destination(target),
            remote_dir.trim_end_matches('/')
        );
        self.copy(target, &local.to_string_lossy(), &remote).await
    }

    async fn download(&self, target: &TargetConfig, remote: &str, local: &Path) -> Result<()> {
        let remote = format!("{}:{}", Self::destination(target), remote);
        self.copy(target, &remote, &local.to_string_lossy()).await
    }
}

/// `ssh -i` does not go through a shell, so `~/` must be expanded here.
fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TargetRole;

    #[test]
    fn expands_tilde_key_paths() {
        let Some(home) = std::env::var_os("HOME") else {
            return;
        };
        let expanded = expand_home(Path::new("~/.ssh/id_rsa"));
        assert_eq!(expanded, PathBuf::from(home).join(".ssh/id_rsa"));
        assert_eq!(
            expand_home(Path::new("/etc/keys/deploy")),
            PathBuf::from("/etc/keys/deploy")
        );
    }

    #[test]
    fn destination_is_user_at_host() {
        let target = TargetConfig::new("web-01", "10.0.0.5", TargetRole::Web);
        assert_eq!(SshExecutor::destination(&target), "ubuntu@10.0.0.5");
    }

    #[test]
    fn common_args_force_batch_mode() {
        let target = TargetConfig::new("web-01", "10.0.0.5", TargetRole::Web);
        let args = SshExecutor::common_args(&target);
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert_eq!(args[0], "-i");
    }
}
