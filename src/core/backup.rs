use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use tracing::{info, warn};

use crate::config::{DeployPaths, TargetConfig};
use crate::core::models::{BackupRecord, TIMESTAMP_FORMAT, unique_timestamped_path};
use crate::core::remote::{RemoteExecutor, privileged, run_checked};
use crate::core::retention::prune_by_name;
use crate::error::{Error, Result};

pub const BACKUP_PREFIX: &str = "backup_";

/// Snapshots a target's deployed tree into `backups/` and restores it.
pub struct BackupManager {
    executor: Arc<dyn RemoteExecutor>,
    paths: DeployPaths,
    backups_dir: PathBuf,
    use_sudo: bool,
}

impl BackupManager {
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        paths: DeployPaths,
        backups_dir: impl Into<PathBuf>,
        use_sudo: bool,
    ) -> Self {
        Self {
            executor,
            paths,
            backups_dir: backups_dir.into(),
            use_sudo,
        }
    }

    pub fn backups_dir(&self) -> &Path {
        &self.backups_dir
    }

    fn sudo(&self, command: &str) -> String {
        privileged(self.use_sudo, command)
    }

    /// Archive the remote deploy root and download it to
    /// `backups/backup_<target>_<timestamp>.tgz`.
    pub async fn create_backup(&self, target: &TargetConfig) -> Result<BackupRecord> {
        info!(target = %target.name, "Creating backup");

        self.try_create_backup(target).await.map_err(|e| {
            warn!(target = %target.name, error = %e, "Backup failed");
            Error::Backup {
                target: target.name.clone(),
                reason: e.to_string(),
            }
        })
    }

    async fn try_create_backup(&self, target: &TargetConfig) -> Result<BackupRecord> {
        let executor = self.executor.as_ref();
        let root = &self.paths.web_static;
        let remote_archive = format!(
            "{}/{}{}.tgz",
            self.paths.remote_tmp.trim_end_matches('/'),
            BACKUP_PREFIX,
            target.name
        );

        run_checked(executor, target, &format!("test -d {}", root)).await?;
        run_checked(
            executor,
            target,
            &self.sudo(&format!("tar -czf {} {}", remote_archive, root)),
        )
        .await?;
        run_checked(
            executor,
            target,
            &self.sudo(&format!("chown {} {}", target.owner(), remote_archive)),
        )
        .await?;

        tokio::fs::create_dir_all(&self.backups_dir).await?;
        let (path, created_at) = unique_timestamped_path(
            &self.backups_dir,
            &format!("{}{}_", BACKUP_PREFIX, target.name),
            ".tgz",
            Local::now().naive_local(),
        );

        executor.download(target, &remote_archive, &path).await?;

        if let Err(e) = run_checked(executor, target, &format!("rm -f {}", remote_archive)).await {
            warn!(target = %target.name, error = %e, "Failed to remove remote backup archive");
        }

        info!(target = %target.name, path = %path.display(), "Backup created");

        Ok(BackupRecord {
            target: target.name.clone(),
            path,
            created_at,
        })
    }

    /// Put a local backup back in place on `target`.
    ///
    /// Stops nginx while the tree is replaced. Best-effort: the caller decides
    /// what to do with a failure, nothing here is retried.
    pub async fn restore_backup(&self, target: &TargetConfig, backup_path: &Path) -> Result<()> {
        let restore_error = |reason: String| Error::Restore {
            target: target.name.clone(),
            path: backup_path.to_path_buf(),
            reason,
        };

        if !backup_path.is_file() {
            return Err(restore_error("backup file not found".to_string()));
        }

        info!(target = %target.name, path = %backup_path.display(), "Restoring backup");

        self.try_restore(target, backup_path).await.map_err(|e| {
            warn!(target = %target.name, error = %e, "Restore failed");
            restore_error(e.to_string())
        })?;

        info!(target = %target.name, "Backup restored");
        Ok(())
    }

    async fn try_restore(&self, target: &TargetConfig, backup_path: &Path) -> Result<()> {
        let executor = self.executor.as_ref();
        let root = &self.paths.web_static;
        let file_name = backup_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}{}.tgz", BACKUP_PREFIX, target.name));
        let remote_archive = format!(
            "{}/{}",
            self.paths.remote_tmp.trim_end_matches('/'),
            file_name
        );

        executor
            .upload(target, backup_path, &self.paths.remote_tmp)
            .await?;

        run_checked(executor, target, &self.sudo("service nginx stop")).await?;
        run_checked(executor, target, &self.sudo(&format!("rm -rf {}", root))).await?;
        run_checked(
            executor,
            target,
            &self.sudo(&format!("tar -xzf {} -C /", remote_archive)),
        )
        .await?;
        run_checked(
            executor,
            target,
            &self.sudo(&format!("chown -R {} {}", target.owner(), root)),
        )
        .await?;
        run_checked(executor, target, &self.sudo("service nginx start")).await?;

        if let Err(e) = run_checked(executor, target, &format!("rm -f {}", remote_archive)).await {
            warn!(target = %target.name, error = %e, "Failed to remove uploaded backup");
        }

        Ok(())
    }

    /// Keep the `keep` newest local backups across all targets.
    pub fn cleanup_old_backups(&self, keep: usize) -> Result<Vec<PathBuf>> {
        prune_by_name(&self.backups_dir, BACKUP_PREFIX, keep)
    }

    /// Most recent local backup taken from `target`.
    pub fn latest_backup(&self, target: &str) -> Result<Option<PathBuf>> {
        if !self.backups_dir.exists() {
            return Ok(None);
        }

        let prefix = format!("{}{}_", BACKUP_PREFIX, target);
        let latest = std::fs::read_dir(&self.backups_dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| {
                name.strip_prefix(&prefix)
                    .and_then(|rest| rest.strip_suffix(".tgz"))
                    .is_some_and(is_timestamp)
            })
            .max();

        Ok(latest.map(|name| self.backups_dir.join(name)))
    }
}

fn is_timestamp(s: &str) -> bool {
    chrono::NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SimulatedExecutor;
    use tempfile::tempdir;

    fn manager(sim: &SimulatedExecutor, dir: &Path) -> BackupManager {
        BackupManager::new(Arc::new(sim.clone()), DeployPaths::default(), dir, true)
    }

    #[test]
    fn latest_backup_matches_exact_target_name() {
        let temp = tempdir().unwrap();
        for name in [
            "backup_web_20240101000000.tgz",
            "backup_web_x_20250101000000.tgz",
            "backup_web_20240301000000.tgz",
        ] {
            std::fs::write(temp.path().join(name), b"x").unwrap();
        }

        let sim = SimulatedExecutor::new();
        let latest = manager(&sim, temp.path()).latest_backup("web").unwrap();

        assert_eq!(
            latest,
            Some(temp.path().join("backup_web_20240301000000.tgz"))
        );
    }

    #[tokio::test]
    async fn create_backup_downloads_into_backups_dir() {
        let temp = tempdir().unwrap();
        let sim = SimulatedExecutor::new();
        let target = crate::config::TargetConfig::new(
            "web-01",
            "10.0.0.1",
            crate::config::TargetRole::Web,
        );

        let record = manager(&sim, temp.path())
            .create_backup(&target)
            .await
            .unwrap();

        assert!(record.path.starts_with(temp.path()));
        assert!(record.path.exists());
        let commands = sim.commands_for("web-01");
        assert_eq!(commands[0], "test -d /data/web_static");
        assert!(commands[1].starts_with("sudo tar -czf /tmp/backup_web-01.tgz"));
        assert_eq!(commands[2], "sudo chown ubuntu:ubuntu /tmp/backup_web-01.tgz");
    }

    #[tokio::test]
    async fn missing_remote_root_fails_backup() {
        let temp = tempdir().unwrap();
        let sim = SimulatedExecutor::new();
        sim.fail_when("web-01", "test -d");
        let target = crate::config::TargetConfig::new(
            "web-01",
            "10.0.0.1",
            crate::config::TargetRole::Web,
        );

        let result = manager(&sim, temp.path()).create_backup(&target).await;

        assert!(matches!(result, Err(Error::Backup { .. })));
        assert_eq!(sim.calls().len(), 1);
    }
}
