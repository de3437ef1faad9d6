use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Local, NaiveDateTime};
use serde::Serialize;

/// Second-resolution timestamp embedded in every artifact name.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

pub fn timestamp(at: NaiveDateTime) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// First `<dir>/<prefix><timestamp><suffix>` at or after `now` that does not
/// exist yet, advancing one second at a time.
pub fn unique_timestamped_path(
    dir: &Path,
    prefix: &str,
    suffix: &str,
    now: NaiveDateTime,
) -> (PathBuf, NaiveDateTime) {
    let mut at = now;
    loop {
        let path = dir.join(format!("{}{}{}", prefix, timestamp(at), suffix));
        if !path.exists() {
            return (path, at);
        }
        at += Duration::seconds(1);
    }
}

/// One packaged version of the static content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    /// `web_static_<timestamp>`, also the remote release directory name.
    pub name: String,
    pub source_dir: PathBuf,
    pub archive_path: PathBuf,
    /// Top-level directory inside the archive.
    pub content_root: String,
}

impl Release {
    /// File name of the archive as uploaded, `.tgz` or `.tar.gz`.
    pub fn archive_file_name(&self) -> String {
        self.archive_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.tgz", self.name))
    }
}

/// A local snapshot of a target's deployed tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    pub target: String,
    pub path: PathBuf,
    pub created_at: NaiveDateTime,
}

/// Point-in-time OS metrics for one target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSample {
    pub target: String,
    pub collected_at: DateTime<Local>,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub disk_usage: f64,
    pub nginx_status: bool,
    pub load_average: f64,
    pub active_connections: u64,
    pub response_time: f64,
    pub http_status: u16,
}

/// Per-target deploy states, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployStep {
    Backup,
    Upload,
    Unpack,
    RelocateContent,
    SwapSymlink,
    FixPermissions,
    ReconfigureProxy,
    HealthWait,
}

impl DeployStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backup => "backup",
            Self::Upload => "upload",
            Self::Unpack => "unpack",
            Self::RelocateContent => "relocate_content",
            Self::SwapSymlink => "swap_symlink",
            Self::FixPermissions => "fix_permissions",
            Self::ReconfigureProxy => "reconfigure_proxy",
            Self::HealthWait => "health_wait",
        }
    }
}

impl fmt::Display for DeployStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// Backups disabled, or the failure happened before one was taken.
    NotAttempted,
    Restored(PathBuf),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetOutcome {
    Done,
    Failed {
        step: DeployStep,
        error: String,
        rollback: RollbackOutcome,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetReport {
    pub target: String,
    pub outcome: TargetOutcome,
}

/// Result of one `deploy` run. Targets after the first failure are absent.
#[derive(Debug, Clone)]
pub struct DeployReport {
    pub deploy_id: String,
    pub release: Release,
    pub targets: Vec<TargetReport>,
    /// Web targets configured for this run.
    pub planned: usize,
}

impl DeployReport {
    pub fn succeeded(&self) -> bool {
        self.targets.len() == self.planned
            && self
                .targets
                .iter()
                .all(|t| t.outcome == TargetOutcome::Done)
    }

    pub fn failure(&self) -> Option<&TargetReport> {
        self.targets
            .iter()
            .find(|t| matches!(t.outcome, TargetOutcome::Failed { .. }))
    }
}
