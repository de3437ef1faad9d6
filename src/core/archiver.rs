use std::path::{Path, PathBuf};

use chrono::Local;
use tokio::process::Command;
use tracing::{info, warn};

use crate::core::models::{Release, unique_timestamped_path};
use crate::core::retention::prune_by_name;
use crate::error::{Error, Result};

pub const RELEASE_PREFIX: &str = "web_static_";

/// Packages the static site into `versions/web_static_<timestamp>.tgz`.
pub struct Archiver {
    versions_dir: PathBuf,
}

impl Archiver {
    pub fn new(versions_dir: impl Into<PathBuf>) -> Self {
        Self {
            versions_dir: versions_dir.into(),
        }
    }

    pub fn versions_dir(&self) -> &Path {
        &self.versions_dir
    }

    pub async fn pack(&self, source_dir: &Path) -> Result<Release> {
        let pack_error = |reason: String| Error::Pack {
            source_dir: source_dir.to_path_buf(),
            reason,
        };

        if !source_dir.is_dir() {
            return Err(pack_error("source directory does not exist".to_string()));
        }

        // `web_static/`, `.` and relative parents all need a concrete basename
        let source = source_dir
            .canonicalize()
            .map_err(|e| pack_error(format!("failed to resolve path: {}", e)))?;
        let (parent, content_root) = match (source.parent(), source.file_name()) {
            (Some(parent), Some(name)) => (parent.to_path_buf(), name.to_string_lossy().into_owned()),
            _ => return Err(pack_error("cannot archive the filesystem root".to_string())),
        };

        tokio::fs::create_dir_all(&self.versions_dir)
            .await
            .map_err(|e| pack_error(format!("failed to create {}: {}", self.versions_dir.display(), e)))?;

        let (archive_path, _) = unique_timestamped_path(
            &self.versions_dir,
            RELEASE_PREFIX,
            ".tgz",
            Local::now().naive_local(),
        );
        let name = archive_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        info!(archive = %archive_path.display(), "Creating archive");

        let output = Command::new("tar")
            .arg("-czf")
            .arg(&archive_path)
            .arg("-C")
            .arg(&parent)
            .arg(&content_root)
            .output()
            .await;

        let failure = match output {
            Ok(out) if out.status.success() && archive_path.is_file() => None,
            Ok(out) => Some(format!(
                "tar exited with {}: {}",
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            )),
            Err(e) => Some(format!("failed to spawn tar: {}", e)),
        };

        if let Some(reason) = failure {
            if archive_path.exists() {
                if let Err(e) = std::fs::remove_file(&archive_path) {
                    warn!(archive = %archive_path.display(), error = %e, "Failed to remove partial archive");
                }
            }
            return Err(pack_error(reason));
        }

        info!(archive = %archive_path.display(), "Archive created");

        Ok(Release {
            name,
            source_dir: source_dir.to_path_buf(),
            archive_path,
            content_root,
        })
    }

    /// Open an existing archive as a release, for redeploying an old version.
    ///
    /// The content root is read from the archive's first entry.
    pub async fn open(&self, archive_path: &Path) -> Result<Release> {
        let pack_error = |reason: String| Error::Pack {
            source_dir: archive_path.to_path_buf(),
            reason,
        };

        if !archive_path.is_file() {
            return Err(pack_error("archive not found".to_string()));
        }

        let file_name = archive_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = file_name
            .strip_suffix(".tgz")
            .or_else(|| file_name.strip_suffix(".tar.gz"))
            .ok_or_else(|| pack_error("expected a .tgz archive".to_string()))?
            .to_string();

        let output = Command::new("tar")
            .arg("-tzf")
            .arg(archive_path)
            .output()
            .await
            .map_err(|e| pack_error(format!("failed to spawn tar: {}", e)))?;
        if !output.status.success() {
            return Err(pack_error(format!("tar could not list archive: {}", output.status)));
        }

        let listing = String::from_utf8_lossy(&output.stdout);
        let content_root = listing
            .lines()
            .filter_map(|line| line.trim_start_matches("./").split('/').next())
            .find(|root| !root.is_empty())
            .ok_or_else(|| pack_error("archive is empty".to_string()))?
            .to_string();

        Ok(Release {
            name,
            source_dir: PathBuf::new(),
            archive_path: archive_path.to_path_buf(),
            content_root,
        })
    }

    /// Keep the `keep` newest release archives.
    pub fn prune(&self, keep: usize) -> Result<Vec<PathBuf>> {
        prune_by_name(&self.versions_dir, RELEASE_PREFIX, keep)
    }
}
