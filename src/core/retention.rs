use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::Result;

/// Delete all but the `keep` newest files in `dir` whose name starts with
/// `prefix`.
///
/// Age comes from the timestamp after the last `_` in the name, not from the
/// whole name, so `backup_web-01_*` and `backup_web-02_*` interleave by time.
/// Ties break by name; names without a timestamp rank oldest. A missing
/// directory counts as empty. Returns the deleted paths.
pub fn prune_by_name(dir: &Path, prefix: &str, keep: usize) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut names: Vec<String> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with(prefix))
        .collect();

    names.sort_unstable_by(|a, b| {
        (embedded_timestamp(b), b.as_str()).cmp(&(embedded_timestamp(a), a.as_str()))
    });

    let mut removed = Vec::new();
    for name in names.into_iter().skip(keep) {
        let path = dir.join(&name);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!(path = %path.display(), "Removed old archive");
                removed.push(path);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove old archive"),
        }
    }

    Ok(removed)
}

/// Digits following the last `_`, e.g. `20240101000001` in
/// `backup_web-01_20240101000001.tgz`.
fn embedded_timestamp(name: &str) -> Option<u64> {
    let tail = name.rsplit('_').next()?;
    let digits = tail
        .find(|c: char| !c.is_ascii_digit())
        .map_or(tail, |end| &tail[..end]);
    digits.parse().ok()
}
