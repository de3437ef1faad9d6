use std::path::PathBuf;

use thiserror::Error;

/// Failure kinds surfaced by the deploy and monitor components.
///
/// Component operations return these instead of panicking or propagating
/// transport errors directly; the binary decides how to report them.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to pack {}: {reason}", source_dir.display())]
    Pack { source_dir: PathBuf, reason: String },

    #[error("transfer to {target} failed: {reason}")]
    Transfer { target: String, reason: String },

    #[error("backup of {target} failed: {reason}")]
    Backup { target: String, reason: String },

    #[error("restore of {target} from {} failed: {reason}", path.display())]
    Restore {
        target: String,
        path: PathBuf,
        reason: String,
    },

    #[error("{url} did not become healthy after {attempts} attempt(s)")]
    HealthCheck { url: String, attempts: u32 },

    #[error("request to {url} failed: {reason}")]
    Http { url: String, reason: String },

    #[error("proxy configuration rejected on {target}: {reason}")]
    ConfigPush { target: String, reason: String },

    #[error("metrics collection on {target} failed: {reason}")]
    Metrics { target: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn transfer(target: impl Into<String>, reason: impl ToString) -> Self {
        Self::Transfer {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    pub fn metrics(target: impl Into<String>, reason: impl ToString) -> Self {
        Self::Metrics {
            target: target.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
