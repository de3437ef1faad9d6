//! Logging and tracing initialization.
//!
//! Console output is human readable by default; `--json-logs` switches to one
//! JSON object per event for log shipping. When `[logging]` is enabled every
//! event is also appended to a rotating file, which is the deploy audit trail.

use std::path::Path;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::{AppConfig, LogFileConfig, LogRotation};
use crate::error::{Error, Result};

#[derive(Debug, Default, Clone)]
pub struct LogConfig {
    /// Output console logs as JSON
    pub json: bool,
    /// Default level DEBUG instead of INFO
    pub verbose: bool,
    /// Rotating log file, if any
    pub file: Option<LogFileConfig>,
}

impl From<&AppConfig> for LogConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            json: config.json_logs,
            verbose: config.verbose,
            file: config
                .logging
                .enabled
                .then(|| config.logging.clone()),
        }
    }
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held until
/// the process exits. `RUST_LOG` overrides the level for every output.
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(config.verbose)));

    let (file_layer, guard) = match &config.file {
        Some(file) => {
            let (writer, guard) = tracing_appender::non_blocking(file_appender(file)?);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let json_layer = config.json.then(|| {
        fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_target(true)
    });
    let text_layer = (!config.json).then(|| {
        fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

/// Open the rolling appender for `config.file`, creating its directory.
fn file_appender(config: &LogFileConfig) -> Result<RollingFileAppender> {
    let file_name = config
        .file
        .file_name()
        .ok_or_else(|| {
            Error::Config(format!(
                "logging.file must name a file: {}",
                config.file.display()
            ))
        })?
        .to_string_lossy()
        .into_owned();
    let dir = config
        .file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    std::fs::create_dir_all(dir)?;

    RollingFileAppender::builder()
        .rotation(rotation(config.rotation))
        .filename_prefix(file_name)
        .max_log_files(config.max_files)
        .build(dir)
        .map_err(|e| {
            Error::Config(format!(
                "failed to open log file {}: {}",
                config.file.display(),
                e
            ))
        })
}

fn rotation(rotation: LogRotation) -> Rotation {
    match rotation {
        LogRotation::Hourly => Rotation::HOURLY,
        LogRotation::Daily => Rotation::DAILY,
        LogRotation::Never => Rotation::NEVER,
    }
}

fn default_directive(verbose: bool) -> String {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    format!("hbnb_deploy={}", level.as_str().to_lowercase())
}
