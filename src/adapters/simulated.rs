use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use crate::config::TargetConfig;
use crate::core::remote::{CommandOutput, RemoteExecutor};
use crate::error::{Error, Result};

/// A call observed by the simulated executor, in issue order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    Run {
        target: String,
        command: String,
    },
    Upload {
        target: String,
        local: PathBuf,
        remote_dir: String,
    },
    Download {
        target: String,
        remote: String,
        local: PathBuf,
    },
}

impl RecordedCall {
    pub fn target(&self) -> &str {
        match self {
            Self::Run { target, .. } | Self::Upload { target, .. } | Self::Download { target, .. } => {
                target
            }
        }
    }

    /// Text matched against failure rules: the command for `Run`, otherwise
    /// `upload <local>` / `download <remote>`.
    fn describe(&self) -> String {
        match self {
            Self::Run { command, .. } => command.clone(),
            Self::Upload { local, .. } => format!("upload {}", local.display()),
            Self::Download { remote, .. } => format!("download {}", remote),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum FailureKind {
    /// The command ran and exited with status 1.
    Exit,
    /// The executor itself errored, as when the ssh connection drops.
    Transport,
}

struct FailureRule {
    target: Option<String>,
    pattern: String,
    kind: FailureKind,
}

struct Response {
    pattern: String,
    output: CommandOutput,
}

#[derive(Default)]
struct SimState {
    calls: Vec<RecordedCall>,
    failures: Vec<FailureRule>,
    responses: Vec<Response>,
}

/// In-memory executor for simulation mode and tests.
///
/// Every call succeeds with empty output unless a failure rule or a canned
/// response matches. Cloned handles share state, so a test can keep one
/// handle for scripting and inspection while the pipeline owns another.
#[derive(Clone, Default)]
pub struct SimulatedExecutor {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make calls on `target` whose command (or `upload`/`download`
    /// description) contains `pattern` exit with status 1.
    pub fn fail_when(&self, target: &str, pattern: &str) {
        self.add_rule(Some(target), pattern, FailureKind::Exit);
    }

    /// Like [`fail_when`](Self::fail_when) but for every target.
    pub fn fail_everywhere(&self, pattern: &str) {
        self.add_rule(None, pattern, FailureKind::Exit);
    }

    /// Make matching calls on `target` return an executor error instead of
    /// a command status.
    pub fn disconnect_when(&self, target: &str, pattern: &str) {
        self.add_rule(Some(target), pattern, FailureKind::Transport);
    }

    fn add_rule(&self, target: Option<&str>, pattern: &str, kind: FailureKind) {
        self.state().failures.push(FailureRule {
            target: target.map(str::to_string),
            pattern: pattern.to_string(),
            kind,
        });
    }

    /// Reply to commands containing `pattern` with `stdout` and exit status 0.
    pub fn respond_with(&self, pattern: &str, stdout: &str) {
        self.respond_with_status(pattern, stdout, 0);
    }

    pub fn respond_with_status(&self, pattern: &str, stdout: &str, status: i32) {
        self.state().responses.push(Response {
            pattern: pattern.to_string(),
            output: CommandOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
                status,
            },
        });
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state().calls.clone()
    }

    pub fn calls_for(&self, target: &str) -> Vec<RecordedCall> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.target() == target)
            .cloned()
            .collect()
    }

    /// Commands run on `target`, in order.
    pub fn commands_for(&self, target: &str) -> Vec<String> {
        self.calls_for(target)
            .into_iter()
            .filter_map(|c| match c {
                RecordedCall::Run { command, .. } => Some(command),
                _ => None,
            })
            .collect()
    }

    /// Record the call and return the first matching failure rule's kind.
    fn record(&self, call: RecordedCall) -> Option<FailureKind> {
        let mut state = self.state();
        let description = call.describe();
        let failure = state
            .failures
            .iter()
            .find(|rule| {
                rule.target.as_deref().is_none_or(|t| t == call.target())
                    && description.contains(&rule.pattern)
            })
            .map(|rule| rule.kind);
        state.calls.push(call);
        failure
    }
}

#[async_trait]
impl RemoteExecutor for SimulatedExecutor {
    async fn run(&self, target: &TargetConfig, command: &str) -> Result<CommandOutput> {
        debug!(target = %target.name, "(Simulated) {}", command);

        let failure = self.record(RecordedCall::Run {
            target: target.name.clone(),
            command: command.to_string(),
        });

        match failure {
            Some(FailureKind::Exit) => {
                return Ok(CommandOutput {
                    stdout: String::new(),
                    stderr: "simulated failure".to_string(),
                    status: 1,
                });
            }
            Some(FailureKind::Transport) => {
                return Err(Error::transfer(&target.name, "simulated connection loss"));
            }
            None => {}
        }

        let state = self.state();
        let output = state
            .responses
            .iter()
            .find(|r| command.contains(&r.pattern))
            .map(|r| r.output.clone())
            .unwrap_or_default();
        Ok(output)
    }

    async fn upload(&self, target: &TargetConfig, local: &Path, remote_dir: &str) -> Result<()> {
        let failed = self.record(RecordedCall::Upload {
            target: target.name.clone(),
            local: local.to_path_buf(),
            remote_dir: remote_dir.to_string(),
        });

        if failed.is_some() {
            return Err(Error::transfer(&target.name, "simulated upload failure"));
        }
        if !local.exists() {
            return Err(Error::transfer(
                &target.name,
                format!("{} does not exist", local.display()),
            ));
        }
        Ok(())
    }

    /// Writes a placeholder file at `local` so later steps can find it.
    async fn download(&self, target: &TargetConfig, remote: &str, local: &Path) -> Result<()> {
        let failed = self.record(RecordedCall::Download {
            target: target.name.clone(),
            remote: remote.to_string(),
            local: local.to_path_buf(),
        });

        if failed.is_some() {
            return Err(Error::transfer(&target.name, "simulated download failure"));
        }

        tokio::fs::write(local, format!("simulated copy of {}:{}\n", target.host, remote)).await?;
        Ok(())
    }
}
