use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::core::remote::RemoteExecutor;

mod simulated;
mod ssh;

pub use simulated::{RecordedCall, SimulatedExecutor};
pub use ssh::SshExecutor;

pub fn get_executor(simulation: bool, command_timeout: Duration) -> Arc<dyn RemoteExecutor> {
    if simulation {
        info!("(Simulator) Remote commands are recorded, not executed");
        let executor = SimulatedExecutor::new();
        seed_metric_responses(&executor);
        return Arc::new(executor);
    }

    Arc::new(SshExecutor::new(command_timeout))
}

/// Plausible command output so `monitor` has something to parse in simulation.
fn seed_metric_responses(executor: &SimulatedExecutor) {
    executor.respond_with("Cpu(s)", "12.5");
    executor.respond_with(
        "free -m",
        "Mem:           7977        2311        3120         180        2545        5191",
    );
    executor.respond_with("df -h /", "/dev/root        49G   21G   28G  43% /");
    executor.respond_with("systemctl is-active", "active");
    executor.respond_with("/proc/loadavg", "0.35 0.28 0.22 1/211 4321");
    executor.respond_with("netstat -an", "7");
}
