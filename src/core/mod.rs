pub mod archiver;
pub mod backup;
pub mod deployer;
pub mod health;
pub mod models;
pub mod monitor;
pub mod notifications;
pub mod proxy;
pub mod remote;
pub mod retention;

pub use archiver::Archiver;
pub use backup::BackupManager;
pub use deployer::Deployer;
pub use health::{HealthChecker, HealthProbe, ProbeResponse, StaticProbe};
pub use models::{
    BackupRecord, DeployReport, DeployStep, MetricSample, Release, RollbackOutcome, TargetOutcome,
    TargetReport,
};
pub use monitor::{Monitor, MonitorReport, evaluate, save_metrics};
pub use proxy::ProxyConfigurator;
pub use remote::{CommandOutput, RemoteExecutor};
