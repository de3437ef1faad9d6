use std::sync::Arc;
use std::time::Duration;

use crate::adapters;
use crate::config::AppConfig;
use crate::core::health::{HealthChecker, HealthProbe, StaticProbe};
use crate::core::notifications::{NotificationChannel, create_notifier};
use crate::core::remote::RemoteExecutor;
use crate::error::Result;

/// Shared collaborators, built once from the configuration.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub executor: Arc<dyn RemoteExecutor>,
    pub health: Arc<dyn HealthProbe>,
    pub notifier: Option<Arc<dyn NotificationChannel>>,
}

impl AppContext {
    pub fn new(config: AppConfig) -> Result<Self> {
        let settings = &config.deployment;
        let executor =
            adapters::get_executor(config.simulation, Duration::from_secs(settings.command_timeout_secs));

        let health: Arc<dyn HealthProbe> = if config.simulation {
            Arc::new(StaticProbe { healthy: true })
        } else {
            Arc::new(HealthChecker::new(
                settings.health_check_path.clone(),
                Duration::from_secs(settings.health_check_timeout_secs),
                settings.verify_tls,
            )?)
        };

        let notifier = create_notifier(&config.notifications);

        Ok(Self::with_parts(config, executor, health, notifier))
    }

    pub fn with_parts(
        config: AppConfig,
        executor: Arc<dyn RemoteExecutor>,
        health: Arc<dyn HealthProbe>,
        notifier: Option<Arc<dyn NotificationChannel>>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            executor,
            health,
            notifier,
        }
    }
}
