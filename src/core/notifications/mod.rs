mod slack;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use crate::config::{NotificationChannelType, NotificationConfig};
use crate::core::models::DeployStep;

/// Events that trigger notifications
#[derive(Debug, Clone)]
pub enum DeployEvent {
    Started {
        deploy_id: String,
        target: String,
        release: String,
    },
    Completed {
        deploy_id: String,
        target: String,
        release: String,
        duration_secs: u64,
    },
    Failed {
        deploy_id: String,
        target: String,
        step: DeployStep,
        error: String,
        rolled_back: bool,
    },
    Alerts {
        alerts: Vec<String>,
    },
}

/// Trait for notification channel implementations (Slack, Discord, etc.)
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn notify(&self, event: DeployEvent) -> Result<()>;
}

/// Factory function to create a notifier based on config
pub fn create_notifier(config: &NotificationConfig) -> Option<Arc<dyn NotificationChannel>> {
    match &config.channel {
        NotificationChannelType::None => None,
        NotificationChannelType::Slack => {
            let webhook = config.slack_webhook.as_ref()?;
            if webhook.is_empty() {
                return None;
            }
            Some(Arc::new(slack::SlackNotifier::new(webhook.clone())))
        }
    }
}

/// Send through the optional notifier; delivery failures are only logged.
pub async fn dispatch(notifier: Option<&Arc<dyn NotificationChannel>>, event: DeployEvent) {
    if let Some(notifier) = notifier {
        if let Err(e) = notifier.notify(event).await {
            warn!(error = %e, "Failed to send notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_channel_means_no_notifier() {
        assert!(create_notifier(&NotificationConfig::default()).is_none());
    }

    #[test]
    fn slack_without_webhook_is_disabled() {
        let config = NotificationConfig {
            channel: NotificationChannelType::Slack,
            slack_webhook: Some(String::new()),
        };
        assert!(create_notifier(&config).is_none());
    }

    #[test]
    fn slack_with_webhook_is_enabled() {
        let config = NotificationConfig {
            channel: NotificationChannelType::Slack,
            slack_webhook: Some("https://hooks.slack.com/services/T/B/X".to_string()),
        };
        assert!(create_notifier(&config).is_some());
    }
}
