use super::{DeployEvent, NotificationChannel};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

pub struct SlackNotifier {
    webhook_url: String,
    client: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            client: reqwest::Client::new(),
        }
    }

    fn format_message(&self, event: &DeployEvent) -> serde_json::Value {
        match event {
            DeployEvent::Started {
                deploy_id,
                target,
                release,
            } => blocks(
                "Deploy Started",
                vec![
                    field("Target", target),
                    field("Release", &format!("`{}`", release)),
                    field("Deploy ID", &format!("`{}`", short_id(deploy_id))),
                ],
                None,
            ),
            DeployEvent::Completed {
                deploy_id,
                target,
                release,
                duration_secs,
            } => blocks(
                "Deploy Complete",
                vec![
                    field("Target", target),
                    field("Release", &format!("`{}`", release)),
                    field("Deploy ID", &format!("`{}`", short_id(deploy_id))),
                    field("Duration", &format!("{}s", duration_secs)),
                ],
                None,
            ),
            DeployEvent::Failed {
                deploy_id,
                target,
                step,
                error,
                rolled_back,
            } => blocks(
                "Deploy Failed",
                vec![
                    field("Target", target),
                    field("Step", &format!("`{}`", step)),
                    field("Deploy ID", &format!("`{}`", short_id(deploy_id))),
                    field("Rolled back", if *rolled_back { "yes" } else { "no" }),
                ],
                Some(format!("*Error:*\n```{}```", error)),
            ),
            DeployEvent::Alerts { alerts } => blocks(
                "Server Alerts",
                vec![field("Count", &alerts.len().to_string())],
                Some(format!("```{}```", alerts.join("\n"))),
            ),
        }
    }
}

fn short_id(id: &str) -> &str {
    &id[..8.min(id.len())]
}

fn field(name: &str, value: &str) -> serde_json::Value {
    json!({
        "type": "mrkdwn",
        "text": format!("*{}:*\n{}", name, value)
    })
}

fn blocks(
    header: &str,
    fields: Vec<serde_json::Value>,
    detail: Option<String>,
) -> serde_json::Value {
    let mut blocks = vec![
        json!({
            "type": "header",
            "text": {
                "type": "plain_text",
                "text": header,
                "emoji": true
            }
        }),
        json!({
            "type": "section",
            "fields": fields
        }),
    ];

    if let Some(text) = detail {
        blocks.push(json!({
            "type": "section",
            "text": {
                "type": "mrkdwn",
                "text": text
            }
        }));
    }

    json!({ "blocks": blocks })
}

#[async_trait]
impl NotificationChannel for SlackNotifier {
    async fn notify(&self, event: DeployEvent) -> Result<()> {
        let payload = self.format_message(&event);
        self.client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::DeployStep;

    fn notifier() -> SlackNotifier {
        SlackNotifier::new("https://hooks.slack.com/services/T/B/X".to_string())
    }

    #[test]
    fn failed_event_includes_error_block() {
        let message = notifier().format_message(&DeployEvent::Failed {
            deploy_id: "0192f0aa-1111-7000-8000-000000000000".to_string(),
            target: "web-02".to_string(),
            step: DeployStep::Unpack,
            error: "tar exited with status 2".to_string(),
            rolled_back: true,
        });

        let blocks = message["blocks"].as_array().unwrap();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0]["text"]["text"], "Deploy Failed");
        assert!(
            blocks[1]["fields"][2]["text"]
                .as_str()
                .unwrap()
                .contains("`0192f0aa`")
        );
        assert!(
            blocks[2]["text"]["text"]
                .as_str()
                .unwrap()
                .contains("tar exited with status 2")
        );
    }

    #[test]
    fn alerts_are_joined_by_line() {
        let message = notifier().format_message(&DeployEvent::Alerts {
            alerts: vec![
                "web-01: High CPU usage: 95%".to_string(),
                "web-02: Nginx service is not running".to_string(),
            ],
        });

        let text = message["blocks"][2]["text"]["text"].as_str().unwrap();
        assert!(text.contains("web-01: High CPU usage: 95%\nweb-02: Nginx"));
    }
}
