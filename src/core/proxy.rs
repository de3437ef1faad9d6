use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{DeployPaths, ProxyConfig, TargetConfig};
use crate::core::remote::{RemoteExecutor, privileged, run_checked};
use crate::error::{Error, Result};

const HEREDOC_MARKER: &str = "HBNB_NGINX_CONF";

/// Pushes the nginx server block that serves the `current` release.
pub struct ProxyConfigurator {
    executor: Arc<dyn RemoteExecutor>,
    proxy: ProxyConfig,
    paths: DeployPaths,
    use_sudo: bool,
}

impl ProxyConfigurator {
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        proxy: ProxyConfig,
        paths: DeployPaths,
        use_sudo: bool,
    ) -> Self {
        Self {
            executor,
            proxy,
            paths,
            use_sudo,
        }
    }

    pub fn render(&self) -> String {
        format!(
            r#"server {{
    listen 80 default_server;
    listen [::]:80 default_server;
    server_name _;

    client_max_body_size {body_size};
    keepalive_timeout {keepalive};

    location {location} {{
        alias {current}/;
        index index.html;
        try_files $uri $uri/ =404;
    }}
}}
"#,
            body_size = self.proxy.client_max_body_size,
            keepalive = self.proxy.keepalive_timeout,
            location = self.proxy.static_location,
            current = self.paths.current.trim_end_matches('/'),
        )
    }

    /// Install the rendered config, keeping the previous one if nginx
    /// rejects it, then reload.
    pub async fn apply(&self, target: &TargetConfig) -> Result<()> {
        info!(target = %target.name, path = %self.proxy.config_path, "Updating nginx configuration");

        let push_error = |reason: String| Error::ConfigPush {
            target: target.name.clone(),
            reason,
        };

        let executor = self.executor.as_ref();
        let live = &self.proxy.config_path;
        let staged = format!(
            "{}/hbnb_nginx.conf",
            self.paths.remote_tmp.trim_end_matches('/')
        );
        let backup = format!("{}.bak", live);
        let sudo = |command: String| privileged(self.use_sudo, &command);

        let write = format!(
            "cat > {} <<'{marker}'\n{}{marker}",
            staged,
            self.render(),
            marker = HEREDOC_MARKER
        );

        run_checked(executor, target, &write)
            .await
            .map_err(|e| push_error(e.to_string()))?;
        run_checked(executor, target, &sudo(format!("cp {} {}", live, backup)))
            .await
            .map_err(|e| push_error(e.to_string()))?;
        run_checked(executor, target, &sudo(format!("mv {} {}", staged, live)))
            .await
            .map_err(|e| push_error(e.to_string()))?;

        let verdict = match executor.run(target, &sudo("nginx -t".to_string())).await {
            Ok(test) if test.success() => Ok(()),
            Ok(test) => Err(format!("nginx -t failed: {}", test.stderr.trim())),
            Err(e) => Err(format!("nginx -t did not run: {}", e)),
        };

        if let Err(reason) = verdict {
            warn!(target = %target.name, reason = %reason, "New nginx configuration not accepted, restoring previous");
            if let Err(e) = run_checked(executor, target, &sudo(format!("mv {} {}", backup, live))).await {
                warn!(target = %target.name, error = %e, "Failed to restore previous nginx configuration");
            }
            return Err(push_error(reason));
        }

        run_checked(executor, target, &sudo("service nginx reload".to_string()))
            .await
            .map_err(|e| push_error(e.to_string()))?;

        info!(target = %target.name, "nginx configuration updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SimulatedExecutor;
    use crate::config::TargetRole;

    fn configurator(sim: &SimulatedExecutor) -> ProxyConfigurator {
        ProxyConfigurator::new(
            Arc::new(sim.clone()),
            ProxyConfig::default(),
            DeployPaths::default(),
            true,
        )
    }

    #[test]
    fn render_aliases_current_release() {
        let sim = SimulatedExecutor::new();
        let conf = configurator(&sim).render();

        assert!(conf.contains("location /hbnb_static {"));
        assert!(conf.contains("alias /data/web_static/current/;"));
        assert!(conf.contains("client_max_body_size 10M;"));
        assert!(conf.contains("keepalive_timeout 65;"));
        assert!(conf.contains("listen [::]:80 default_server;"));
    }

    #[tokio::test]
    async fn rejected_config_is_rolled_back() {
        let sim = SimulatedExecutor::new();
        sim.fail_when("web-01", "nginx -t");
        let target = TargetConfig::new("web-01", "10.0.0.1", TargetRole::Web);

        let result = configurator(&sim).apply(&target).await;

        assert!(matches!(result, Err(Error::ConfigPush { .. })));
        let commands = sim.commands_for("web-01");
        assert_eq!(
            commands.last().map(String::as_str),
            Some("sudo mv /etc/nginx/sites-available/default.bak /etc/nginx/sites-available/default")
        );
        assert!(!commands.iter().any(|c| c.contains("reload")));
    }

    #[tokio::test]
    async fn unreachable_config_test_restores_previous() {
        let sim = SimulatedExecutor::new();
        sim.disconnect_when("web-01", "nginx -t");
        let target = TargetConfig::new("web-01", "10.0.0.1", TargetRole::Web);

        let result = configurator(&sim).apply(&target).await;

        match result {
            Err(Error::ConfigPush { reason, .. }) => assert!(reason.contains("did not run")),
            other => panic!("expected ConfigPush, got {:?}", other),
        }
        let commands = sim.commands_for("web-01");
        assert_eq!(
            commands.last().map(String::as_str),
            Some("sudo mv /etc/nginx/sites-available/default.bak /etc/nginx/sites-available/default")
        );
        assert!(!commands.iter().any(|c| c.contains("reload")));
    }

    #[tokio::test]
    async fn accepted_config_reloads_nginx() {
        let sim = SimulatedExecutor::new();
        let target = TargetConfig::new("web-01", "10.0.0.1", TargetRole::Web);

        configurator(&sim).apply(&target).await.unwrap();

        let commands = sim.commands_for("web-01");
        assert!(commands[0].starts_with("cat > /tmp/hbnb_nginx.conf <<'HBNB_NGINX_CONF'"));
        assert_eq!(commands.last().map(String::as_str), Some("sudo service nginx reload"));
    }
}
