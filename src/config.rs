//! Deployment configuration.
//!
//! Built once at startup by layering, lowest precedence first: compiled-in
//! defaults, the TOML config file, `HBNB_`-prefixed environment variables,
//! and command-line overrides.

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_CONFIG_PATH: &str = "deploy.toml";
const ENV_PREFIX: &str = "HBNB_";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    /// Local directory packaged into each release.
    pub source_dir: PathBuf,
    pub versions_dir: PathBuf,
    pub backups_dir: PathBuf,
    pub metrics_dir: PathBuf,
    /// Use the in-memory executor instead of ssh.
    pub simulation: bool,
    pub verbose: bool,
    pub json_logs: bool,
    pub paths: DeployPaths,
    pub proxy: ProxyConfig,
    pub deployment: DeploymentSettings,
    pub notifications: NotificationConfig,
    pub logging: LogFileConfig,
    /// Deployment order is the order of this list.
    pub targets: Vec<TargetConfig>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TargetRole {
    Web,
    LoadBalancer,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetConfig {
    pub name: String,
    pub host: String,
    pub user: String,
    pub key_file: PathBuf,
    pub role: TargetRole,
}

impl TargetConfig {
    /// A target using the default `ubuntu` account and key file.
    pub fn new(name: &str, host: &str, role: TargetRole) -> Self {
        Self {
            name: name.to_string(),
            host: host.to_string(),
            user: "ubuntu".to_string(),
            key_file: PathBuf::from("~/.ssh/id_rsa"),
            role,
        }
    }

    pub fn is_web(&self) -> bool {
        self.role == TargetRole::Web
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.host)
    }

    /// `user:user`, the owner applied to deployed trees and backups.
    pub fn owner(&self) -> String {
        format!("{0}:{0}", self.user)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeployPaths {
    pub web_static: String,
    pub releases: String,
    pub current: String,
    pub remote_tmp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProxyConfig {
    /// Push the server block during every deploy.
    pub enabled: bool,
    pub config_path: String,
    pub static_location: String,
    pub client_max_body_size: String,
    pub keepalive_timeout: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentSettings {
    pub keep_releases: usize,
    pub backup_before_deploy: bool,
    pub health_check_timeout_secs: u64,
    pub health_check_path: String,
    pub health_check_attempts: u32,
    pub health_check_delay_secs: u64,
    /// Only disable for development hosts with self-signed certificates.
    pub verify_tls: bool,
    pub use_sudo: bool,
    pub command_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannelType {
    #[default]
    None,
    Slack,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NotificationConfig {
    pub channel: NotificationChannelType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slack_webhook: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogRotation {
    Hourly,
    #[default]
    Daily,
    Never,
}

/// Persistent deploy log, written alongside console output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogFileConfig {
    pub enabled: bool,
    /// Active file; rotated files get a date suffix in the same directory.
    pub file: PathBuf,
    pub rotation: LogRotation,
    /// Rotated files kept before the oldest is deleted.
    pub max_files: usize,
}

impl Default for LogFileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            file: PathBuf::from("logs/hbnb-deploy.log"),
            rotation: LogRotation::Daily,
            max_files: 5,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("web_static"),
            versions_dir: PathBuf::from("versions"),
            backups_dir: PathBuf::from("backups"),
            metrics_dir: PathBuf::from("metrics"),
            simulation: false,
            verbose: false,
            json_logs: false,
            paths: DeployPaths::default(),
            proxy: ProxyConfig::default(),
            deployment: DeploymentSettings::default(),
            notifications: NotificationConfig::default(),
            logging: LogFileConfig::default(),
            targets: vec![
                TargetConfig::new("web-01", "52.71.25.46", TargetRole::Web),
                TargetConfig::new("web-02", "54.86.41.67", TargetRole::Web),
                TargetConfig::new("lb-01", "54.235.237.101", TargetRole::LoadBalancer),
            ],
        }
    }
}

impl Default for DeployPaths {
    fn default() -> Self {
        Self {
            web_static: "/data/web_static".to_string(),
            releases: "/data/web_static/releases".to_string(),
            current: "/data/web_static/current".to_string(),
            remote_tmp: "/tmp".to_string(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            config_path: "/etc/nginx/sites-available/default".to_string(),
            static_location: "/hbnb_static".to_string(),
            client_max_body_size: "10M".to_string(),
            keepalive_timeout: 65,
        }
    }
}

impl Default for DeploymentSettings {
    fn default() -> Self {
        Self {
            keep_releases: 5,
            backup_before_deploy: true,
            health_check_timeout_secs: 30,
            health_check_path: "/hbnb_static/0-index.html".to_string(),
            health_check_attempts: 5,
            health_check_delay_secs: 5,
            verify_tls: true,
            use_sudo: true,
            command_timeout_secs: 300,
        }
    }
}

impl AppConfig {
    /// Load the layered configuration.
    ///
    /// A missing config file is not an error; defaults apply. `overrides` is
    /// any serializable set of CLI values, with unset fields skipped.
    pub fn new<T: Serialize>(config_path: Option<&Path>, overrides: Option<&T>) -> Result<Self> {
        let path = config_path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));

        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        if let Some(overrides) = overrides {
            figment = figment.merge(Serialized::defaults(overrides));
        }

        let config: AppConfig = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.deployment.health_check_attempts == 0 {
            return Err(Error::Config(
                "deployment.health_check_attempts must be at least 1".to_string(),
            ));
        }

        if self.logging.enabled {
            if self.logging.file.file_name().is_none() {
                return Err(Error::Config(format!(
                    "logging.file must name a file: {}",
                    self.logging.file.display()
                )));
            }
            if self.logging.max_files == 0 {
                return Err(Error::Config(
                    "logging.max_files must be at least 1".to_string(),
                ));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for target in &self.targets {
            if target.name.is_empty() || target.host.is_empty() {
                return Err(Error::Config(
                    "every target needs a name and a host".to_string(),
                ));
            }
            if !seen.insert(target.name.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate target name: {}",
                    target.name
                )));
            }
        }

        if self.notifications.channel == NotificationChannelType::Slack
            && self
                .notifications
                .slack_webhook
                .as_deref()
                .is_none_or(str::is_empty)
        {
            return Err(Error::Config(
                "notifications.slack_webhook is required for the slack channel".to_string(),
            ));
        }

        Ok(())
    }

    pub fn web_targets(&self) -> impl Iterator<Item = &TargetConfig> {
        self.targets.iter().filter(|t| t.is_web())
    }

    pub fn target(&self, name: &str) -> Option<&TargetConfig> {
        self.targets.iter().find(|t| t.name == name)
    }

    /// Write this configuration as TOML, creating parent directories.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[derive(Serialize)]
    struct Overrides {
        #[serde(skip_serializing_if = "Option::is_none")]
        simulation: Option<bool>,
    }

    #[test]
    fn defaults_have_two_web_targets_and_a_balancer() {
        let config = AppConfig::default();
        let web: Vec<_> = config.web_targets().map(|t| t.name.as_str()).collect();
        assert_eq!(web, vec!["web-01", "web-02"]);
        assert_eq!(config.targets[2].role, TargetRole::LoadBalancer);
    }

    #[test]
    fn file_values_and_overrides_are_layered() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("deploy.toml");
        std::fs::write(
            &path,
            r#"
source_dir = "site"

[deployment]
keep_releases = 2
"#,
        )
        .unwrap();

        let overrides = Overrides {
            simulation: Some(true),
        };
        let config = AppConfig::new(Some(&path), Some(&overrides)).unwrap();

        assert_eq!(config.source_dir, PathBuf::from("site"));
        assert_eq!(config.deployment.keep_releases, 2);
        assert_eq!(config.deployment.health_check_attempts, 5);
        assert!(config.simulation);
    }

    #[test]
    fn unset_overrides_keep_file_values() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("deploy.toml");
        std::fs::write(&path, "simulation = true\n").unwrap();

        let overrides = Overrides { simulation: None };
        let config = AppConfig::new(Some(&path), Some(&overrides)).unwrap();
        assert!(config.simulation);
    }

    #[test]
    fn written_config_loads_back() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("conf/deploy.toml");

        let mut config = AppConfig::default();
        config.deployment.keep_releases = 3;
        config.write_to(&path).unwrap();

        let loaded = AppConfig::new(Some(&path), None::<&Overrides>).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn logging_section_is_read_from_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("deploy.toml");
        std::fs::write(
            &path,
            r#"
[logging]
file = "/var/log/hbnb/deploy.log"
rotation = "hourly"
max_files = 10
"#,
        )
        .unwrap();

        let config = AppConfig::new(Some(&path), None::<&Overrides>).unwrap();

        assert!(config.logging.enabled);
        assert_eq!(config.logging.file, PathBuf::from("/var/log/hbnb/deploy.log"));
        assert_eq!(config.logging.rotation, LogRotation::Hourly);
        assert_eq!(config.logging.max_files, 10);
    }

    #[test]
    fn enabled_log_file_needs_retention() {
        let mut config = AppConfig::default();
        config.logging.max_files = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.logging.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn duplicate_target_names_are_rejected() {
        let mut config = AppConfig::default();
        config.targets[1].name = "web-01".to_string();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn slack_channel_requires_webhook() {
        let mut config = AppConfig::default();
        config.notifications.channel = NotificationChannelType::Slack;
        assert!(config.validate().is_err());

        config.notifications.slack_webhook = Some("https://hooks.example/x".to_string());
        assert!(config.validate().is_ok());
    }
}
