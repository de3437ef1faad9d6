//! OS metrics collection and threshold alerts.
//!
//! Each target is sampled with a fixed battery of shell commands plus one
//! HTTP probe. A sample is all-or-nothing: any command or parse failure drops
//! the whole target for this run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use chrono::Local;
use regex::Regex;
use tracing::{info, warn};

use crate::config::TargetConfig;
use crate::context::AppContext;
use crate::core::models::{MetricSample, unique_timestamped_path};
use crate::core::notifications::{DeployEvent, dispatch};
use crate::core::remote::run_checked;
use crate::error::{Error, Result};

const CPU_THRESHOLD: f64 = 80.0;
const MEMORY_THRESHOLD: f64 = 85.0;
const DISK_THRESHOLD: f64 = 85.0;
const LOAD_THRESHOLD: f64 = 5.0;
const RESPONSE_TIME_THRESHOLD_MS: f64 = 1000.0;

const CPU_COMMAND: &str = "top -bn1 | grep 'Cpu(s)' | awk '{print $2}'";
const MEMORY_COMMAND: &str = "free -m | grep Mem";
const DISK_COMMAND: &str = "df -h / | tail -1";
const NGINX_COMMAND: &str = "systemctl is-active nginx";
const LOAD_COMMAND: &str = "cat /proc/loadavg";
const CONNECTIONS_COMMAND: &str = "netstat -an | grep :80 | wc -l";

pub const METRICS_PREFIX: &str = "metrics_";

static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("number pattern is valid"));

/// Samples collected in one run and the alerts they raised.
#[derive(Debug, Default)]
pub struct MonitorReport {
    pub samples: Vec<MetricSample>,
    pub alerts: Vec<String>,
}

pub struct Monitor {
    ctx: AppContext,
}

impl Monitor {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    pub async fn collect_metrics(&self, target: &TargetConfig) -> Result<MetricSample> {
        let executor = self.ctx.executor.as_ref();
        let fail = |reason: String| Error::metrics(&target.name, reason);

        let cpu = run_checked(executor, target, CPU_COMMAND).await?;
        let cpu_usage = parse_cpu(&cpu).map_err(fail)?;

        let memory = run_checked(executor, target, MEMORY_COMMAND).await?;
        let memory_usage = parse_memory(&memory).map_err(fail)?;

        let disk = run_checked(executor, target, DISK_COMMAND).await?;
        let disk_usage = parse_disk(&disk).map_err(fail)?;

        // `is-active` exits non-zero for inactive units, which is a reading, not a failure
        let nginx = executor.run(target, NGINX_COMMAND).await?;
        let nginx_status = nginx.stdout.trim() == "active";

        let load = run_checked(executor, target, LOAD_COMMAND).await?;
        let load_average = parse_load(&load).map_err(fail)?;

        let connections = run_checked(executor, target, CONNECTIONS_COMMAND).await?;
        let active_connections = parse_connections(&connections).map_err(fail)?;

        let timeout = Duration::from_secs(self.ctx.config.deployment.health_check_timeout_secs);
        let response = self
            .ctx
            .health
            .probe(&target.base_url(), timeout)
            .await
            .map_err(|e| fail(e.to_string()))?;

        Ok(MetricSample {
            target: target.name.clone(),
            collected_at: Local::now(),
            cpu_usage,
            memory_usage,
            disk_usage,
            nginx_status,
            load_average,
            active_connections,
            response_time: round2(response.elapsed_ms()),
            http_status: response.status,
        })
    }

    /// Sample every non-load-balancer target in `targets`.
    ///
    /// Targets that cannot be sampled are logged and skipped.
    pub async fn monitor_all(&self, targets: &[TargetConfig]) -> MonitorReport {
        let mut report = MonitorReport::default();

        for target in targets.iter().filter(|t| t.is_web()) {
            let sample = match self.collect_metrics(target).await {
                Ok(sample) => sample,
                Err(e) => {
                    warn!(target = %target.name, error = %e, "Failed to collect metrics");
                    continue;
                }
            };

            report.alerts.extend(
                evaluate(&sample)
                    .into_iter()
                    .map(|alert| format!("{}: {}", target.name, alert)),
            );
            report.samples.push(sample);
        }

        report
    }

    /// Log alerts and forward them to the notifier.
    pub async fn send_alerts(&self, alerts: &[String]) {
        if alerts.is_empty() {
            return;
        }

        warn!("Alerts generated:\n{}", alerts.join("\n"));
        dispatch(
            self.ctx.notifier.as_ref(),
            DeployEvent::Alerts {
                alerts: alerts.to_vec(),
            },
        )
        .await;
    }
}

/// Apply the fixed thresholds. One alert per violated threshold.
pub fn evaluate(sample: &MetricSample) -> Vec<String> {
    let mut alerts = Vec::new();

    if sample.cpu_usage > CPU_THRESHOLD {
        alerts.push(format!("High CPU usage: {}%", sample.cpu_usage));
    }
    if sample.memory_usage > MEMORY_THRESHOLD {
        alerts.push(format!("High memory usage: {}%", sample.memory_usage));
    }
    if sample.disk_usage > DISK_THRESHOLD {
        alerts.push(format!("High disk usage: {}%", sample.disk_usage));
    }
    if !sample.nginx_status {
        alerts.push("Nginx service is not running".to_string());
    }
    if sample.load_average > LOAD_THRESHOLD {
        alerts.push(format!("High load average: {}", sample.load_average));
    }
    if sample.response_time > RESPONSE_TIME_THRESHOLD_MS {
        alerts.push(format!("High response time: {}ms", sample.response_time));
    }
    if sample.http_status != 200 {
        alerts.push(format!("HTTP status error: {}", sample.http_status));
    }

    alerts
}

/// Write `metrics/metrics_<timestamp>.json`, keyed by target name.
pub fn save_metrics(metrics_dir: &Path, samples: &[MetricSample]) -> Result<PathBuf> {
    std::fs::create_dir_all(metrics_dir)?;

    let (path, _) = unique_timestamped_path(
        metrics_dir,
        METRICS_PREFIX,
        ".json",
        Local::now().naive_local(),
    );

    let by_target: BTreeMap<&str, &MetricSample> =
        samples.iter().map(|s| (s.target.as_str(), s)).collect();
    let json = serde_json::to_string_pretty(&by_target)
        .map_err(|e| Error::Io(std::io::Error::other(e)))?;
    std::fs::write(&path, json)?;

    info!(path = %path.display(), "Metrics saved");
    Ok(path)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn parse_number(s: &str) -> Option<f64> {
    NUMBER.find(s).and_then(|m| m.as_str().parse().ok())
}

fn parse_cpu(output: &str) -> std::result::Result<f64, String> {
    parse_number(output).ok_or_else(|| format!("unexpected cpu output: {:?}", output))
}

/// `Mem:  total  used  free ...` from `free -m`, as percent used.
fn parse_memory(output: &str) -> std::result::Result<f64, String> {
    let fields: Vec<&str> = output.split_whitespace().collect();
    let parse = |i: usize| fields.get(i).and_then(|f| f.parse::<f64>().ok());

    match (parse(1), parse(2)) {
        (Some(total), Some(used)) if total > 0.0 => Ok(round2(used / total * 100.0)),
        _ => Err(format!("unexpected memory output: {:?}", output)),
    }
}

/// Use% column of `df -h /`.
fn parse_disk(output: &str) -> std::result::Result<f64, String> {
    output
        .split_whitespace()
        .nth(4)
        .and_then(|f| f.trim_end_matches('%').parse().ok())
        .ok_or_else(|| format!("unexpected disk output: {:?}", output))
}

fn parse_load(output: &str) -> std::result::Result<f64, String> {
    output
        .split_whitespace()
        .next()
        .and_then(|f| f.parse().ok())
        .ok_or_else(|| format!("unexpected loadavg output: {:?}", output))
}

fn parse_connections(output: &str) -> std::result::Result<u64, String> {
    output
        .trim()
        .parse()
        .map_err(|_| format!("unexpected connection count: {:?}", output))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy_sample() -> MetricSample {
        MetricSample {
            target: "web-01".to_string(),
            collected_at: Local::now(),
            cpu_usage: 10.0,
            memory_usage: 10.0,
            disk_usage: 10.0,
            nginx_status: true,
            load_average: 1.0,
            active_connections: 3,
            response_time: 50.0,
            http_status: 200,
        }
    }

    #[test]
    fn high_cpu_is_the_only_alert() {
        let sample = MetricSample {
            cpu_usage: 95.0,
            ..healthy_sample()
        };
        assert_eq!(evaluate(&sample), vec!["High CPU usage: 95%".to_string()]);
    }

    #[test]
    fn healthy_sample_raises_nothing() {
        assert!(evaluate(&healthy_sample()).is_empty());
    }

    #[test]
    fn thresholds_are_strict() {
        let sample = MetricSample {
            cpu_usage: 80.0,
            memory_usage: 85.0,
            disk_usage: 85.0,
            load_average: 5.0,
            response_time: 1000.0,
            ..healthy_sample()
        };
        assert!(evaluate(&sample).is_empty());
    }

    #[test]
    fn every_violation_is_reported_once() {
        let sample = MetricSample {
            cpu_usage: 81.5,
            memory_usage: 90.0,
            disk_usage: 99.0,
            nginx_status: false,
            load_average: 7.25,
            response_time: 1500.0,
            http_status: 502,
            ..healthy_sample()
        };

        let alerts = evaluate(&sample);
        assert_eq!(
            alerts,
            vec![
                "High CPU usage: 81.5%",
                "High memory usage: 90%",
                "High disk usage: 99%",
                "Nginx service is not running",
                "High load average: 7.25",
                "High response time: 1500ms",
                "HTTP status error: 502",
            ]
        );
    }

    #[test]
    fn parses_top_cpu_field() {
        assert_eq!(parse_cpu("3.2").unwrap(), 3.2);
        assert_eq!(parse_cpu(" 12.0 us,").unwrap(), 12.0);
        assert!(parse_cpu("").is_err());
    }

    #[test]
    fn parses_free_memory_line() {
        let line = "Mem:           8000        2000        3120         180        2545        5191";
        assert_eq!(parse_memory(line).unwrap(), 25.0);
        assert!(parse_memory("Mem: 0 0").is_err());
        assert!(parse_memory("garbage").is_err());
    }

    #[test]
    fn parses_df_use_column() {
        assert_eq!(
            parse_disk("/dev/root        49G   21G   28G  43% /").unwrap(),
            43.0
        );
        assert!(parse_disk("/dev/root 49G").is_err());
    }

    #[test]
    fn parses_loadavg_and_connections() {
        assert_eq!(parse_load("0.35 0.28 0.22 1/211 4321").unwrap(), 0.35);
        assert_eq!(parse_connections("17\n").unwrap(), 17);
        assert!(parse_connections("n/a").is_err());
    }

    #[test]
    fn saved_metrics_are_keyed_by_target() {
        let temp = tempfile::tempdir().unwrap();
        let path = save_metrics(temp.path(), &[healthy_sample()]).unwrap();

        let file_name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(file_name.starts_with("metrics_"));
        assert!(file_name.ends_with(".json"));

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["web-01"]["cpu_usage"], 10.0);
        assert_eq!(json["web-01"]["nginx_status"], true);
    }
}
