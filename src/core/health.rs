//! HTTP health checks against deployed targets.
//!
//! A check is one GET of `<base_url><health_path>`; only a 200 within the
//! timeout counts as healthy. Errors never escape a check, they just make it
//! report `false`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{error, info, warn};

use crate::error::{Error, Result};

/// Status and latency of one timed GET.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeResponse {
    pub status: u16,
    pub elapsed: Duration,
}

impl ProbeResponse {
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1000.0
    }
}

#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Timeout applied by [`wait_until_healthy`](Self::wait_until_healthy).
    fn timeout(&self) -> Duration;

    async fn check_health(&self, base_url: &str, timeout: Duration) -> bool;

    async fn probe(&self, base_url: &str, timeout: Duration) -> Result<ProbeResponse>;

    /// Fixed-count poll: up to `max_attempts` checks with `delay` between
    /// them and no sleep after the last one.
    async fn wait_until_healthy(&self, base_url: &str, max_attempts: u32, delay: Duration) -> bool {
        for attempt in 1..=max_attempts {
            if self.check_health(base_url, self.timeout()).await {
                return true;
            }

            if attempt < max_attempts {
                info!(
                    url = %base_url,
                    attempt,
                    delay_secs = delay.as_secs(),
                    "Server not healthy yet, waiting before next attempt"
                );
                tokio::time::sleep(delay).await;
            }
        }

        error!(
            url = %base_url,
            attempts = max_attempts,
            "Server did not become healthy"
        );
        false
    }
}

/// Probes over HTTP with `reqwest`.
pub struct HealthChecker {
    client: reqwest::Client,
    health_path: String,
    timeout: Duration,
}

impl HealthChecker {
    pub fn new(health_path: impl Into<String>, timeout: Duration, verify_tls: bool) -> Result<Self> {
        if !verify_tls {
            warn!("TLS certificate verification is disabled for health checks");
        }

        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(!verify_tls)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            health_path: health_path.into(),
            timeout,
        })
    }

    pub fn health_url(&self, base_url: &str) -> String {
        format!("{}{}", base_url.trim_end_matches('/'), self.health_path)
    }
}

#[async_trait]
impl HealthProbe for HealthChecker {
    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn check_health(&self, base_url: &str, timeout: Duration) -> bool {
        let url = self.health_url(base_url);
        info!(url = %url, "Checking health");

        match self.client.get(&url).timeout(timeout).send().await {
            Ok(response) if response.status() == StatusCode::OK => {
                info!(url = %url, "Health check passed");
                true
            }
            Ok(response) => {
                warn!(url = %url, status = response.status().as_u16(), "Health check failed");
                false
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Health check failed");
                false
            }
        }
    }

    async fn probe(&self, base_url: &str, timeout: Duration) -> Result<ProbeResponse> {
        let url = self.health_url(base_url);
        let start = Instant::now();

        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                warn!(url = %url, error = %e, "Probe failed");
                Error::Http {
                    url: url.clone(),
                    reason: e.to_string(),
                }
            })?;

        Ok(ProbeResponse {
            status: response.status().as_u16(),
            elapsed: start.elapsed(),
        })
    }
}

/// Answers every check with a fixed verdict. Used in simulation mode.
pub struct StaticProbe {
    pub healthy: bool,
}

#[async_trait]
impl HealthProbe for StaticProbe {
    fn timeout(&self) -> Duration {
        Duration::ZERO
    }

    async fn check_health(&self, _base_url: &str, _timeout: Duration) -> bool {
        self.healthy
    }

    async fn probe(&self, _base_url: &str, _timeout: Duration) -> Result<ProbeResponse> {
        Ok(ProbeResponse {
            status: if self.healthy { 200 } else { 503 },
            elapsed: Duration::from_millis(1),
        })
    }
}
