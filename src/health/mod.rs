//! Health Prober: parallel HTTP probes over an instance's endpoints, with
//! per-endpoint retry and an aggregate readiness verdict.

use std::time::{Duration, Instant};

use futures::future::join_all;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::model::HealthCheckConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSpec {
    pub port: u16,
    pub endpoint_url: String,
    pub endpoint_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Timeout,
    ConnectionRefused,
    BadGateway,
    ServerError,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointResult {
    pub endpoint_url: String,
    pub healthy: bool,
    pub error_class: Option<ErrorClass>,
    pub response_time_ms: u64,
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Healthy,
    Partial,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeReport {
    pub verdict: Verdict,
    pub results: Vec<EndpointResult>,
}

pub struct HealthProber {
    http: reqwest::Client,
}

impl Default for HealthProber {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthProber {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .build()
                .expect("reqwest client config is always valid here"),
        }
    }

    async fn probe_one(&self, endpoint: &EndpointSpec, config: &HealthCheckConfig) -> EndpointResult {
        let timeout = Duration::from_millis(config.timeout_ms);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let started = Instant::now();
            let outcome = self.http.get(&endpoint.endpoint_url).timeout(timeout).send().await;
            let response_time_ms = started.elapsed().as_millis() as u64;

            let (healthy, error_class) = match &outcome {
                Ok(resp) if resp.status().is_success() || resp.status().is_redirection() => (true, None),
                Ok(resp) if resp.status() == reqwest::StatusCode::BAD_GATEWAY => (false, Some(ErrorClass::BadGateway)),
                Ok(resp) if resp.status().is_server_error() => (false, Some(ErrorClass::ServerError)),
                Ok(_) => (false, Some(ErrorClass::Unknown)),
                Err(e) if e.is_timeout() => (false, Some(ErrorClass::Timeout)),
                Err(e) if e.is_connect() => (false, Some(ErrorClass::ConnectionRefused)),
                Err(_) => (false, Some(ErrorClass::Unknown)),
            };

            if healthy || attempt > config.retry_attempts {
                return EndpointResult {
                    endpoint_url: endpoint.endpoint_url.clone(),
                    healthy,
                    error_class,
                    response_time_ms,
                    attempts: attempt,
                };
            }

            let jitter = rand::thread_rng().gen_range(0..=(config.retry_delay_ms / 10).max(1));
            tokio::time::sleep(Duration::from_millis(config.retry_delay_ms + jitter)).await;
        }
    }

    /// Probes every endpoint (or only `config.target_port`, if set) in
    /// parallel and folds the per-endpoint results into one verdict.
    /// `elapsed_ms` is the caller's time-since-start-of-operation, used to
    /// decide between `partial` (reschedule) and `unhealthy` (give up).
    pub async fn probe(
        &self,
        endpoints: &[EndpointSpec],
        config: &HealthCheckConfig,
        elapsed_ms: i64,
    ) -> ProbeReport {
        let targets: Vec<&EndpointSpec> = match config.target_port {
            Some(port) => endpoints.iter().filter(|e| e.port == port).collect(),
            None => endpoints.iter().collect(),
        };

        let results = join_all(targets.iter().map(|e| self.probe_one(e, config))).await;

        let all_healthy = !results.is_empty() && results.iter().all(|r| r.healthy);
        let verdict = if all_healthy {
            Verdict::Healthy
        } else if elapsed_ms < config.max_wait_time_ms as i64 {
            Verdict::Partial
        } else {
            Verdict::Unhealthy
        };

        ProbeReport { verdict, results }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(max_wait_time_ms: u64) -> HealthCheckConfig {
        HealthCheckConfig {
            timeout_ms: 1_000,
            retry_attempts: 1,
            retry_delay_ms: 5,
            max_wait_time_ms,
            target_port: None,
        }
    }

    #[tokio::test]
    async fn all_endpoints_200_is_healthy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let prober = HealthProber::new();
        let endpoints = vec![EndpointSpec {
            port: 8000,
            endpoint_url: server.uri(),
            endpoint_type: "http".to_string(),
        }];
        let report = prober.probe(&endpoints, &config(60_000), 1_000).await;
        assert_eq!(report.verdict, Verdict::Healthy);
        assert!(report.results[0].healthy);
    }

    #[tokio::test]
    async fn all_endpoints_502_past_deadline_is_unhealthy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let prober = HealthProber::new();
        let endpoints = vec![EndpointSpec {
            port: 8000,
            endpoint_url: server.uri(),
            endpoint_type: "http".to_string(),
        }];
        let report = prober.probe(&endpoints, &config(60_000), 61_000).await;
        assert_eq!(report.verdict, Verdict::Unhealthy);
        assert_eq!(report.results[0].error_class, Some(ErrorClass::BadGateway));
    }

    #[tokio::test]
    async fn one_of_two_healthy_within_deadline_is_partial() {
        let healthy_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&healthy_server)
            .await;
        let unhealthy_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&unhealthy_server)
            .await;

        let prober = HealthProber::new();
        let endpoints = vec![
            EndpointSpec {
                port: 8000,
                endpoint_url: healthy_server.uri(),
                endpoint_type: "http".to_string(),
            },
            EndpointSpec {
                port: 8001,
                endpoint_url: unhealthy_server.uri(),
                endpoint_type: "http".to_string(),
            },
        ];
        let report = prober.probe(&endpoints, &config(60_000), 1_000).await;
        assert_eq!(report.verdict, Verdict::Partial);
    }

    #[tokio::test]
    async fn target_port_filters_to_single_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let prober = HealthProber::new();
        let endpoints = vec![
            EndpointSpec {
                port: 8000,
                endpoint_url: server.uri(),
                endpoint_type: "http".to_string(),
            },
            EndpointSpec {
                port: 9000,
                endpoint_url: "http://127.0.0.1:1".to_string(),
                endpoint_type: "http".to_string(),
            },
        ];
        let mut cfg = config(60_000);
        cfg.target_port = Some(8000);
        let report = prober.probe(&endpoints, &cfg, 1_000).await;
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.verdict, Verdict::Healthy);
    }
}
