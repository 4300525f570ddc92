//! Resilient HTTP client for the Provider: correlation ids, token-bucket
//! rate limiting, a three-state circuit breaker, and bounded exponential
//! retry, composed as explicit values rather than ambient globals so the
//! whole pipeline is constructible in tests.

use std::time::Duration;

use reqwest::{Method, StatusCode};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::config::ProviderConfig;

use super::circuit_breaker::CircuitBreaker;
use super::errors::ProviderError;
use super::rate_limit::TokenBucket;
use super::retry::{backoff_delay, retry_after_delay};
use super::types::{CreateInstanceRequest, CreateInstanceResponse, Product, ProviderInstance, ProviderInstancePage, Template};

pub struct ProviderClient {
    http: reqwest::Client,
    config: ProviderConfig,
    rate_limiter: TokenBucket,
    circuit_breaker: CircuitBreaker,
}

impl ProviderClient {
    pub fn new(config: ProviderConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("reqwest client config is always valid here");
        let rate_limiter = TokenBucket::new(config.rate_limit_capacity, config.rate_limit_window);
        let circuit_breaker = CircuitBreaker::new(
            config.circuit_failure_threshold,
            config.circuit_open_duration,
            config.circuit_half_open_successes,
        );
        Self {
            http,
            config,
            rate_limiter,
            circuit_breaker,
        }
    }

    pub fn circuit_state(&self) -> super::circuit_breaker::CircuitState {
        self.circuit_breaker.state()
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: Option<&(impl serde::Serialize + Sync)>,
        internal: bool,
    ) -> Result<T, ProviderError> {
        let correlation_id = Uuid::new_v4();
        let span = info_span!("provider_call", %correlation_id, %url, method = %method);
        async move {
            let mut attempt = 0u32;
            loop {
                attempt += 1;
                if !self.circuit_breaker.allow_request() {
                    return Err(ProviderError::Unavailable);
                }
                self.rate_limiter.acquire().await;

                let key = if internal {
                    self.config.internal_api_key.expose_secret()
                } else {
                    self.config.api_key.expose_secret()
                };
                let mut req = self
                    .http
                    .request(method.clone(), url)
                    .bearer_auth(key)
                    .header("X-Request-Id", correlation_id.to_string());
                if let Some(b) = body {
                    req = req.json(b);
                }

                let outcome = req.send().await;
                match self.classify(outcome).await {
                    Ok(response) => {
                        self.circuit_breaker.record_success();
                        return response.json::<T>().await.map_err(|e| {
                            ProviderError::ProviderError {
                                status: 0,
                                code: "DECODE_ERROR".to_string(),
                                message: e.to_string(),
                            }
                        });
                    }
                    Err(err) if err.is_retryable() && attempt < self.config.max_retry_attempts => {
                        self.circuit_breaker.record_failure();
                        tracing::warn!(%correlation_id, attempt, error = %err, "retrying provider call");
                        tokio::time::sleep(backoff_delay(
                            attempt,
                            self.config.retry_base_delay,
                            self.config.retry_cap_delay,
                        ))
                        .await;
                        continue;
                    }
                    Err(err) => {
                        self.circuit_breaker.record_failure();
                        return Err(err);
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Same retry/circuit/rate-limit pipeline, for endpoints that return
    /// no body (`startInstance`, `stopInstance`, `deleteInstance`,
    /// `migrateInstance`).
    async fn call_unit(
        &self,
        method: Method,
        url: &str,
        internal: bool,
    ) -> Result<(), ProviderError> {
        let correlation_id = Uuid::new_v4();
        let span = info_span!("provider_call", %correlation_id, %url, method = %method);
        async move {
            let mut attempt = 0u32;
            loop {
                attempt += 1;
                if !self.circuit_breaker.allow_request() {
                    return Err(ProviderError::Unavailable);
                }
                self.rate_limiter.acquire().await;

                let key = if internal {
                    self.config.internal_api_key.expose_secret()
                } else {
                    self.config.api_key.expose_secret()
                };
                let req = self
                    .http
                    .request(method.clone(), url)
                    .bearer_auth(key)
                    .header("X-Request-Id", correlation_id.to_string());

                let outcome = req.send().await;
                match self.classify(outcome).await {
                    Ok(_) => {
                        self.circuit_breaker.record_success();
                        return Ok(());
                    }
                    Err(err) if err.is_retryable() && attempt < self.config.max_retry_attempts => {
                        self.circuit_breaker.record_failure();
                        tokio::time::sleep(backoff_delay(
                            attempt,
                            self.config.retry_base_delay,
                            self.config.retry_cap_delay,
                        ))
                        .await;
                        continue;
                    }
                    Err(err) => {
                        self.circuit_breaker.record_failure();
                        return Err(err);
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Maps a raw `reqwest` outcome onto the Provider error taxonomy,
    /// honoring `Retry-After` on `429`.
    async fn classify(
        &self,
        outcome: Result<reqwest::Response, reqwest::Error>,
    ) -> Result<reqwest::Response, ProviderError> {
        let response = match outcome {
            Ok(r) => r,
            Err(e) if e.is_timeout() => return Err(ProviderError::Timeout),
            Err(_) => return Err(ProviderError::Timeout),
        };
        match response.status() {
            StatusCode::OK | StatusCode::CREATED | StatusCode::ACCEPTED | StatusCode::NO_CONTENT => {
                Ok(response)
            }
            StatusCode::TOO_MANY_REQUESTS => {
                if let Some(delay) = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(retry_after_delay)
                {
                    tokio::time::sleep(delay).await;
                }
                Err(ProviderError::RateLimited)
            }
            StatusCode::NOT_FOUND => Err(ProviderError::NotFound),
            StatusCode::CONFLICT => Err(ProviderError::Conflict),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ProviderError::Unauthorized),
            status if status.is_server_error() => {
                let message = response.text().await.unwrap_or_default();
                Err(ProviderError::ProviderError {
                    status: status.as_u16(),
                    code: "SERVER_ERROR".to_string(),
                    message,
                })
            }
            status => {
                let message = response.text().await.unwrap_or_default();
                Err(ProviderError::ProviderError {
                    status: status.as_u16(),
                    code: "CLIENT_ERROR".to_string(),
                    message,
                })
            }
        }
    }

    pub async fn get_instance(&self, provider_id: &str) -> Result<ProviderInstance, ProviderError> {
        let url = format!("{}/instances/{provider_id}", self.config.base_url);
        self.call::<ProviderInstance>(Method::GET, &url, None::<&()>, false).await
    }

    pub async fn list_instances(
        &self,
        page_cursor: Option<&str>,
    ) -> Result<ProviderInstancePage, ProviderError> {
        let mut url = format!("{}/instances", self.config.base_url);
        if let Some(cursor) = page_cursor {
            url.push_str(&format!("?cursor={cursor}"));
        }
        self.call::<ProviderInstancePage>(Method::GET, &url, None::<&()>, false).await
    }

    pub async fn list_products(&self, filter: &str) -> Result<Vec<Product>, ProviderError> {
        let url = format!("{}/products?filter={filter}", self.config.base_url);
        self.call::<Vec<Product>>(Method::GET, &url, None::<&()>, false).await
    }

    pub async fn get_template(&self, template_id: &str) -> Result<Template, ProviderError> {
        let url = format!("{}/templates/{template_id}", self.config.base_url);
        self.call::<Template>(Method::GET, &url, None::<&()>, false).await
    }

    pub async fn create_instance(
        &self,
        req: &CreateInstanceRequest,
    ) -> Result<CreateInstanceResponse, ProviderError> {
        let url = format!("{}/instances", self.config.base_url);
        self.call::<CreateInstanceResponse>(Method::POST, &url, Some(req), false).await
    }

    pub async fn start_instance(&self, provider_id: &str) -> Result<(), ProviderError> {
        let url = format!("{}/instances/{provider_id}/start", self.config.base_url);
        self.call_unit(Method::POST, &url, false).await
    }

    pub async fn stop_instance(&self, provider_id: &str) -> Result<(), ProviderError> {
        let url = format!("{}/instances/{provider_id}/stop", self.config.base_url);
        self.call_unit(Method::POST, &url, false).await
    }

    pub async fn delete_instance(&self, provider_id: &str) -> Result<(), ProviderError> {
        let url = format!("{}/instances/{provider_id}", self.config.base_url);
        self.call_unit(Method::DELETE, &url, false).await
    }

    pub async fn migrate_instance(&self, provider_id: &str) -> Result<(), ProviderError> {
        let url = format!("{}/instances/{provider_id}/migrate", self.config.internal_base_url);
        self.call_unit(Method::POST, &url, true).await
    }

    /// Remaining rate-limiter/circuit-breaker duration hint, used by
    /// `GetHealth()`.
    pub fn time_until_half_open(&self) -> Option<Duration> {
        match self.circuit_state() {
            super::circuit_breaker::CircuitState::Open => Some(self.config.circuit_open_duration),
            _ => None,
        }
    }
}
