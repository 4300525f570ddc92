use secrecy::SecretString;
use std::time::Duration;

use crate::config::helpers::{parse_optional_env, required_env};
use crate::error::ConfigError;

/// Outbound Provider HTTP client configuration: base URLs, the two
/// independent API keys (general instance management vs. internal
/// operations), timeouts, retry bounds.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub internal_base_url: String,
    pub api_key: SecretString,
    pub internal_api_key: SecretString,
    pub request_timeout: Duration,
    pub max_retry_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_cap_delay: Duration,
    pub rate_limit_capacity: u32,
    pub rate_limit_window: Duration,
    pub circuit_failure_threshold: u32,
    pub circuit_open_duration: Duration,
    pub circuit_half_open_successes: u32,
}

impl ProviderConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: required_env(
                "PROVIDER_BASE_URL",
                "set PROVIDER_BASE_URL to the Provider's instance-management endpoint",
            )?,
            internal_base_url: required_env(
                "PROVIDER_INTERNAL_BASE_URL",
                "set PROVIDER_INTERNAL_BASE_URL to the Provider's internal-operations endpoint",
            )?,
            api_key: SecretString::from(required_env(
                "PROVIDER_API_KEY",
                "set PROVIDER_API_KEY",
            )?),
            internal_api_key: SecretString::from(required_env(
                "PROVIDER_INTERNAL_API_KEY",
                "set PROVIDER_INTERNAL_API_KEY",
            )?),
            request_timeout: Duration::from_millis(parse_optional_env(
                "PROVIDER_REQUEST_TIMEOUT_MS",
                15_000,
            )?),
            max_retry_attempts: parse_optional_env("PROVIDER_MAX_RETRY_ATTEMPTS", 5)?,
            retry_base_delay: Duration::from_millis(parse_optional_env(
                "PROVIDER_RETRY_BASE_MS",
                1_000,
            )?),
            retry_cap_delay: Duration::from_millis(parse_optional_env(
                "PROVIDER_RETRY_CAP_MS",
                30_000,
            )?),
            rate_limit_capacity: parse_optional_env("PROVIDER_RATE_LIMIT_CAPACITY", 100)?,
            rate_limit_window: Duration::from_millis(parse_optional_env(
                "PROVIDER_RATE_LIMIT_WINDOW_MS",
                60_000,
            )?),
            circuit_failure_threshold: parse_optional_env("PROVIDER_CIRCUIT_FAILURE_THRESHOLD", 5)?,
            circuit_open_duration: Duration::from_millis(parse_optional_env(
                "PROVIDER_CIRCUIT_OPEN_MS",
                60_000,
            )?),
            circuit_half_open_successes: parse_optional_env(
                "PROVIDER_CIRCUIT_HALF_OPEN_SUCCESSES",
                3,
            )?,
        })
    }
}
