use secrecy::SecretString;
use std::time::Duration;

use crate::config::helpers::{optional_env, parse_optional_env};
use crate::error::ConfigError;

/// Webhook Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub secret: Option<SecretString>,
    pub timeout: Duration,
    pub max_attempts: u32,
}

impl WebhookConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        Ok(Self {
            secret: optional_env("WEBHOOK_SECRET")?.map(SecretString::from),
            timeout: Duration::from_millis(parse_optional_env("WEBHOOK_TIMEOUT_MS", 5_000)?),
            max_attempts: parse_optional_env("WEBHOOK_MAX_ATTEMPTS", 3)?,
        })
    }
}
