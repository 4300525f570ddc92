use secrecy::SecretString;

use crate::config::helpers::{optional_env, parse_bool_env, required_env};
use crate::error::ConfigError;

/// KV Store Adapter configuration: remote endpoint plus fallback policy.
#[derive(Debug, Clone)]
pub struct KvConfig {
    pub url: String,
    pub token: Option<SecretString>,
    pub key_prefix: String,
    pub fallback_enabled: bool,
}

impl KvConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        Ok(Self {
            url: required_env("KV_URL", "set KV_URL to the Redis-compatible endpoint")?,
            token: optional_env("KV_TOKEN")?.map(SecretString::from),
            key_prefix: optional_env("KV_KEY_PREFIX")?.unwrap_or_else(|| "gpufleet".to_string()),
            fallback_enabled: parse_bool_env("KV_FALLBACK_ENABLED", true)?,
        })
    }
}
