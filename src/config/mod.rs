//! Fail-fast environment configuration.
//!
//! Each concern resolves independently (`*Config::resolve()`), then
//! [`Config::from_env`] assembles them. Any missing/invalid value aborts
//! startup with a descriptive [`ConfigError`] — nothing here falls back to
//! a silently-wrong default for a value the operator was expected to set.

mod controllers;
mod helpers;
mod http;
mod kv;
mod provider;
mod webhook;

pub use controllers::{AutoStopConfig, MigrationConfig, OrphanPolicy, ReconcilerConfig, WorkerConfig};
pub use http::HttpConfig;
pub use kv::KvConfig;
pub use provider::ProviderConfig;
pub use webhook::WebhookConfig;

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http: HttpConfig,
    pub kv: KvConfig,
    pub provider: ProviderConfig,
    pub webhook: WebhookConfig,
    pub worker: WorkerConfig,
    pub auto_stop: AutoStopConfig,
    pub migration: MigrationConfig,
    pub reconciler: ReconcilerConfig,
}

impl Config {
    /// Load `.env` (if present) then resolve every sub-config from the
    /// process environment. Called once at boot.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            http: HttpConfig::resolve()?,
            kv: KvConfig::resolve()?,
            provider: ProviderConfig::resolve()?,
            webhook: WebhookConfig::resolve()?,
            worker: WorkerConfig::resolve()?,
            auto_stop: AutoStopConfig::resolve()?,
            migration: MigrationConfig::resolve()?,
            reconciler: ReconcilerConfig::resolve()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn set_required_env() {
        unsafe {
            std::env::set_var("PROVIDER_BASE_URL", "https://provider.example/api");
            std::env::set_var("PROVIDER_INTERNAL_BASE_URL", "https://provider.example/internal");
            std::env::set_var("PROVIDER_API_KEY", "test-key");
            std::env::set_var("PROVIDER_INTERNAL_API_KEY", "test-internal-key");
            std::env::set_var("KV_URL", "redis://localhost:6379");
        }
    }

    #[test]
    fn from_env_succeeds_with_required_vars_set() {
        let _guard = ENV_LOCK.lock().unwrap();
        set_required_env();
        let cfg = Config::from_env().expect("config should resolve");
        assert_eq!(cfg.http.port, 8080);
        assert_eq!(cfg.auto_stop.idle_threshold.as_secs(), 1_200);
        assert_eq!(cfg.migration.retry_interval, cfg.migration.interval * 2);
    }

    #[test]
    fn missing_required_var_is_fail_fast() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe {
            std::env::remove_var("PROVIDER_BASE_URL");
        }
        let err = ProviderConfig::resolve().unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { .. }));
        set_required_env();
    }
}
