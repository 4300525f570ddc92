use std::time::Duration;

use crate::config::helpers::{parse_bool_env, parse_optional_env};
use crate::error::ConfigError;

/// Orphan-retention policy chosen by the Startup Reconciler for cache
/// entries whose instance the Provider no longer reports: delete the
/// entry outright, or mark it `terminated` and retain it for inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrphanPolicy {
    Delete,
    Mark,
}

impl std::str::FromStr for OrphanPolicy {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "delete" => Ok(Self::Delete),
            "mark" => Ok(Self::Mark),
            other => Err(format!("must be 'delete' or 'mark', got '{other}'")),
        }
    }
}

/// Auto-Stop Controller configuration.
#[derive(Debug, Clone)]
pub struct AutoStopConfig {
    pub interval: Duration,
    pub idle_threshold: Duration,
    pub dry_run: bool,
}

impl AutoStopConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        Ok(Self {
            interval: Duration::from_secs(parse_optional_env("AS_INTERVAL_SECS", 300)?),
            idle_threshold: Duration::from_secs(parse_optional_env("AS_THRESHOLD_SECS", 1_200)?),
            dry_run: parse_bool_env("AS_DRY_RUN", false)?,
        })
    }
}

/// Migration Controller configuration.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub retry_interval: Duration,
    pub batch_size: usize,
    pub dry_run: bool,
}

impl MigrationConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let interval = Duration::from_secs(parse_optional_env("MIG_INTERVAL_SECS", 900)?);
        Ok(Self {
            enabled: parse_bool_env("MIG_ENABLED", true)?,
            interval,
            retry_interval: interval * 2,
            batch_size: parse_optional_env("MIG_BATCH_SIZE", 30)?,
            dry_run: parse_bool_env("MIG_DRY_RUN", false)?,
        })
    }
}

/// Startup Reconciler configuration.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub orphan_policy: OrphanPolicy,
    pub orphan_retention: Duration,
    pub lock_ttl: Duration,
}

impl ReconcilerConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        Ok(Self {
            orphan_policy: parse_optional_env("ORPHAN_POLICY", OrphanPolicy::Mark)?,
            orphan_retention: Duration::from_secs(parse_optional_env(
                "ORPHAN_RETENTION_SECS",
                7 * 24 * 3_600,
            )?),
            lock_ttl: Duration::from_secs(parse_optional_env("STARTUP_LOCK_TTL_SECS", 600)?),
        })
    }
}

/// Worker pool sizing + per-job-type deadlines.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub instance_startup_timeout: Duration,
    pub job_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl WorkerConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        Ok(Self {
            concurrency: parse_optional_env("WORKER_CONCURRENCY", 8)?,
            poll_interval: Duration::from_secs(parse_optional_env("POLL_INTERVAL_SECS", 30)?),
            instance_startup_timeout: Duration::from_secs(parse_optional_env(
                "INSTANCE_STARTUP_TIMEOUT_SECS",
                1_800,
            )?),
            job_timeout: Duration::from_secs(parse_optional_env("JOB_TIMEOUT_SECS", 120)?),
            shutdown_grace: Duration::from_secs(parse_optional_env("SHUTDOWN_GRACE_SECS", 10)?),
        })
    }
}
