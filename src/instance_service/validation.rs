//! Boundary validation for Intent API requests. Purely structural —
//! existence and startability checks live in [`super::InstanceService`]
//! itself, since they need cache/ledger state.

use crate::error::AppError;
use crate::model::{is_valid_instance_name, HealthCheckConfig};

const GPU_COUNT_RANGE: std::ops::RangeInclusive<u32> = 1..=8;
const ROOT_DISK_GB_RANGE: std::ops::RangeInclusive<u32> = 20..=1000;
const HEALTH_TIMEOUT_MS_RANGE: std::ops::RangeInclusive<u64> = 1_000..=300_000;
const HEALTH_MAX_WAIT_MS_RANGE: std::ops::RangeInclusive<u64> = 30_000..=1_800_000;
const RETRY_ATTEMPTS_RANGE: std::ops::RangeInclusive<u32> = 0..=10;

pub fn validate_name(name: &str) -> Result<(), AppError> {
    if is_valid_instance_name(name) {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "instance name '{name}' must match ^[A-Za-z0-9_-]{{1,100}}$"
        )))
    }
}

pub fn validate_region(region: &str, allowed: &[String]) -> Result<(), AppError> {
    if allowed.iter().any(|r| r == region) {
        Ok(())
    } else {
        Err(AppError::Validation(format!("region '{region}' is not in the allowed set")))
    }
}

pub fn validate_gpu_count(gpu_count: u32) -> Result<(), AppError> {
    range_check("gpuCount", gpu_count, GPU_COUNT_RANGE)
}

pub fn validate_root_disk_gb(root_disk_gb: u32) -> Result<(), AppError> {
    range_check("rootDiskGB", root_disk_gb, ROOT_DISK_GB_RANGE)
}

pub fn validate_port(port: u16) -> Result<(), AppError> {
    if port == 0 {
        Err(AppError::Validation("port must be in [1,65535]".to_string()))
    } else {
        Ok(())
    }
}

pub fn validate_health_check_config(config: &HealthCheckConfig) -> Result<(), AppError> {
    range_check("healthCheck.timeoutMs", config.timeout_ms, HEALTH_TIMEOUT_MS_RANGE)?;
    range_check("healthCheck.maxWaitTimeMs", config.max_wait_time_ms, HEALTH_MAX_WAIT_MS_RANGE)?;
    range_check("healthCheck.retryAttempts", config.retry_attempts, RETRY_ATTEMPTS_RANGE)?;
    if let Some(port) = config.target_port {
        validate_port(port)?;
    }
    Ok(())
}

fn range_check<T>(field: &str, value: T, range: std::ops::RangeInclusive<T>) -> Result<(), AppError>
where
    T: PartialOrd + std::fmt::Display,
{
    if range.contains(&value) {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "{field} must be in [{},{}], got {value}",
            range.start(),
            range.end()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_count_boundaries() {
        assert!(validate_gpu_count(1).is_ok());
        assert!(validate_gpu_count(8).is_ok());
        assert!(validate_gpu_count(0).is_err());
        assert!(validate_gpu_count(9).is_err());
    }

    #[test]
    fn health_check_config_boundaries() {
        let mut cfg = HealthCheckConfig {
            timeout_ms: 1_000,
            retry_attempts: 0,
            retry_delay_ms: 100,
            max_wait_time_ms: 30_000,
            target_port: None,
        };
        assert!(validate_health_check_config(&cfg).is_ok());
        cfg.timeout_ms = 999;
        assert!(validate_health_check_config(&cfg).is_err());
    }

    #[test]
    fn region_must_be_in_allowed_set() {
        let allowed = vec!["CN-HK-01".to_string()];
        assert!(validate_region("CN-HK-01", &allowed).is_ok());
        assert!(validate_region("MARS-01", &allowed).is_err());
    }
}
