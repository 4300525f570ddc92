use crate::config::helpers::{optional_env, parse_optional_env};
use crate::error::ConfigError;

/// Thin Intent API surface configuration (ambient outer layer; validation
/// proper lives in `instance_service`, not here).
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub port: u16,
    pub default_region: String,
    pub allowed_regions: Vec<String>,
}

impl HttpConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let allowed_regions = optional_env("ALLOWED_REGIONS")?
            .map(|raw| raw.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_else(|| {
                vec![
                    "CN-HK-01".to_string(),
                    "US-WEST-01".to_string(),
                    "EU-CENTRAL-01".to_string(),
                ]
            });
        Ok(Self {
            port: parse_optional_env("PORT", 8080)?,
            default_region: optional_env("DEFAULT_REGION")?
                .unwrap_or_else(|| "CN-HK-01".to_string()),
            allowed_regions,
        })
    }
}
