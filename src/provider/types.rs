use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Raw status string as reported by the Provider, before mapping onto
/// [`crate::model::InstanceStatus`]. Kept as an owned string plus a
/// `spot_reclaimed` flag because different Provider surfaces spell spot
/// reclaim differently: an exit with a spot-reclaim indicator, or a
/// provider-reported "spot reclaimed" status string, both normalize here.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderInstance {
    pub provider_id: String,
    pub status: String,
    pub spot_reclaimed: bool,
    /// Reachable address for health probes once the instance has a network
    /// identity; absent before the Provider reports `running`.
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderInstancePage {
    pub instances: Vec<ProviderInstance>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub region: String,
    pub spot_price: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Template {
    pub id: String,
    pub image_ref: String,
    pub image_auth: Option<String>,
    pub ports: Vec<u16>,
    pub env_vars: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateInstanceRequest {
    pub product_id: String,
    pub gpu_count: u32,
    pub root_disk_gb: u32,
    pub region: String,
    pub image_ref: String,
    pub image_auth: Option<String>,
    pub ports: Vec<u16>,
    pub env_vars: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateInstanceResponse {
    pub provider_id: String,
}
