//! Typed caches (instances, products, templates) over the KV store.
//! The cache manager yields ready caches synchronously after an explicit
//! `initialize()` — callers must not lazily create caches inside request
//! handlers.

mod errors;
mod typed;

pub use errors::CacheError;
pub use typed::TypedCache;

use std::sync::Arc;
use std::time::Duration;

use crate::kv::KvStore;
use crate::model::Instance;
use crate::provider::{Product, Template};

pub struct CacheManager {
    pub instances: TypedCache<Instance>,
    pub products: TypedCache<Product>,
    pub templates: TypedCache<Template>,
}

impl CacheManager {
    /// Builds all three named caches up front. Called once at boot, before
    /// the Worker Pool or HTTP layer starts routing to handlers.
    pub fn initialize(kv: Arc<dyn KvStore>) -> Self {
        Self {
            instances: TypedCache::new("instances", Arc::clone(&kv), 10_000, Duration::from_secs(3_600)),
            products: TypedCache::new("products", Arc::clone(&kv), 2_000, Duration::from_secs(900)),
            templates: TypedCache::new("templates", kv, 2_000, Duration::from_secs(1_800)),
        }
    }
}
