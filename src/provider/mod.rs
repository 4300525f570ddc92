//! Resilient Provider Client: HTTP pipeline to the external cloud
//! provider with correlation ids, rate limiting, circuit breaking, and
//! retry.

pub mod circuit_breaker;
pub mod client;
pub mod errors;
pub mod rate_limit;
pub mod retry;
pub mod types;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use client::ProviderClient;
pub use errors::ProviderError;
pub use rate_limit::TokenBucket;
pub use types::{CreateInstanceRequest, CreateInstanceResponse, Product, ProviderInstance, ProviderInstancePage, Template};
