//! Tracing setup: structured, env-filtered logging for the whole process.
//! Every component logs through `tracing::{info,warn,error,debug}!` with
//! structured fields rather than formatted strings; this just wires the
//! subscriber those macros write into.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global subscriber. Call once at the top of `main`, before
/// any other component logs.
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("gpu_fleet_control=info,tower_http=info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}
