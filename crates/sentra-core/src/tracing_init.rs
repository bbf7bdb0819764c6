//! Shared tracing/logging initialization.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialise the global tracing subscriber.
///
/// Filter directives come from `SENTRA_LOG`, then `RUST_LOG`, then
/// `default_filter` (e.g. `"sentra_daemon=info"`). With `log_json` the
/// subscriber emits structured JSON lines instead of the human-readable
/// format.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let directives = std::env::var("SENTRA_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| default_filter.to_string());
    let env_filter = tracing_subscriber::EnvFilter::new(directives);

    let registry = tracing_subscriber::registry().with(env_filter);
    if log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
