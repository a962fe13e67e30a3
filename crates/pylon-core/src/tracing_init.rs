//! Shared tracing/logging initialization.
//!
//! Every pylon binary sets up `tracing_subscriber` the same way: an
//! env-filter derived from the configured level (overridable with
//! `RUST_LOG`) and a fmt layer in either human-readable or JSON form.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not set
///   (e.g. `"pylon_server=info"`).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    );

    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Build the default filter directive for a configured log level.
///
/// Unknown levels fall back to `info`.
pub fn default_filter(level: &str) -> String {
    let level = match level.to_ascii_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => level.to_ascii_lowercase(),
        _ => "info".to_string(),
    };
    format!("pylon_server={level},pylon_core={level}")
}
