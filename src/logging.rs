//! Log subscriber installation.
//!
//! The library itself only emits `log` records and `tracing` spans; hosts
//! call one of these once at startup. `RUST_LOG` overrides the filter.

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "boardkit=info";

/// Install a fmt subscriber, failing if one is already installed.
pub fn try_init(filter: &str) -> std::result::Result<(), String> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|e| e.to_string())
}

/// Install a fmt subscriber with the default filter. Repeated calls are ignored.
pub fn init() {
    if let Err(err) = try_init(DEFAULT_FILTER) {
        log::debug!("logging already initialized: {}", err);
    }
}

/// Subscriber for tests: output is captured per test, repeated calls are ignored.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("boardkit=debug"))
        .with_test_writer()
        .try_init();
}
