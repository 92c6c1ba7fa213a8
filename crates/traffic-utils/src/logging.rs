//! Logging and tracing utilities

use crate::Config;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing subscriber with default configuration
pub fn init_tracing() {
    init_tracing_with(&Config::default());
}

/// Initialize tracing from an application [`Config`]
///
/// `RUST_LOG` wins over `config.log_filter` when it is set. With
/// `config.json_logs` the events are emitted as one JSON object per line.
pub fn init_tracing_with(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter.as_str()));

    let registry = tracing_subscriber::registry().with(filter);

    // try_init: a second call (tests, embedded use) must not panic
    if config.json_logs {
        let _ = registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init();
    } else {
        let _ = registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init();
    }
}
