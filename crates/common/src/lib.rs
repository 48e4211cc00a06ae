//! Shared configuration, logging and retry helpers.

mod backoff;
mod environment;

pub use backoff::ExponentialBackoff;
pub use environment::{
    feed_url_from_env, CoinbaseEnvironment, ParseEnvironmentError, ENVIRONMENT_VAR, FEED_URL_VAR,
};

use tracing_subscriber::EnvFilter;

/// Default filter used when `RUST_LOG` is not set.
const DEFAULT_LOG_FILTER: &str = "info,tungstenite=warn,tokio_tungstenite=warn";

/// Install the global `tracing` subscriber.
///
/// The filter comes from `RUST_LOG` when set. Calling this more than once is a no-op.
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .try_init();
}
