//! Logging initialisation and span helpers
//!
//! Structured logging goes through `tracing`; this module installs the
//! subscriber once at startup.

use tracing::Span;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use calsync_domain::LoggingConfig;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `config.filter`. Returns `false` when a
/// subscriber was already installed, in which case nothing changes.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_current_span(true))
            .try_init()
    } else {
        tracing_subscriber::registry().with(filter).with(fmt::layer().with_target(true)).try_init()
    };

    installed.is_ok()
}

/// Span wrapping one scheduled fire.
#[must_use]
pub fn job_span(job_id: &str, config_id: i64) -> Span {
    tracing::info_span!("sync_job", job_id = job_id, config_id = config_id)
}
