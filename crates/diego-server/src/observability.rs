//! Log output for the server.
//!
//! Logging starts before the configuration is read, so configuration errors
//! are reported through it. Once `logging.level` is known it replaces the
//! bootstrap filter, unless `RUST_LOG` holds a usable filter.

use std::fmt;
use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt as log_fmt, prelude::*, reload};

/// Filter used until the configuration is loaded.
const BOOTSTRAP_LEVEL: &str = "info";

static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// Where the active log filter came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterSource {
    Environment,
    Config,
}

impl fmt::Display for FilterSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Environment => write!(f, "RUST_LOG"),
            Self::Config => write!(f, "logging.level"),
        }
    }
}

/// Picks the filter directives: a parseable, non-empty `RUST_LOG` wins over
/// the configured level.
fn select_directives(rust_log: Option<&str>, configured: &str) -> (String, FilterSource) {
    match rust_log.map(str::trim).filter(|d| !d.is_empty()) {
        Some(directives) if EnvFilter::try_new(directives).is_ok() => {
            (directives.to_string(), FilterSource::Environment)
        }
        _ => (configured.to_string(), FilterSource::Config),
    }
}

fn rust_log() -> Option<String> {
    std::env::var("RUST_LOG").ok()
}

/// Installs the global subscriber with the bootstrap filter.
pub fn init_tracing() {
    let (directives, _) = select_directives(rust_log().as_deref(), BOOTSTRAP_LEVEL);
    let (filter, handle) = reload::Layer::new(EnvFilter::new(directives));

    if tracing_subscriber::registry()
        .with(filter)
        .with(log_fmt::layer())
        .try_init()
        .is_ok()
    {
        let _ = FILTER_HANDLE.set(handle);
    }
}

/// Switches from the bootstrap filter to the configured level.
pub fn apply_logging_level(level: &str) -> FilterSource {
    let (directives, source) = select_directives(rust_log().as_deref(), level);
    if source == FilterSource::Environment {
        return source;
    }
    if let Some(handle) = FILTER_HANDLE.get() {
        if let Err(e) = handle.modify(|f| *f = EnvFilter::new(&directives)) {
            tracing::warn!(error = %e, level = %directives, "Failed to apply log level");
        }
    }
    source
}
