//! Structured logging setup
//!
//! Installs a `tracing-subscriber` fmt layer filtered by `RUST_LOG`, falling
//! back to the configured level. Safe to call more than once; only the first
//! call in a process installs anything.

use crate::config::LoggingConfig;
use once_cell::sync::OnceCell;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INSTALLED: OnceCell<()> = OnceCell::new();

/// Initialize global logging from `config`.
///
/// Returns `false` if a subscriber was already installed (by this function
/// or by someone else).
pub fn init_logging(config: &LoggingConfig) -> bool {
    let mut installed_now = false;
    INSTALLED.get_or_init(|| {
        let filter = build_env_filter(config);
        let registry = tracing_subscriber::registry().with(filter);
        let result = if config.json_format {
            registry.with(fmt::layer().json()).try_init()
        } else {
            registry.with(fmt::layer().with_target(true)).try_init()
        };
        installed_now = result.is_ok();
    });

    if installed_now {
        info!(app = %config.app_name, level = %config.log_level, "Logging initialized");
    }
    installed_now
}

fn build_env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str().to_lowercase()))
}
