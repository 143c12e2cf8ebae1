use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

/// Environment variable holding a filter directive that overrides
/// [`LogConfig::level`].
pub const LOG_ENV: &str = "KSTORE_LOG";

/// Install a global fmt subscriber.
///
/// Returns `false` when a global subscriber was already set, in which case
/// nothing changes.
pub fn init_logging(config: &LogConfig) -> bool {
    let filter = std::env::var(LOG_ENV)
        .ok()
        .and_then(|directive| EnvFilter::try_new(directive).ok())
        .unwrap_or_else(|| filter_for(config));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target)
        .try_init()
        .is_ok()
}

fn filter_for(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"))
}
