mod usage;

pub use usage::{UsageLedger, UsageRow};

use tracing_subscriber::EnvFilter;

/// Initialize tracing with an env-filter fallback chain. Safe to call
/// once per process; later calls are ignored.
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
