//! Process-wide logging setup.
//!
//! Code logs through the `log` facade; the installed `tracing-subscriber`
//! formatter picks those records up through its `log` bridge.

use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

static INIT: OnceLock<()> = OnceLock::new();

/// Install the global subscriber, honouring `RUST_LOG` when present.
///
/// Subsequent calls are no-ops, and an already-installed subscriber (e.g. a
/// test harness) is left untouched.
pub fn init(default_level: &str) {
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_level));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
    });
}
