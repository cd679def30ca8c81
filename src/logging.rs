use std::sync::OnceLock;

use tracing_subscriber::{fmt, EnvFilter};

static INIT: OnceLock<()> = OnceLock::new();

/// Initializes the global tracing subscriber once. Subsequent calls are no-ops,
/// so tests and embedding hosts can both call it freely.
///
/// Verbosity is controlled by `RUST_LOG`; defaults to `info` for this crate
/// and `warn` elsewhere.
pub fn init() {
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("warn,leadlift=info"));
        // try_init: the host may already own the global subscriber.
        let _ = fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();
    });
}
