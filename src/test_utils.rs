//! Shared helpers for unit tests.

use std::sync::Once;

static INIT_LOGGING: Once = Once::new();

/// Initialize tracing output for tests. Safe to call from every test; the
/// first call wins.
pub(crate) fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .with_target(false)
            .with_ansi(false)
            .try_init();
    });
}
