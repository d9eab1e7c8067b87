use std::sync::Once;

use tracing_core::Level;

static INIT: Once = Once::new();

/// Environment variable overriding the log level of tests.
pub const LOG_LEVEL_VAR: &str = "WAMP_PEER_TEST_LOG";

fn log_level() -> Level {
    std::env::var(LOG_LEVEL_VAR)
        .ok()
        .and_then(|level| level.parse().ok())
        .unwrap_or(Level::DEBUG)
}

/// Installs a subscriber that captures session logs in test output.
///
/// Safe to call from every test. Only the first call has an effect.
pub fn setup_test_environment() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(log_level())
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .try_init()
            .ok();
    });
}
