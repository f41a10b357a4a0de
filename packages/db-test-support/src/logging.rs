//! Test logging initialization shared by every test binary in the workspace.

use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

static INITIALIZED: OnceCell<()> = OnceCell::new();

/// Quiet by default, but keep the bootstrap's own retry lines visible.
const DEFAULT_FILTER: &str = "warn,sqlx=error,testcontainers=warn";

/// Initialize structured logging for tests.
///
/// Idempotent; safe to call from every test and from `ctor` hooks. The filter
/// comes from `TEST_LOG`, then `RUST_LOG`, then [`DEFAULT_FILTER`]. Output goes
/// through the test writer so cargo captures it per test.
pub fn init() {
    INITIALIZED.get_or_init(|| {
        let filter = std::env::var("TEST_LOG")
            .or_else(|_| std::env::var("RUST_LOG"))
            .map(EnvFilter::new)
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .without_time()
            .try_init()
            .ok();
    });
}
