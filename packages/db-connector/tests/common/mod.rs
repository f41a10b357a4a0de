#![allow(dead_code)]

use std::time::Duration;

use db_connector::{PgConfig, RetryPolicy};

// Logging is auto-installed for every test binary
#[ctor::ctor]
fn init_logging() {
    db_test_support::logging::init();
}

/// `{host: localhost, port: 5432, user: u, dbName: appdb, password: p}`
pub fn appdb_config() -> PgConfig {
    PgConfig {
        host: "localhost".to_string(),
        port: 5432,
        user: "u".to_string(),
        db_name: "appdb".to_string(),
        password: "p".to_string(),
        ssl_mode: false,
    }
}

/// Sum of the first `k` nominal backoff delays of `policy`.
pub fn first_intervals(policy: &RetryPolicy, k: usize) -> Duration {
    policy.intervals().take(k).sum()
}

/// The paused test clock only advances to timer deadlines, which are rounded
/// up to the millisecond.
pub fn assert_elapsed_near(actual: Duration, expected: Duration) {
    let tolerance = Duration::from_millis(10);
    let diff = if actual > expected {
        actual - expected
    } else {
        expected - actual
    };
    assert!(
        diff <= tolerance,
        "elapsed {actual:?} not within {tolerance:?} of {expected:?}"
    );
}
