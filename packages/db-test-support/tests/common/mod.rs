#![allow(dead_code)]

use std::time::Duration;

use db_connector::RetryPolicy;

#[ctor::ctor]
fn init_logging() {
    db_test_support::logging::init();
}

/// Short policy so exhaustion tests stay quick even on a real clock.
pub fn quick_policy() -> RetryPolicy {
    RetryPolicy::default()
        .with_max_attempts(2)
        .with_initial_interval(Duration::from_millis(50))
}
