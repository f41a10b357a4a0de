//! Database bootstrap: backoff policy, driver seam, provisioning and connect.

pub mod core;
pub mod driver;
pub mod provision;
pub mod retry;

pub use core::{connect, connect_from_env, DbHandle};
pub use driver::{PgDriver, PgSession, SeaOrmDriver};
pub use provision::{ensure_database_exists, ProvisionOutcome};
pub use retry::{retry, RetryExhausted, RetryPolicy};
