//! Resilient Postgres bootstrap: create the target database when it is
//! missing and open a connection to it, retrying under exponential backoff
//! while the server comes up.

pub mod config;
pub mod error;
pub mod infra;

pub use config::db;
pub use config::db::{ConnSpec, DbName, PgConfig};
pub use error::DbConnectorError;
pub use infra::db::{
    connect, connect_from_env, ensure_database_exists, retry, DbHandle, PgDriver, PgSession,
    ProvisionOutcome, RetryExhausted, RetryPolicy, SeaOrmDriver,
};
