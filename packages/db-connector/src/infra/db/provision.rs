use sea_orm::DbErr;
use tracing::{debug, info, warn};

use crate::config::db::{DbName, PgConfig};
use crate::error::DbConnectorError;
use crate::infra::db::driver::{PgDriver, PgSession};

/// What [`ensure_database_exists`] found on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    AlreadyExists,
    Created,
}

fn mentions_sqlstate(msg: &str, code: &str) -> bool {
    msg.contains(code) || msg.contains(&format!("SQLSTATE({code})"))
}

/// `CREATE DATABASE` lost a race against another creator (SQLSTATE 42P04).
fn is_duplicate_database(err: &DbErr) -> bool {
    let msg = err.to_string();
    mentions_sqlstate(&msg, "42P04") || msg.contains("already exists")
}

/// Make sure the database named in `config` exists, creating it if needed.
///
/// Connects to the administrative `postgres` database on the same server,
/// looks the name up in `pg_database` and issues `CREATE DATABASE` only when
/// it is missing, so repeated calls leave the server unchanged. The admin
/// session is closed before returning on every path.
pub async fn ensure_database_exists<D: PgDriver>(
    driver: &D,
    config: &PgConfig,
) -> Result<ProvisionOutcome, DbConnectorError> {
    let name = DbName::parse(&config.db_name)?;
    let admin_spec = config.admin_conn_spec();

    let session = driver
        .open(&admin_spec)
        .await
        .map_err(|source| provisioning_error(&name, source))?;

    let result = ensure_with_session(&session, &name).await;

    if let Err(e) = session.close().await {
        warn!(error = %e, admin_db = %admin_spec, "admin_session=close_failed");
    }

    result.map_err(|source| provisioning_error(&name, source))
}

async fn ensure_with_session<S: PgSession>(
    session: &S,
    name: &DbName,
) -> Result<ProvisionOutcome, DbErr> {
    if session.database_exists(name).await? {
        debug!("provision=exists database={}", name);
        return Ok(ProvisionOutcome::AlreadyExists);
    }

    match session.create_database(name).await {
        Ok(()) => {
            info!("provision=created database={}", name);
            Ok(ProvisionOutcome::Created)
        }
        Err(e) if is_duplicate_database(&e) => {
            info!("provision=exists database={} raced=true", name);
            Ok(ProvisionOutcome::AlreadyExists)
        }
        Err(e) => Err(e),
    }
}

fn provisioning_error(name: &DbName, source: DbErr) -> DbConnectorError {
    DbConnectorError::Provisioning {
        database: name.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_database_detection() {
        assert!(is_duplicate_database(&DbErr::Custom(
            "error returned from database: database \"appdb\" already exists".to_string()
        )));
        assert!(is_duplicate_database(&DbErr::Custom(
            "SQLSTATE(42P04)".to_string()
        )));
        assert!(!is_duplicate_database(&DbErr::Custom(
            "permission denied to create database".to_string()
        )));
    }
}
