use sea_orm::DatabaseConnection;
use tracing::{debug, info, warn};

use crate::config::db::PgConfig;
use crate::error::DbConnectorError;
use crate::infra::db::driver::{PgDriver, PgSession, SeaOrmDriver};
use crate::infra::db::provision::ensure_database_exists;
use crate::infra::db::retry::{retry, RetryPolicy};

/// A live session to the target database, owned by the caller.
///
/// The caller releases it with [`DbHandle::close`]; closing twice is a no-op.
#[derive(Debug)]
pub struct DbHandle<S: PgSession> {
    session: Option<S>,
    descriptor: String,
}

impl<S: PgSession> DbHandle<S> {
    pub fn new(session: S, descriptor: impl Into<String>) -> Self {
        Self {
            session: Some(session),
            descriptor: descriptor.into(),
        }
    }

    /// The open session, or `None` once closed.
    pub fn session(&self) -> Option<&S> {
        self.session.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_none()
    }

    /// Redacted connection descriptor this handle was opened with.
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// Take the session out, leaving the handle closed.
    pub fn into_session(mut self) -> Option<S> {
        self.session.take()
    }

    pub async fn close(&mut self) {
        let Some(session) = self.session.take() else {
            debug!(target_db = %self.descriptor, "handle=close already_closed=true");
            return;
        };

        match session.close().await {
            Ok(()) => debug!(target_db = %self.descriptor, "handle=closed"),
            Err(e) => warn!(error = %e, target_db = %self.descriptor, "handle=close_failed"),
        }
    }
}

/// Validate `config`, make sure the target database exists and open it.
///
/// The ensure-then-open sequence runs as one unit under `policy`, so a
/// server that is still starting up is retried transparently. Configuration
/// errors are returned before any driver call.
pub async fn connect<D: PgDriver>(
    driver: &D,
    config: &PgConfig,
    policy: &RetryPolicy,
) -> Result<DbHandle<D::Session>, DbConnectorError> {
    config.validate()?;

    let spec = config.conn_spec();
    let descriptor = spec.redacted();
    info!(
        "connect=start target={} max_attempts={} max_elapsed_ms={}",
        descriptor,
        policy.max_attempts,
        policy.max_elapsed_time.as_millis()
    );

    let spec = &spec;
    let target = descriptor.as_str();
    let result = retry(policy, || async move {
        ensure_database_exists(driver, config).await?;
        driver
            .open(spec)
            .await
            .map_err(|source| DbConnectorError::Connect {
                descriptor: target.to_string(),
                source,
            })
    })
    .await;

    match result {
        Ok(session) => {
            info!("connect=done target={}", descriptor);
            Ok(DbHandle::new(session, descriptor))
        }
        Err(exhausted) => Err(DbConnectorError::RetriesExhausted {
            descriptor,
            attempts: exhausted.attempts,
            elapsed_ms: exhausted.elapsed.as_millis(),
            source: Box::new(exhausted.last),
        }),
    }
}

/// [`connect`] with configuration and retry limits read from the environment
/// and the SeaORM driver.
pub async fn connect_from_env() -> Result<DbHandle<DatabaseConnection>, DbConnectorError> {
    let config = PgConfig::from_env()?;
    let policy = RetryPolicy::from_env()?;
    connect(&SeaOrmDriver::default(), &config, &policy).await
}
