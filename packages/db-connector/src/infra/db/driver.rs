use std::time::Duration;

use async_trait::async_trait;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, DbErr,
    Statement, Value,
};
use tracing::debug;

use crate::config::db::{ConnSpec, DbName};

pub const DATABASE_EXISTS_SQL: &str =
    "SELECT 1 AS present FROM pg_catalog.pg_database WHERE datname = $1";

/// One open session to a Postgres server.
#[async_trait]
pub trait PgSession: Send + Sync + Sized {
    /// Catalog lookup for a database with exactly this name.
    async fn database_exists(&self, name: &DbName) -> Result<bool, DbErr>;

    async fn create_database(&self, name: &DbName) -> Result<(), DbErr>;

    /// Release the server-side session.
    async fn close(self) -> Result<(), DbErr>;
}

/// Opens sessions from a connection descriptor.
///
/// Every bootstrap path goes through this seam so the retry and
/// provisioning logic can be exercised without a server.
#[async_trait]
pub trait PgDriver: Send + Sync {
    type Session: PgSession;

    async fn open(&self, spec: &ConnSpec) -> Result<Self::Session, DbErr>;
}

/// Driver backed by SeaORM (sqlx Postgres).
#[derive(Debug, Clone)]
pub struct SeaOrmDriver {
    max_connections: u32,
    connect_timeout: Duration,
}

impl Default for SeaOrmDriver {
    fn default() -> Self {
        Self {
            max_connections: 1,
            connect_timeout: Duration::from_secs(2),
        }
    }
}

impl SeaOrmDriver {
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

#[async_trait]
impl PgDriver for SeaOrmDriver {
    type Session = DatabaseConnection;

    async fn open(&self, spec: &ConnSpec) -> Result<DatabaseConnection, DbErr> {
        debug!(target_db = %spec, "driver=open");

        let mut opt = ConnectOptions::new(spec.url());
        opt.min_connections(1)
            .max_connections(self.max_connections)
            .connect_timeout(self.connect_timeout)
            .acquire_timeout(self.connect_timeout)
            .sqlx_logging(false);

        Database::connect(opt).await
    }
}

#[async_trait]
impl PgSession for DatabaseConnection {
    async fn database_exists(&self, name: &DbName) -> Result<bool, DbErr> {
        let stmt = Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            DATABASE_EXISTS_SQL,
            [Value::from(name.as_str())],
        );
        Ok(self.query_one(stmt).await?.is_some())
    }

    async fn create_database(&self, name: &DbName) -> Result<(), DbErr> {
        // Identifiers cannot be bound as parameters; `DbName` is allow-listed.
        let stmt = Statement::from_string(
            DatabaseBackend::Postgres,
            format!("CREATE DATABASE {}", name.quoted()),
        );
        self.execute(stmt).await?;
        Ok(())
    }

    async fn close(self) -> Result<(), DbErr> {
        DatabaseConnection::close(self).await
    }
}
