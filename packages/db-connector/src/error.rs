use sea_orm::DbErr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbConnectorError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("failed to provision database '{database}': {source}")]
    Provisioning {
        database: String,
        #[source]
        source: DbErr,
    },

    #[error("failed to connect to {descriptor}: {source}")]
    Connect {
        descriptor: String,
        #[source]
        source: DbErr,
    },

    #[error(
        "failed to connect to {descriptor} after {attempts} attempt(s) in {elapsed_ms}ms: {source}"
    )]
    RetriesExhausted {
        descriptor: String,
        attempts: u32,
        elapsed_ms: u128,
        #[source]
        source: Box<DbConnectorError>,
    },

    #[error("failed to start ephemeral instance: {message}")]
    InstanceStart { message: String },

    #[error("failed to terminate ephemeral instance: {message}")]
    InstanceTerminate { message: String },
}

impl DbConnectorError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Failures that the bootstrap retry loop absorbs per attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Provisioning { .. } | Self::Connect { .. })
    }

    /// Innermost connector error, looking through `RetriesExhausted`.
    pub fn last_failure(&self) -> &DbConnectorError {
        match self {
            Self::RetriesExhausted { source, .. } => source.last_failure(),
            other => other,
        }
    }
}
