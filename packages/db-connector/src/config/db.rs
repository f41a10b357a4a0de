use std::env;
use std::fmt;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::error::DbConnectorError;

pub const ENV_HOST: &str = "POSTGRES_HOST";
pub const ENV_PORT: &str = "POSTGRES_PORT";
pub const ENV_USER: &str = "POSTGRES_USER";
pub const ENV_PASSWORD: &str = "POSTGRES_PASSWORD";
pub const ENV_DB_NAME: &str = "POSTGRES_DB";
pub const ENV_SSL_MODE: &str = "POSTGRES_SSL_MODE";

/// Database every Postgres server ships with; used for catalog lookups and
/// `CREATE DATABASE`.
pub const ADMIN_DB: &str = "postgres";

/// Postgres truncates identifiers beyond `NAMEDATALEN - 1` bytes.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Characters left unescaped in the userinfo part of the connection URL.
const USERINFO: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Connection parameters supplied by the application.
#[derive(Clone, PartialEq, Eq)]
pub struct PgConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub db_name: String,
    pub password: String,
    /// When set the connection requires TLS (`sslmode=require`), otherwise
    /// TLS is disabled (`sslmode=disable`).
    pub ssl_mode: bool,
}

impl fmt::Debug for PgConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("db_name", &self.db_name)
            .field("password", &"***")
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

impl PgConfig {
    /// Load the configuration from `POSTGRES_*` environment variables.
    ///
    /// Host and port default to `localhost:5432`, TLS defaults to off. User,
    /// password and database name are required.
    pub fn from_env() -> Result<Self, DbConnectorError> {
        Ok(Self {
            host: host(),
            port: port()?,
            user: must_var(ENV_USER)?,
            db_name: must_var(ENV_DB_NAME)?,
            password: must_var(ENV_PASSWORD)?,
            ssl_mode: ssl_mode()?,
        })
    }

    /// Checks the configuration without touching the network and returns the
    /// validated target database name.
    pub fn validate(&self) -> Result<DbName, DbConnectorError> {
        if self.db_name.is_empty() {
            return Err(DbConnectorError::config("database name is required"));
        }
        if self.host.is_empty() {
            return Err(DbConnectorError::config("database host is required"));
        }
        if self.port == 0 {
            return Err(DbConnectorError::config("database port must be non-zero"));
        }
        DbName::parse(&self.db_name)
    }

    /// Descriptor for the target database.
    pub fn conn_spec(&self) -> ConnSpec {
        self.spec_for(&self.db_name)
    }

    /// Descriptor for the administrative database on the same server.
    pub fn admin_conn_spec(&self) -> ConnSpec {
        self.spec_for(ADMIN_DB)
    }

    fn spec_for(&self, database: &str) -> ConnSpec {
        ConnSpec {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
            database: database.to_string(),
            ssl_mode: self.ssl_mode,
        }
    }
}

/// A database name that is safe to splice into `CREATE DATABASE`.
///
/// Only ASCII letters, digits and underscores are accepted, the first
/// character must not be a digit, and the length is capped at 63 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbName(String);

impl DbName {
    pub fn parse(name: &str) -> Result<Self, DbConnectorError> {
        if name.is_empty() {
            return Err(DbConnectorError::config("database name is required"));
        }
        if name.len() > MAX_IDENTIFIER_LEN {
            return Err(DbConnectorError::config(format!(
                "database name '{name}' exceeds {MAX_IDENTIFIER_LEN} bytes"
            )));
        }
        let mut chars = name.chars();
        let first_ok = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        if !first_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(DbConnectorError::config(format!(
                "database name '{name}' must match [A-Za-z_][A-Za-z0-9_]*"
            )));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Double-quoted identifier form. Quoting keeps the name's case, which
    /// matches how the catalog lookup compares `datname`.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl fmt::Display for DbName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Connection descriptor: everything needed to open one driver connection.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnSpec {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub ssl_mode: bool,
}

impl ConnSpec {
    /// Full connection URL. Contains the password; never log it.
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            utf8_percent_encode(&self.user, USERINFO),
            utf8_percent_encode(&self.password, USERINFO),
            self.url_host(),
            self.port,
            self.database,
            self.sslmode_param()
        )
    }

    /// Same shape as [`ConnSpec::url`] with the password masked.
    pub fn redacted(&self) -> String {
        format!(
            "postgres://{}:***@{}:{}/{}?sslmode={}",
            utf8_percent_encode(&self.user, USERINFO),
            self.url_host(),
            self.port,
            self.database,
            self.sslmode_param()
        )
    }

    fn sslmode_param(&self) -> &'static str {
        if self.ssl_mode {
            "require"
        } else {
            "disable"
        }
    }

    fn url_host(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }
}

impl fmt::Debug for ConnSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl fmt::Display for ConnSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

/// Get database host from environment (defaults to localhost)
fn host() -> String {
    env::var(ENV_HOST).unwrap_or_else(|_| "localhost".to_string())
}

/// Get database port from environment (defaults to 5432)
fn port() -> Result<u16, DbConnectorError> {
    match env::var(ENV_PORT) {
        Ok(raw) => raw.trim().parse::<u16>().map_err(|_| {
            DbConnectorError::config(format!("{ENV_PORT} must be a port number, got '{raw}'"))
        }),
        Err(_) => Ok(5432),
    }
}

fn ssl_mode() -> Result<bool, DbConnectorError> {
    let Ok(raw) = env::var(ENV_SSL_MODE) else {
        return Ok(false);
    };
    parse_ssl_mode(&raw).ok_or_else(|| {
        DbConnectorError::config(format!(
            "{ENV_SSL_MODE} must be one of true/false/require/disable, got '{raw}'"
        ))
    })
}

/// Accepts the boolean spellings plus the libpq mode names this crate maps to.
pub fn parse_ssl_mode(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "on" | "require" => Some(true),
        "false" | "0" | "off" | "disable" | "" => Some(false),
        _ => None,
    }
}

/// Get required environment variable or return error
fn must_var(name: &str) -> Result<String, DbConnectorError> {
    env::var(name).map_err(|_| {
        DbConnectorError::config(format!("Required environment variable '{name}' is not set"))
    })
}
