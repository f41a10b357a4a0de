use std::process::exit;
use std::time::Duration;

use clap::{Parser, Subcommand};
use db_connector::db::{
    parse_ssl_mode, ENV_DB_NAME, ENV_HOST, ENV_PASSWORD, ENV_PORT, ENV_SSL_MODE, ENV_USER,
};
use db_connector::{
    connect, ensure_database_exists, retry, DbConnectorError, PgConfig, RetryPolicy,
    SeaOrmDriver,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "db_bootstrap=info,db_connector=info,sqlx=warn";

#[derive(Subcommand, Clone, Copy, Debug, PartialEq, Eq)]
enum Command {
    /// Load and validate the configuration, print the redacted target
    CheckConfig,
    /// Create the target database if it does not exist
    Ensure,
    /// Create the database if needed, open a connection and close it again
    Connect,
}

#[derive(Parser, Debug)]
#[command(name = "db-bootstrap")]
#[command(about = "Provision a Postgres database and verify it accepts connections")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Server host
    #[arg(long, global = true, env = ENV_HOST, default_value = "localhost")]
    host: String,

    /// Server port
    #[arg(long, global = true, env = ENV_PORT, default_value_t = 5432)]
    port: u16,

    /// Role to connect as
    #[arg(long, global = true, env = ENV_USER)]
    user: Option<String>,

    /// Target database name
    #[arg(long, global = true, env = ENV_DB_NAME)]
    db_name: Option<String>,

    /// Require TLS: true/false/require/disable
    #[arg(
        long,
        global = true,
        env = ENV_SSL_MODE,
        action = clap::ArgAction::Set,
        value_parser = ssl_mode_arg,
        default_value = "false"
    )]
    ssl_mode: bool,

    /// Total connection attempts, including the first
    #[arg(long, global = true, env = "DB_CONNECT_MAX_ATTEMPTS")]
    max_attempts: Option<u32>,

    /// Ceiling on total retry time in milliseconds
    #[arg(long, global = true, env = "DB_CONNECT_MAX_ELAPSED_MS")]
    max_elapsed_ms: Option<u64>,
}

fn ssl_mode_arg(raw: &str) -> Result<bool, String> {
    parse_ssl_mode(raw).ok_or_else(|| format!("expected true/false/require/disable, got '{raw}'"))
}

impl Args {
    /// The password is only read from the environment so it never shows up
    /// in process listings.
    fn pg_config(&self) -> Result<PgConfig, DbConnectorError> {
        let required = |value: &Option<String>, flag: &str, var: &str| {
            value.clone().ok_or_else(|| {
                DbConnectorError::config(format!("--{flag} or {var} is required"))
            })
        };
        let password = std::env::var(ENV_PASSWORD).map_err(|_| {
            DbConnectorError::config(format!(
                "Required environment variable '{ENV_PASSWORD}' is not set"
            ))
        })?;

        let config = PgConfig {
            host: self.host.clone(),
            port: self.port,
            user: required(&self.user, "user", ENV_USER)?,
            db_name: required(&self.db_name, "db-name", ENV_DB_NAME)?,
            password,
            ssl_mode: self.ssl_mode,
        };
        config.validate()?;
        Ok(config)
    }

    fn retry_policy(&self) -> RetryPolicy {
        let mut policy = RetryPolicy::default();
        if let Some(max_attempts) = self.max_attempts {
            policy = policy.with_max_attempts(max_attempts);
        }
        if let Some(ms) = self.max_elapsed_ms {
            policy = policy.with_max_elapsed_time(Duration::from_millis(ms));
        }
        policy
    }
}

#[tokio::main]
async fn main() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_line_number(false)
        .with_file(false)
        .with_env_filter(filter)
        .init();

    // clap exits with 2 on usage errors and 0 for --help
    let args = Args::try_parse().unwrap_or_else(|e| e.exit());

    let config = match args.pg_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            exit(2);
        }
    };
    let policy = args.retry_policy();
    let driver = SeaOrmDriver::default();

    match args.command {
        Command::CheckConfig => {
            println!("{}", config.conn_spec());
            println!(
                "retry: max_attempts={} max_elapsed_ms={}",
                policy.max_attempts,
                policy.max_elapsed_time.as_millis()
            );
        }
        Command::Ensure => {
            match retry(&policy, || ensure_database_exists(&driver, &config)).await {
                Ok(outcome) => info!("ensure=done db={} outcome={:?}", config.db_name, outcome),
                Err(e) => {
                    eprintln!("Provisioning failed: {e}");
                    exit(1);
                }
            }
        }
        Command::Connect => match connect(&driver, &config, &policy).await {
            Ok(mut handle) => {
                handle.close().await;
                println!("connected: {}", handle.descriptor());
            }
            Err(e) => {
                eprintln!("Connection failed: {e}");
                exit(1);
            }
        },
    }
}
