//! Idempotent database creation against the in-memory stub server.

mod common;

use db_connector::{ensure_database_exists, DbConnectorError, PgConfig, ProvisionOutcome};
use db_test_support::StubDriver;

use crate::common::appdb_config;

#[tokio::test]
async fn test_absent_database_is_created_once() -> Result<(), Box<dyn std::error::Error>> {
    let driver = StubDriver::new();

    let outcome = ensure_database_exists(&driver, &appdb_config()).await?;

    assert_eq!(outcome, ProvisionOutcome::Created);
    assert!(driver.has_database("appdb"));
    let calls = driver.calls();
    assert_eq!(calls.creates, 1);
    assert_eq!(calls.exists_queries, 1);
    assert_eq!(calls.admin_opens, 1);
    assert_eq!(calls.target_opens, 0);
    Ok(())
}

#[tokio::test]
async fn test_second_call_is_a_no_op() -> Result<(), Box<dyn std::error::Error>> {
    let driver = StubDriver::new();
    let config = appdb_config();

    let first = ensure_database_exists(&driver, &config).await?;
    let second = ensure_database_exists(&driver, &config).await?;

    assert_eq!(first, ProvisionOutcome::Created);
    assert_eq!(second, ProvisionOutcome::AlreadyExists);
    assert_eq!(driver.calls().creates, 1);
    Ok(())
}

#[tokio::test]
async fn test_existing_database_is_left_alone() -> Result<(), Box<dyn std::error::Error>> {
    let driver = StubDriver::new().with_existing_database("appdb");

    let outcome = ensure_database_exists(&driver, &appdb_config()).await?;

    assert_eq!(outcome, ProvisionOutcome::AlreadyExists);
    assert_eq!(driver.calls().creates, 0);
    Ok(())
}

#[tokio::test]
async fn test_admin_session_closed_on_success() -> Result<(), Box<dyn std::error::Error>> {
    let driver = StubDriver::new();

    ensure_database_exists(&driver, &appdb_config()).await?;

    let calls = driver.calls();
    assert_eq!(calls.closes, 1);
    assert_eq!(calls.open_sessions(), 0);
    Ok(())
}

#[tokio::test]
async fn test_admin_session_closed_when_create_fails() {
    let driver = StubDriver::new().failing_creates(1);

    let err = ensure_database_exists(&driver, &appdb_config())
        .await
        .unwrap_err();

    match err {
        DbConnectorError::Provisioning { database, source } => {
            assert_eq!(database, "appdb");
            assert!(source.to_string().contains("permission denied"));
        }
        other => panic!("expected provisioning error, got {other:?}"),
    }
    let calls = driver.calls();
    assert_eq!(calls.closes, 1);
    assert_eq!(calls.open_sessions(), 0);
    assert!(!driver.has_database("appdb"));
}

#[tokio::test]
async fn test_admin_connection_failure_is_a_provisioning_error() {
    let driver = StubDriver::new().failing_admin_opens(1);

    let err = ensure_database_exists(&driver, &appdb_config())
        .await
        .unwrap_err();

    assert!(matches!(err, DbConnectorError::Provisioning { .. }));
    assert!(err.is_retryable());
    let calls = driver.calls();
    assert_eq!(calls.admin_open_failures, 1);
    assert_eq!(calls.exists_queries, 0);
    assert_eq!(calls.closes, 0);
}

#[tokio::test]
async fn test_unsafe_name_is_rejected_before_connecting() {
    let driver = StubDriver::new();
    let config = PgConfig {
        db_name: "appdb; DROP DATABASE postgres".to_string(),
        ..appdb_config()
    };

    let err = ensure_database_exists(&driver, &config).await.unwrap_err();

    assert!(matches!(err, DbConnectorError::Config { .. }));
    assert_eq!(driver.calls().total(), 0);
}
