//! In-process stand-ins for the database driver and the instance launcher.
//!
//! Both keep call counters behind an `Arc`, so a test can hand a clone to the
//! code under test and inspect the counts afterwards.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use db_connector::config::db::ADMIN_DB;
use db_connector::{ConnSpec, DbConnectorError, DbName, PgDriver, PgSession};
use sea_orm::DbErr;

use crate::instance::{InstanceLauncher, InstanceSpec, RunningInstance};

/// Consume one unit of an injected-failure budget.
fn take_one(budget: &AtomicUsize) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::SeqCst);
}

/// Snapshot of every call a [`StubDriver`] has seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StubCalls {
    pub admin_opens: usize,
    pub admin_open_failures: usize,
    pub target_opens: usize,
    pub target_open_failures: usize,
    pub exists_queries: usize,
    pub creates: usize,
    pub closes: usize,
}

impl StubCalls {
    /// Every call that would have reached a real server.
    pub fn total(&self) -> usize {
        self.admin_opens
            + self.admin_open_failures
            + self.target_opens
            + self.target_open_failures
            + self.exists_queries
            + self.creates
            + self.closes
    }

    /// Sessions opened successfully and not yet closed.
    pub fn open_sessions(&self) -> usize {
        (self.admin_opens + self.target_opens).saturating_sub(self.closes)
    }
}

#[derive(Debug, Default)]
struct DriverState {
    databases: Mutex<HashSet<String>>,
    fail_admin_opens: AtomicUsize,
    fail_target_opens: AtomicUsize,
    fail_creates: AtomicUsize,
    always_fail: AtomicBool,
    admin_opens: AtomicUsize,
    admin_open_failures: AtomicUsize,
    target_opens: AtomicUsize,
    target_open_failures: AtomicUsize,
    exists_queries: AtomicUsize,
    creates: AtomicUsize,
    closes: AtomicUsize,
}

/// Fake Postgres server with a catalog held in memory.
///
/// The catalog always contains `postgres`. Opening a session to a database
/// that is not in the catalog fails, like a real server would.
#[derive(Debug, Clone, Default)]
pub struct StubDriver {
    state: Arc<DriverState>,
}

impl StubDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_existing_database(self, name: &str) -> Self {
        self.databases().insert(name.to_string());
        self
    }

    /// The next `count` opens of the admin database fail.
    pub fn failing_admin_opens(self, count: usize) -> Self {
        self.state.fail_admin_opens.store(count, Ordering::SeqCst);
        self
    }

    /// The next `count` opens of a non-admin database fail.
    pub fn failing_target_opens(self, count: usize) -> Self {
        self.state.fail_target_opens.store(count, Ordering::SeqCst);
        self
    }

    /// The next `count` create statements fail.
    pub fn failing_creates(self, count: usize) -> Self {
        self.state.fail_creates.store(count, Ordering::SeqCst);
        self
    }

    /// Every open fails, as if the server never came up.
    pub fn unreachable(self) -> Self {
        self.state.always_fail.store(true, Ordering::SeqCst);
        self
    }

    pub fn has_database(&self, name: &str) -> bool {
        name == ADMIN_DB || self.databases().contains(name)
    }

    pub fn calls(&self) -> StubCalls {
        let s = &self.state;
        StubCalls {
            admin_opens: s.admin_opens.load(Ordering::SeqCst),
            admin_open_failures: s.admin_open_failures.load(Ordering::SeqCst),
            target_opens: s.target_opens.load(Ordering::SeqCst),
            target_open_failures: s.target_open_failures.load(Ordering::SeqCst),
            exists_queries: s.exists_queries.load(Ordering::SeqCst),
            creates: s.creates.load(Ordering::SeqCst),
            closes: s.closes.load(Ordering::SeqCst),
        }
    }

    fn databases(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.state.databases.lock().expect("stub catalog poisoned")
    }

    fn refuse(&self, spec: &ConnSpec, failures: &AtomicUsize) -> DbErr {
        bump(failures);
        DbErr::Custom(format!(
            "connection refused: {}:{} is not accepting connections",
            spec.host, spec.port
        ))
    }
}

#[async_trait]
impl PgDriver for StubDriver {
    type Session = StubSession;

    async fn open(&self, spec: &ConnSpec) -> Result<StubSession, DbErr> {
        let s = &self.state;
        let is_admin = spec.database == ADMIN_DB;

        if s.always_fail.load(Ordering::SeqCst) {
            let failures = if is_admin {
                &s.admin_open_failures
            } else {
                &s.target_open_failures
            };
            return Err(self.refuse(spec, failures));
        }

        if is_admin {
            if take_one(&s.fail_admin_opens) {
                return Err(self.refuse(spec, &s.admin_open_failures));
            }
            bump(&s.admin_opens);
        } else {
            if take_one(&s.fail_target_opens) {
                return Err(self.refuse(spec, &s.target_open_failures));
            }
            if !self.has_database(&spec.database) {
                bump(&s.target_open_failures);
                return Err(DbErr::Custom(format!(
                    "database \"{}\" does not exist",
                    spec.database
                )));
            }
            bump(&s.target_opens);
        }

        Ok(StubSession {
            driver: self.clone(),
            database: spec.database.clone(),
        })
    }
}

/// Session handed out by [`StubDriver`].
#[derive(Debug)]
pub struct StubSession {
    driver: StubDriver,
    database: String,
}

impl StubSession {
    pub fn database(&self) -> &str {
        &self.database
    }
}

#[async_trait]
impl PgSession for StubSession {
    async fn database_exists(&self, name: &DbName) -> Result<bool, DbErr> {
        bump(&self.driver.state.exists_queries);
        Ok(self.driver.has_database(name.as_str()))
    }

    async fn create_database(&self, name: &DbName) -> Result<(), DbErr> {
        let s = &self.driver.state;
        bump(&s.creates);
        if take_one(&s.fail_creates) {
            return Err(DbErr::Custom(
                "permission denied to create database".to_string(),
            ));
        }
        if !self.driver.databases().insert(name.to_string()) {
            return Err(DbErr::Custom(format!(
                "database \"{name}\" already exists"
            )));
        }
        Ok(())
    }

    async fn close(self) -> Result<(), DbErr> {
        bump(&self.driver.state.closes);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct LauncherState {
    fail_start: AtomicBool,
    fail_terminate: AtomicBool,
    starts: AtomicUsize,
    terminates: AtomicUsize,
}

/// Launcher that pretends to start an instance at a fixed address.
#[derive(Debug, Clone)]
pub struct StubLauncher {
    host: String,
    port: u16,
    state: Arc<LauncherState>,
}

impl Default for StubLauncher {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 49_153,
            state: Arc::default(),
        }
    }
}

impl StubLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_start(self) -> Self {
        self.state.fail_start.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_terminate(self) -> Self {
        self.state.fail_terminate.store(true, Ordering::SeqCst);
        self
    }

    pub fn starts(&self) -> usize {
        self.state.starts.load(Ordering::SeqCst)
    }

    pub fn terminates(&self) -> usize {
        self.state.terminates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InstanceLauncher for StubLauncher {
    async fn start(&self, spec: &InstanceSpec) -> Result<Box<dyn RunningInstance>, DbConnectorError> {
        if self.state.fail_start.load(Ordering::SeqCst) {
            return Err(DbConnectorError::InstanceStart {
                message: format!("image {}:{} could not be started", spec.image, spec.tag),
            });
        }
        bump(&self.state.starts);
        Ok(Box::new(StubInstance {
            id: format!("stub-{}", self.starts()),
            host: self.host.clone(),
            port: self.port,
            state: Arc::clone(&self.state),
        }))
    }
}

struct StubInstance {
    id: String,
    host: String,
    port: u16,
    state: Arc<LauncherState>,
}

#[async_trait]
impl RunningInstance for StubInstance {
    fn id(&self) -> &str {
        &self.id
    }

    async fn host(&self) -> Result<String, DbConnectorError> {
        Ok(self.host.clone())
    }

    async fn mapped_port(&self) -> Result<u16, DbConnectorError> {
        Ok(self.port)
    }

    async fn terminate(self: Box<Self>) -> Result<(), DbConnectorError> {
        bump(&self.state.terminates);
        if self.state.fail_terminate.load(Ordering::SeqCst) {
            return Err(DbConnectorError::InstanceTerminate {
                message: format!("instance {} did not stop", self.id),
            });
        }
        Ok(())
    }
}
