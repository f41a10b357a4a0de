//! Test scope owning ephemeral instances until the test ends.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use db_connector::{
    connect, DbConnectorError, DbHandle, PgDriver, RetryPolicy, SeaOrmDriver,
};
use futures::FutureExt;
use sea_orm::DatabaseConnection;
use tracing::{error, info};

use crate::instance::{InstanceLauncher, InstanceSpec, RunningInstance, TestcontainersLauncher};

/// Collects instances started during a test and tears them down at the end.
///
/// Clones share the same registry. Use [`TestScope::run`] so teardown happens
/// even when the test body fails or panics.
#[derive(Clone, Default)]
pub struct TestScope {
    instances: Arc<Mutex<Vec<Box<dyn RunningInstance>>>>,
}

impl TestScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `body` with a fresh scope, then terminate everything it started.
    ///
    /// A panic in `body` is re-raised after teardown. A failed teardown is
    /// fatal and panics, since a leaked instance must not go unnoticed.
    pub async fn run<F, Fut, T>(body: F) -> T
    where
        F: FnOnce(TestScope) -> Fut,
        Fut: Future<Output = T>,
    {
        let scope = TestScope::new();
        let outcome = AssertUnwindSafe(body(scope.clone())).catch_unwind().await;

        if let Err(e) = scope.finish().await {
            panic!("ephemeral instance teardown failed: {e}");
        }

        match outcome {
            Ok(value) => value,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    /// Hand an instance to the scope; it is terminated by [`TestScope::finish`].
    pub fn register(&self, instance: Box<dyn RunningInstance>) {
        self.registry().push(instance);
    }

    pub fn pending_teardowns(&self) -> usize {
        self.registry().len()
    }

    /// Start an instance, then bootstrap a connection to its database.
    ///
    /// A start failure returns before any connection attempt. Once started,
    /// the instance belongs to the scope whatever happens next. The connect
    /// step uses the same retry policy as production: a server that logged
    /// "ready" may still be finishing initialization.
    pub async fn start_ephemeral_instance<L, D>(
        &self,
        launcher: &L,
        spec: &InstanceSpec,
        driver: &D,
        policy: &RetryPolicy,
    ) -> Result<DbHandle<D::Session>, DbConnectorError>
    where
        L: InstanceLauncher + ?Sized,
        D: PgDriver,
    {
        let instance = launcher.start(spec).await?;

        let endpoint = match instance.host().await {
            Ok(host) => instance.mapped_port().await.map(|port| (host, port)),
            Err(e) => Err(e),
        };
        info!(instance_id = instance.id(), "instance=registered");
        self.register(instance);

        let (host, port) = endpoint?;
        let config = spec.pg_config(host, port);
        connect(driver, &config, policy).await
    }

    /// Terminate every registered instance, newest first, exactly once.
    ///
    /// All instances are attempted even if one fails; the first failure is
    /// returned.
    pub async fn finish(&self) -> Result<(), DbConnectorError> {
        let instances = std::mem::take(&mut *self.registry());

        let mut first_err = None;
        for instance in instances.into_iter().rev() {
            let id = instance.id().to_string();
            match instance.terminate().await {
                Ok(()) => info!(instance_id = %id, "instance=terminated"),
                Err(e) => {
                    error!(instance_id = %id, error = %e, "instance=terminate_failed");
                    first_err.get_or_insert(e);
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, Vec<Box<dyn RunningInstance>>> {
        self.instances.lock().expect("test scope registry poisoned")
    }
}

impl Drop for TestScope {
    fn drop(&mut self) {
        if Arc::strong_count(&self.instances) == 1 {
            if let Ok(instances) = self.instances.lock() {
                if !instances.is_empty() {
                    error!(
                        pending = instances.len(),
                        "test scope dropped with running instances; call finish() or use TestScope::run"
                    );
                }
            }
        }
    }
}

/// Start the default Postgres container, connect to it with the production
/// retry policy and run `body` with the live handle.
///
/// The container is removed when `body` completes or panics.
pub async fn with_ephemeral_postgres<F, Fut, T>(body: F) -> Result<T, DbConnectorError>
where
    F: FnOnce(DbHandle<DatabaseConnection>) -> Fut,
    Fut: Future<Output = T>,
{
    TestScope::run(|scope| async move {
        let handle = scope
            .start_ephemeral_instance(
                &TestcontainersLauncher,
                &InstanceSpec::postgres_default(),
                &SeaOrmDriver::default(),
                &RetryPolicy::default(),
            )
            .await?;
        Ok::<T, DbConnectorError>(body(handle).await)
    })
    .await
}
