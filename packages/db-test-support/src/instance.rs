//! Disposable Postgres servers for integration tests.

use std::time::Duration;

use async_trait::async_trait;
use db_connector::{DbConnectorError, PgConfig};
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};
use tracing::{debug, info};

/// What to start and how to reach the database inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSpec {
    pub image: String,
    pub tag: String,
    /// Port the server listens on inside the instance.
    pub container_port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    /// Log line that marks the server as accepting connections.
    ///
    /// The official postgres image prints it twice: once on stdout for the
    /// temporary server that runs init scripts, then on stderr for the real
    /// one. Startup waits for both.
    pub ready_message: String,
    pub startup_timeout: Duration,
}

impl InstanceSpec {
    pub fn postgres_default() -> Self {
        Self {
            image: "postgres".to_string(),
            tag: "latest".to_string(),
            container_port: 5432,
            database: "test_db".to_string(),
            user: "testcontainers".to_string(),
            password: "testcontainers".to_string(),
            ready_message: "database system is ready to accept connections".to_string(),
            startup_timeout: Duration::from_secs(5 * 60),
        }
    }

    /// Environment the official postgres image reads on first start.
    pub fn env_vars(&self) -> [(&'static str, &str); 3] {
        [
            ("POSTGRES_DB", self.database.as_str()),
            ("POSTGRES_USER", self.user.as_str()),
            ("POSTGRES_PASSWORD", self.password.as_str()),
        ]
    }

    /// Connection config for a running instance reachable at `host:port`.
    pub fn pg_config(&self, host: impl Into<String>, port: u16) -> PgConfig {
        PgConfig {
            host: host.into(),
            port,
            user: self.user.clone(),
            db_name: self.database.clone(),
            password: self.password.clone(),
            ssl_mode: false,
        }
    }
}

/// A started instance. Host and mapped port are only known once it runs.
#[async_trait]
pub trait RunningInstance: Send + Sync {
    fn id(&self) -> &str;

    async fn host(&self) -> Result<String, DbConnectorError>;

    /// Host-side port mapped to [`InstanceSpec::container_port`].
    async fn mapped_port(&self) -> Result<u16, DbConnectorError>;

    /// Stop and remove the instance.
    async fn terminate(self: Box<Self>) -> Result<(), DbConnectorError>;
}

/// Container-orchestration boundary.
#[async_trait]
pub trait InstanceLauncher: Send + Sync {
    /// Start an instance and wait until it reports ready.
    async fn start(&self, spec: &InstanceSpec)
        -> Result<Box<dyn RunningInstance>, DbConnectorError>;
}

/// Launches instances as Docker containers through testcontainers.
#[derive(Debug, Clone, Copy, Default)]
pub struct TestcontainersLauncher;

#[async_trait]
impl InstanceLauncher for TestcontainersLauncher {
    async fn start(
        &self,
        spec: &InstanceSpec,
    ) -> Result<Box<dyn RunningInstance>, DbConnectorError> {
        info!(
            "instance=starting image={}:{} port={}",
            spec.image, spec.tag, spec.container_port
        );

        let mut image = GenericImage::new(spec.image.as_str(), spec.tag.as_str())
            .with_exposed_port(spec.container_port.tcp());
        for condition in ready_conditions(spec) {
            image = image.with_wait_for(condition);
        }

        let mut request = image.with_startup_timeout(spec.startup_timeout);
        for (name, value) in spec.env_vars() {
            request = request.with_env_var(name, value);
        }

        let container = request
            .start()
            .await
            .map_err(|e| DbConnectorError::InstanceStart {
                message: format!("{}:{}: {}", spec.image, spec.tag, e),
            })?;

        let id = container.id().to_string();
        info!(container_id = %id, "instance=started");

        Ok(Box::new(ContainerInstance {
            id,
            container,
            container_port: spec.container_port,
        }))
    }
}

fn ready_conditions(spec: &InstanceSpec) -> Vec<WaitFor> {
    vec![
        WaitFor::message_on_stdout(spec.ready_message.as_str()),
        WaitFor::message_on_stderr(spec.ready_message.as_str()),
    ]
}

struct ContainerInstance {
    id: String,
    container: ContainerAsync<GenericImage>,
    container_port: u16,
}

#[async_trait]
impl RunningInstance for ContainerInstance {
    fn id(&self) -> &str {
        &self.id
    }

    async fn host(&self) -> Result<String, DbConnectorError> {
        self.container
            .get_host()
            .await
            .map(|host| host.to_string())
            .map_err(|e| DbConnectorError::InstanceStart {
                message: format!("failed to get container host: {e}"),
            })
    }

    async fn mapped_port(&self) -> Result<u16, DbConnectorError> {
        self.container
            .get_host_port_ipv4(self.container_port.tcp())
            .await
            .map_err(|e| DbConnectorError::InstanceStart {
                message: format!("failed to get exposed container port: {e}"),
            })
    }

    async fn terminate(self: Box<Self>) -> Result<(), DbConnectorError> {
        debug!(container_id = %self.id, "instance=terminating");
        let id = self.id.clone();
        self.container
            .rm()
            .await
            .map_err(|e| DbConnectorError::InstanceTerminate {
                message: format!("container {id}: {e}"),
            })
    }
}
