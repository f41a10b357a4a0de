//! Test support for the database bootstrap.
//!
//! Provides ephemeral Postgres instances bound to a test scope, call-counting
//! stubs for the driver and launcher seams, unique database names and the
//! shared test logging setup.

pub mod instance;
pub mod logging;
pub mod scope;
pub mod stub;
pub mod unique_helpers;

pub use instance::{InstanceLauncher, InstanceSpec, RunningInstance, TestcontainersLauncher};
pub use scope::{with_ephemeral_postgres, TestScope};
pub use stub::{StubCalls, StubDriver, StubLauncher, StubSession};
