//! Functional lifecycle harness for the Cinder block-storage service.
//!
//! The crate drives volumes, snapshots, and backups through one of two
//! transports (the `cinder` command-line client or the REST API), waits for
//! them to settle, verifies their properties, and guarantees cleanup through
//! a registry that tears down whatever a scenario leaves behind.

pub mod auth;
pub mod command;
pub mod config;
pub mod connector;
pub mod credentials;
pub mod lifecycle;
pub mod parser;
pub mod resource;
pub mod scenario;
pub mod test_support;
pub mod transport;

pub use auth::{AuthError, AuthMethod, NoAuthOptions, NoAuthPlugin, PasswordAuth, Session};
pub use command::{CommandError, CommandOutput, CommandRunner, ProcessCommandRunner};
pub use config::{ConfigError, HarnessConfig, TransportKind};
pub use connector::{
    AttachLibrary, ConnectorError, ConnectorProperties, ConnectorRequest, HelperAttachLibrary,
};
pub use credentials::{Credentials, CredentialsError};
pub use lifecycle::{Lifecycle, LifecycleError, PollPolicy, TeardownSummary};
pub use resource::{CreateRequest, ResourceHandle, ResourceKind};
pub use scenario::{
    FailureCase, FailureFixtures, Scenario, ScenarioError, ScenarioOutcome, ScenarioRunner,
    Verdict,
};
pub use transport::{ApiTransport, CliTransport, HttpBlockStorage, Transport, TransportError};
