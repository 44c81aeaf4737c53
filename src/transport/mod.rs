//! Execution back-ends for talking to the block-storage service.
//!
//! [`Transport`] is the single contract the lifecycle orchestrator relies
//! on. [`cli::CliTransport`] shells out to the command-line client and parses
//! its tables; [`api::ApiTransport`] drives the REST resource managers
//! directly. Both yield the same [`ResourceHandle`] shape.

pub mod api;
pub mod cli;
pub mod http;

use thiserror::Error;

use crate::auth::AuthError;
use crate::command::CommandError;
use crate::resource::{CreateRequest, ResourceHandle, ResourceKind};

pub use api::{ApiTransport, BlockStorageApi, HttpMethod, ResourceManager};
pub use cli::CliTransport;
pub use http::HttpBlockStorage;

/// Errors surfaced by either transport.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TransportError {
    /// Raised when the command-line client exits with a non-zero status.
    #[error("command '{command}' failed with status {status}\nstdout:\n{stdout}\nstderr:\n{stderr}")]
    CommandFailed {
        /// Rendered invocation, secrets masked.
        command: String,
        /// Exit status text.
        status: String,
        /// Captured standard output.
        stdout: String,
        /// Captured standard error.
        stderr: String,
    },
    /// Raised when the remote object does not exist.
    #[error("{kind} '{id}' not found")]
    NotFound {
        /// Kind that was looked up.
        kind: ResourceKind,
        /// Identifier that was looked up.
        id: String,
    },
    /// Raised when the command-line client cannot be started.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that could not be started.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the API answers with an error status.
    #[error("block-storage API returned {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Message extracted from the error envelope.
        message: String,
    },
    /// Raised when an HTTP request cannot be sent or its body read.
    #[error("HTTP request failed: {0}")]
    Http(String),
    /// Raised when a response cannot be interpreted.
    #[error("could not parse {context}: {message}")]
    Parse {
        /// What was being parsed.
        context: String,
        /// Why parsing failed.
        message: String,
    },
    /// Raised for operations a resource kind does not support.
    #[error("{operation} is not supported for {kind}")]
    Unsupported {
        /// Kind the operation was attempted on.
        kind: ResourceKind,
        /// Operation name.
        operation: String,
    },
    /// Raised when authentication parameters are missing or rejected.
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl TransportError {
    /// Returns `true` for [`TransportError::NotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Text a failure assertion matches against: captured output for command
    /// failures, the service message for API errors, the rendered error
    /// otherwise.
    #[must_use]
    pub fn failure_text(&self) -> String {
        match self {
            Self::CommandFailed { stdout, stderr, .. } => format!("{stderr}\n{stdout}"),
            Self::Api { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<CommandError> for TransportError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::NotInstalled { program } => Self::Spawn {
                message: String::from("program not found"),
                program,
            },
            CommandError::Spawn { program, message } => Self::Spawn { program, message },
        }
    }
}

/// Create/get/delete/extend contract shared by the transports.
pub trait Transport {
    /// Short label used in logs.
    fn label(&self) -> &'static str;

    /// Creates a resource and returns its first observed state.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the service rejects the request.
    fn create(
        &self,
        kind: ResourceKind,
        request: &CreateRequest,
    ) -> Result<ResourceHandle, TransportError>;

    /// Fetches the current state of a resource.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotFound`] when the resource is absent.
    fn get(&self, kind: ResourceKind, id: &str) -> Result<ResourceHandle, TransportError>;

    /// Requests deletion of a resource.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotFound`] when the resource is absent.
    fn delete(&self, kind: ResourceKind, id: &str) -> Result<(), TransportError>;

    /// Requests a size change for a volume. The size is passed verbatim so
    /// malformed values reach the service.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Unsupported`] for non-volume handles.
    fn extend(&self, handle: &ResourceHandle, new_size: &str) -> Result<(), TransportError>;

    /// Reports whether the resource still exists.
    ///
    /// # Errors
    ///
    /// Propagates any failure other than [`TransportError::NotFound`].
    fn exists(&self, kind: ResourceKind, id: &str) -> Result<bool, TransportError> {
        match self.get(kind, id) {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }
}

impl<T: Transport + ?Sized> Transport for &T {
    fn label(&self) -> &'static str {
        (**self).label()
    }

    fn create(
        &self,
        kind: ResourceKind,
        request: &CreateRequest,
    ) -> Result<ResourceHandle, TransportError> {
        (**self).create(kind, request)
    }

    fn get(&self, kind: ResourceKind, id: &str) -> Result<ResourceHandle, TransportError> {
        (**self).get(kind, id)
    }

    fn delete(&self, kind: ResourceKind, id: &str) -> Result<(), TransportError> {
        (**self).delete(kind, id)
    }

    fn extend(&self, handle: &ResourceHandle, new_size: &str) -> Result<(), TransportError> {
        (**self).extend(handle, new_size)
    }

    fn exists(&self, kind: ResourceKind, id: &str) -> Result<bool, TransportError> {
        (**self).exists(kind, id)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn label(&self) -> &'static str {
        (**self).label()
    }

    fn create(
        &self,
        kind: ResourceKind,
        request: &CreateRequest,
    ) -> Result<ResourceHandle, TransportError> {
        (**self).create(kind, request)
    }

    fn get(&self, kind: ResourceKind, id: &str) -> Result<ResourceHandle, TransportError> {
        (**self).get(kind, id)
    }

    fn delete(&self, kind: ResourceKind, id: &str) -> Result<(), TransportError> {
        (**self).delete(kind, id)
    }

    fn extend(&self, handle: &ResourceHandle, new_size: &str) -> Result<(), TransportError> {
        (**self).extend(handle, new_size)
    }

    fn exists(&self, kind: ResourceKind, id: &str) -> Result<bool, TransportError> {
        (**self).exists(kind, id)
    }
}
