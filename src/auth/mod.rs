//! Identity handling for the API transport.
//!
//! Two methods are supported: password authentication against the identity
//! service ([`keystone`]) and the header-based no-auth plugin used by
//! deployments that run the block-storage service without identity
//! ([`noauth`]). Both produce a [`Session`]: a token, the block-storage
//! endpoint, and any extra headers to send with every request.

pub mod keystone;
pub mod noauth;

use std::fmt;

use thiserror::Error;

pub use keystone::PasswordAuth;
pub use noauth::{NoAuthOptions, NoAuthPlugin};

/// Errors raised while configuring or performing authentication.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum AuthError {
    /// Raised when a required identity parameter is absent.
    #[error("missing {parameter}: {hint}")]
    MissingParameter {
        /// Parameter that has no value.
        parameter: String,
        /// How to provide it.
        hint: String,
    },
    /// Raised when the identity service rejects the request.
    #[error("identity service returned {status}: {message}")]
    Identity {
        /// HTTP status code.
        status: u16,
        /// Response body or error message.
        message: String,
    },
    /// Raised when the service catalog has no block-storage endpoint.
    #[error("no public endpoint for any of [{service_types}] in the service catalog")]
    EndpointNotFound {
        /// Service types that were searched.
        service_types: String,
    },
    /// Raised when the identity request cannot be sent or decoded.
    #[error("identity request failed: {0}")]
    Http(String),
}

/// Authenticated context for block-storage requests.
#[derive(Clone, Eq, PartialEq)]
pub struct Session {
    token: String,
    endpoint: String,
    headers: Vec<(String, String)>,
}

impl Session {
    /// Builds a session from its parts.
    #[must_use]
    pub fn new(token: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            endpoint: endpoint.into(),
            headers: Vec::new(),
        }
    }

    /// Adds a header sent with every request.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Token sent as `X-Auth-Token`.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Block-storage endpoint, without a trailing slash.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        self.endpoint.trim_end_matches('/')
    }

    /// Additional headers.
    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"***")
            .field("endpoint", &self.endpoint)
            .field("headers", &self.headers)
            .finish()
    }
}

/// Authentication method selected once at startup.
#[derive(Clone, Debug)]
pub enum AuthMethod {
    /// Username/password against the identity service.
    Password(PasswordAuth),
    /// Trusted headers, no identity service involved.
    NoAuth(NoAuthPlugin),
}

impl AuthMethod {
    /// Obtains a session, contacting the identity service when required.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] when the identity service rejects the request or
    /// its catalog lacks a block-storage endpoint.
    pub fn authenticate(&self, http: &reqwest::blocking::Client) -> Result<Session, AuthError> {
        match self {
            Self::Password(auth) => auth.authenticate(http),
            Self::NoAuth(plugin) => Ok(plugin.session()),
        }
    }
}
