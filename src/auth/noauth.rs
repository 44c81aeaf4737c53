//! Header-based authentication for deployments running without identity.
//!
//! The block-storage service trusts `x-user-id`, `x-project-id` and
//! `x-roles` headers, and accepts a synthetic token of the form
//! `<user_id>:<project_id>`. Options come from the `--os-*` flags, each of
//! which falls back to a `CINDER_<OPT_NAME>` environment variable.

use super::{AuthError, Session};

/// Environment fallback for `--os-user-id`.
pub const USER_ID_ENV: &str = "CINDER_USER_ID";
/// Environment fallback for `--os-project-id`.
pub const PROJECT_ID_ENV: &str = "CINDER_PROJECT_ID";
/// Environment fallback for `--os-tenant-id`.
pub const TENANT_ID_ENV: &str = "CINDER_TENANT_ID";
/// Environment fallback for `--os-roles`.
pub const ROLES_ENV: &str = "CINDER_ROLES";
/// Environment fallback for `--os-endpoint`.
pub const ENDPOINT_ENV: &str = "CINDER_ENDPOINT";
/// Roles sent when none are configured.
pub const DEFAULT_ROLES: &str = "admin";

/// Raw plugin options as collected from flags and environment.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NoAuthOptions {
    /// User identifier.
    pub user_id: Option<String>,
    /// Project identifier.
    pub project_id: Option<String>,
    /// Legacy tenant identifier, used when no project id is given.
    pub tenant_id: Option<String>,
    /// Comma separated roles.
    pub roles: Option<String>,
    /// Block-storage endpoint.
    pub endpoint: Option<String>,
}

/// Validated no-auth plugin.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NoAuthPlugin {
    user_id: String,
    project_id: String,
    roles: String,
    endpoint: String,
}

impl NoAuthPlugin {
    /// Validates options into a plugin.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingParameter`] when the user id, both the
    /// project and tenant ids, or the endpoint are missing.
    pub fn new(options: NoAuthOptions) -> Result<Self, AuthError> {
        let present = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

        let project_id = present(options.project_id)
            .or_else(|| present(options.tenant_id))
            .ok_or_else(|| missing("project_id", "--os-project-id", PROJECT_ID_ENV))?;
        let user_id = present(options.user_id)
            .ok_or_else(|| missing("user_id", "--os-user-id", USER_ID_ENV))?;
        let endpoint = present(options.endpoint)
            .ok_or_else(|| missing("endpoint", "--os-endpoint", ENDPOINT_ENV))?;
        let roles = present(options.roles).unwrap_or_else(|| DEFAULT_ROLES.to_owned());

        Ok(Self {
            user_id,
            project_id,
            roles,
            endpoint,
        })
    }

    /// Synthetic bearer token.
    #[must_use]
    pub fn token(&self) -> String {
        format!("{}:{}", self.user_id, self.project_id)
    }

    /// Trusted identity headers.
    #[must_use]
    pub fn headers(&self) -> [(&'static str, &str); 3] {
        [
            ("x-user-id", self.user_id.as_str()),
            ("x-project-id", self.project_id.as_str()),
            ("x-roles", self.roles.as_str()),
        ]
    }

    /// Endpoint with the project id appended when it is not already the
    /// final path segment.
    #[must_use]
    pub fn endpoint(&self) -> String {
        let base = self.endpoint.trim_end_matches('/');
        if base.ends_with(&self.project_id) {
            base.to_owned()
        } else {
            format!("{base}/{}", self.project_id)
        }
    }

    /// Builds the request session.
    #[must_use]
    pub fn session(&self) -> Session {
        self.headers()
            .into_iter()
            .fold(Session::new(self.token(), self.endpoint()), |session, (name, value)| {
                session.with_header(name, value)
            })
    }
}

fn missing(parameter: &str, flag: &str, env_var: &str) -> AuthError {
    AuthError::MissingParameter {
        parameter: parameter.to_owned(),
        hint: format!("pass {flag} or set {env_var}"),
    }
}
