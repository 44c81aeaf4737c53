//! Connection credentials gathered from the environment and a creds file.
//!
//! Environment variables always win. Any field left unset falls back to the
//! INI-style `functional_creds.conf` (`[admin]` for the user, password and
//! tenant, `[auth]` for the identity URL). Missing fields are not an error
//! here; [`Credentials::validate`] reports them when a transport is built.

use std::collections::BTreeMap;
use std::fmt;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

use crate::auth::AuthError;

/// Default creds file name, looked up relative to the working directory.
pub const CREDENTIALS_FILE: &str = "functional_creds.conf";

/// Username variable.
pub const USERNAME_ENV: &str = "OS_USERNAME";
/// Password variable.
pub const PASSWORD_ENV: &str = "OS_PASSWORD";
/// Legacy tenant name variable, checked first.
pub const TENANT_NAME_ENV: &str = "OS_TENANT_NAME";
/// Project name variable, used when the tenant variable is empty.
pub const PROJECT_NAME_ENV: &str = "OS_PROJECT_NAME";
/// Identity service URL variable.
pub const AUTH_URL_ENV: &str = "OS_AUTH_URL";
/// Block-storage API version variable.
pub const API_VERSION_ENV: &str = "OS_VOLUME_API_VERSION";

const ADMIN_SECTION: &str = "admin";
const AUTH_SECTION: &str = "auth";

/// Errors raised while reading the creds file.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum CredentialsError {
    /// Raised when the creds file exists but cannot be read.
    #[error("failed to read {path}: {message}")]
    Io {
        /// Path that could not be read.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
}

/// Identity parameters used by both transports.
#[derive(Clone, Default, Eq, PartialEq)]
pub struct Credentials {
    /// Identity service user name.
    pub username: Option<String>,
    /// Identity service password.
    pub password: Option<String>,
    /// Tenant (project) name to scope the token to.
    pub tenant_name: Option<String>,
    /// Identity service URL.
    pub auth_url: Option<String>,
    /// Requested block-storage API version (for example `3`).
    pub api_version: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("tenant_name", &self.tenant_name)
            .field("auth_url", &self.auth_url)
            .field("api_version", &self.api_version)
            .finish()
    }
}

/// Metadata for a required field, used to build actionable errors.
struct FieldMetadata {
    parameter: &'static str,
    env_var: &'static str,
    ini_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    const fn new(
        parameter: &'static str,
        env_var: &'static str,
        ini_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            parameter,
            env_var,
            ini_key,
            section,
        }
    }
}

impl Credentials {
    /// Resolves credentials from the process environment and the creds file
    /// at `path`. A missing file is treated as empty.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialsError::Io`] when the file exists but cannot be
    /// read.
    pub fn resolve(path: &Utf8Path) -> Result<Self, CredentialsError> {
        let contents = read_optional(path)?;
        let document = contents.as_deref().map(IniDocument::parse);
        Ok(Self::resolve_from(
            |key| std::env::var(key).ok(),
            document.as_ref(),
        ))
    }

    /// Resolves credentials from an arbitrary variable lookup and an
    /// optional parsed creds file.
    #[must_use]
    pub fn resolve_from(env: impl Fn(&str) -> Option<String>, file: Option<&IniDocument>) -> Self {
        let lookup = |key: &str| env(key).filter(|value| !value.trim().is_empty());
        let from_file = |section: &str, key: &str| {
            file.and_then(|doc| doc.get(section, key))
                .filter(|value| !value.trim().is_empty())
                .map(str::to_owned)
        };

        Self {
            username: lookup(USERNAME_ENV).or_else(|| from_file(ADMIN_SECTION, "user")),
            password: lookup(PASSWORD_ENV).or_else(|| from_file(ADMIN_SECTION, "pass")),
            tenant_name: lookup(TENANT_NAME_ENV)
                .or_else(|| lookup(PROJECT_NAME_ENV))
                .or_else(|| from_file(ADMIN_SECTION, "tenant")),
            auth_url: lookup(AUTH_URL_ENV).or_else(|| from_file(AUTH_SECTION, "uri")),
            api_version: lookup(API_VERSION_ENV),
        }
    }

    /// Checks that every parameter needed for password authentication is
    /// present.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingParameter`] naming the first absent field
    /// along with the environment variable and creds file key that set it.
    pub fn validate(&self) -> Result<(), AuthError> {
        Self::require(
            self.username.as_deref(),
            &FieldMetadata::new("username", USERNAME_ENV, "user", ADMIN_SECTION),
        )?;
        Self::require(
            self.password.as_deref(),
            &FieldMetadata::new("password", PASSWORD_ENV, "pass", ADMIN_SECTION),
        )?;
        Self::require(
            self.tenant_name.as_deref(),
            &FieldMetadata::new("tenant_name", TENANT_NAME_ENV, "tenant", ADMIN_SECTION),
        )?;
        Self::require(
            self.auth_url.as_deref(),
            &FieldMetadata::new("auth_url", AUTH_URL_ENV, "uri", AUTH_SECTION),
        )?;
        Ok(())
    }

    /// API version, defaulting to `3`.
    #[must_use]
    pub fn api_version_or_default(&self) -> &str {
        self.api_version.as_deref().unwrap_or("3")
    }

    fn require(value: Option<&str>, metadata: &FieldMetadata) -> Result<(), AuthError> {
        if value.is_some_and(|v| !v.trim().is_empty()) {
            return Ok(());
        }
        Err(AuthError::MissingParameter {
            parameter: metadata.parameter.to_owned(),
            hint: format!(
                "set {} or add `{}` to [{}] in {CREDENTIALS_FILE}",
                metadata.env_var, metadata.ini_key, metadata.section
            ),
        })
    }
}

/// Minimal INI document: `[section]` headers, `key = value` or `key: value`
/// pairs, `#`/`;` comments and indented continuation lines. Keys are
/// case-insensitive; values are kept verbatim.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct IniDocument {
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl IniDocument {
    /// Parses INI text. Lines that fit no rule are ignored.
    #[must_use]
    pub fn parse(contents: &str) -> Self {
        let mut document = Self::default();
        let mut section: Option<String> = None;
        let mut last_key: Option<String> = None;

        for raw in contents.lines() {
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }
            if let Some(name) = trimmed
                .strip_prefix('[')
                .and_then(|rest| rest.strip_suffix(']'))
            {
                section = Some(name.trim().to_owned());
                last_key = None;
                continue;
            }
            let Some(current) = section.as_ref() else {
                continue;
            };
            let entries = document.sections.entry(current.clone()).or_default();

            if raw.starts_with([' ', '\t'])
                && let Some(key) = last_key.as_ref()
                && let Some(value) = entries.get_mut(key)
            {
                value.push('\n');
                value.push_str(trimmed);
                continue;
            }

            let Some((key, value)) = trimmed
                .split_once('=')
                .or_else(|| trimmed.split_once(':'))
            else {
                continue;
            };
            let normalised = key.trim().to_ascii_lowercase();
            entries.insert(normalised.clone(), value.trim().to_owned());
            last_key = Some(normalised);
        }
        document
    }

    /// Returns the value of `key` in `section`.
    #[must_use]
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|entries| entries.get(&key.to_ascii_lowercase()))
            .map(String::as_str)
    }
}

fn read_optional(path: &Utf8Path) -> Result<Option<String>, CredentialsError> {
    let parent = match path.parent() {
        Some(dir) if !dir.as_str().is_empty() => dir,
        _ => Utf8Path::new("."),
    };
    let Some(file_name) = path.file_name() else {
        return Ok(None);
    };

    let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(CredentialsError::Io {
                path: parent.to_path_buf(),
                message: err.to_string(),
            });
        }
    };

    match dir.read_to_string(file_name) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(CredentialsError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }),
    }
}
