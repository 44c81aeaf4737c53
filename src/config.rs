//! Harness configuration loaded via `ortho-config`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::credentials::CREDENTIALS_FILE;
use crate::lifecycle::PollPolicy;

/// Environment variable naming the directory that holds the client binary.
pub const EXEC_DIR_ENV: &str = "OS_CINDERCLIENT_EXEC_DIR";
/// Client directory used when neither the environment nor the config names
/// one.
pub const DEFAULT_EXEC_DIR: &str = "./.tox/functional/bin";

/// Settings for a harness run, merged from defaults, `cinder-functional.toml`
/// and `CINDER_FUNCTIONAL_*` environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "CINDER_FUNCTIONAL",
    discovery(
        app_name = "cinder-functional",
        env_var = "CINDER_FUNCTIONAL_CONFIG_PATH",
        config_file_name = "cinder-functional.toml",
        dotfile_name = ".cinder-functional.toml",
        project_file_name = "cinder-functional.toml"
    )
)]
pub struct HarnessConfig {
    /// Transport used to reach the service: `cli` or `api`.
    #[ortho_config(default = "cli".to_owned())]
    pub transport: String,
    /// File name of the command-line client.
    #[ortho_config(default = "cinder".to_owned())]
    pub cli_program: String,
    /// Directory containing the client. `OS_CINDERCLIENT_EXEC_DIR` wins over
    /// this value.
    pub exec_dir: Option<String>,
    /// Deadline for status and deletion waits, in seconds.
    #[ortho_config(default = 60)]
    pub wait_timeout_secs: u64,
    /// Pause between polls, in milliseconds.
    #[ortho_config(default = 1000)]
    pub poll_interval_ms: u64,
    /// INI file holding admin credentials.
    #[ortho_config(default = CREDENTIALS_FILE.to_owned())]
    pub credentials_file: String,
    /// Optional TOML file replacing the expected failure messages.
    pub failure_fixtures: Option<String>,
}

/// How the harness talks to the service.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransportKind {
    /// Runs the command-line client as a subprocess.
    Cli,
    /// Calls the REST API directly.
    Api,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cli => "cli",
            Self::Api => "api",
        })
    }
}

impl FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cli" => Ok(Self::Cli),
            "api" => Ok(Self::Api),
            other => Err(ConfigError::InvalidTransport(other.to_owned())),
        }
    }
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl HarnessConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to cinder-functional.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without parsing CLI arguments. Values merge
    /// defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("cinder-functional")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks the fields a run cannot do without.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] for an empty required field,
    /// [`ConfigError::InvalidTransport`] for an unknown transport and
    /// [`ConfigError::Parse`] for a zero poll interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.cli_program,
            &FieldMetadata::new(
                "client program name",
                "CINDER_FUNCTIONAL_CLI_PROGRAM",
                "cli_program",
            ),
        )?;
        Self::require_field(
            &self.credentials_file,
            &FieldMetadata::new(
                "credentials file",
                "CINDER_FUNCTIONAL_CREDENTIALS_FILE",
                "credentials_file",
            ),
        )?;
        self.transport_kind()?;
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Parse(String::from(
                "poll_interval_ms must be greater than zero",
            )));
        }
        Ok(())
    }

    /// Parsed transport selection.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidTransport`] for anything but `cli` or
    /// `api`.
    pub fn transport_kind(&self) -> Result<TransportKind, ConfigError> {
        self.transport.parse()
    }

    /// Poll deadline and pause for the lifecycle orchestrator.
    #[must_use]
    pub const fn poll_policy(&self) -> PollPolicy {
        PollPolicy::new(
            Duration::from_secs(self.wait_timeout_secs),
            Duration::from_millis(self.poll_interval_ms),
        )
    }

    /// Client path, resolving the directory from `OS_CINDERCLIENT_EXEC_DIR`,
    /// then `exec_dir`, then the tox default.
    #[must_use]
    pub fn program_path(&self) -> Utf8PathBuf {
        self.program_path_with(std::env::var(EXEC_DIR_ENV).ok().as_deref())
    }

    /// Client path given an explicit value for `OS_CINDERCLIENT_EXEC_DIR`.
    #[must_use]
    pub fn program_path_with(&self, env_exec_dir: Option<&str>) -> Utf8PathBuf {
        let dir = env_exec_dir
            .filter(|value| !value.trim().is_empty())
            .or(self.exec_dir.as_deref())
            .unwrap_or(DEFAULT_EXEC_DIR);
        Utf8PathBuf::from(dir).join(&self.cli_program)
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
    /// Raised for a transport name other than `cli` or `api`.
    #[error("unknown transport '{0}': expected cli or api")]
    InvalidTransport(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn config() -> HarnessConfig {
        HarnessConfig {
            transport: String::from("cli"),
            cli_program: String::from("cinder"),
            exec_dir: None,
            wait_timeout_secs: 60,
            poll_interval_ms: 1000,
            credentials_file: CREDENTIALS_FILE.to_owned(),
            failure_fixtures: None,
        }
    }

    #[rstest]
    #[case("cli", TransportKind::Cli)]
    #[case("API", TransportKind::Api)]
    #[case(" api ", TransportKind::Api)]
    fn transport_names_parse(#[case] raw: &str, #[case] expected: TransportKind) {
        assert_eq!(raw.parse::<TransportKind>(), Ok(expected));
    }

    #[rstest]
    fn unknown_transport_is_rejected(mut config: HarnessConfig) {
        config.transport = String::from("grpc");
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidTransport(String::from("grpc")))
        );
    }

    #[rstest]
    fn empty_program_names_env_var(mut config: HarnessConfig) {
        config.cli_program = String::from("  ");
        let err = config.validate().expect_err("empty program");
        assert!(err.to_string().contains("CINDER_FUNCTIONAL_CLI_PROGRAM"));
    }

    #[rstest]
    fn zero_interval_is_rejected(mut config: HarnessConfig) {
        config.poll_interval_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Parse(_))));
    }

    #[rstest]
    fn poll_policy_uses_configured_units(config: HarnessConfig) {
        let policy = config.poll_policy();
        assert_eq!(policy.timeout, Duration::from_secs(60));
        assert_eq!(policy.interval, Duration::from_millis(1000));
    }

    #[rstest]
    #[case(None, None, "./.tox/functional/bin/cinder")]
    #[case(None, Some("/opt/client"), "/opt/client/cinder")]
    #[case(Some("/env/bin"), Some("/opt/client"), "/env/bin/cinder")]
    #[case(Some(""), Some("/opt/client"), "/opt/client/cinder")]
    fn program_path_precedence(
        mut config: HarnessConfig,
        #[case] env_dir: Option<&str>,
        #[case] configured: Option<&str>,
        #[case] expected: &str,
    ) {
        config.exec_dir = configured.map(str::to_owned);
        assert_eq!(config.program_path_with(env_dir), Utf8PathBuf::from(expected));
    }
}
