//! Host attach connector properties.
//!
//! Attaching a volume needs a description of the local host (address,
//! initiator names, multipath support). An [`AttachLibrary`] produces that
//! description; [`HelperAttachLibrary`] asks an external helper for it and
//! refuses to construct when the helper is not installed.

use std::ffi::OsString;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::command::{CommandError, CommandRunner};

/// Privilege escalation prefix the helper uses for host commands.
pub const DEFAULT_ROOT_HELPER: &str = "sudo";
/// Helper program queried for connector properties.
pub const DEFAULT_HELPER_PROGRAM: &str = "os-brick-connector";

const UNREACHABLE_PROBE: &str = "192.0.2.1:9";

/// Errors raised while gathering connector properties.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConnectorError {
    /// Raised when the attach helper is missing from this host.
    #[error("to use the attach extension, {program} must be installed")]
    Install {
        /// Helper that could not be found.
        program: String,
    },
    /// Raised when the helper cannot be started.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Helper that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the helper exits with a non-zero status.
    #[error("{program} exited with status {status}: {stderr}")]
    Command {
        /// Helper that failed.
        program: String,
        /// Exit status text.
        status: String,
        /// Captured standard error.
        stderr: String,
    },
    /// Raised when the helper prints something other than a JSON object.
    #[error("failed to parse connector properties: {message}")]
    Parse {
        /// Parser error message.
        message: String,
    },
}

impl From<CommandError> for ConnectorError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::NotInstalled { program } => Self::Install { program },
            CommandError::Spawn { program, message } => Self::Spawn { program, message },
        }
    }
}

/// Inputs to a connector property lookup.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConnectorRequest {
    /// Privilege escalation prefix, e.g. `sudo`.
    pub root_helper: String,
    /// Address the storage network should reach this host on.
    pub my_ip: String,
    /// Whether multipath is wanted.
    pub multipath: bool,
    /// Whether to fail instead of falling back when multipath is missing.
    pub enforce_multipath: bool,
}

impl ConnectorRequest {
    /// Builds a request with the default root helper and the detected host
    /// address.
    #[must_use]
    pub fn new(multipath: bool, enforce_multipath: bool) -> Self {
        Self {
            root_helper: DEFAULT_ROOT_HELPER.to_owned(),
            my_ip: local_ip().to_string(),
            multipath,
            enforce_multipath,
        }
    }

    fn args(&self) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("connector-properties"),
            OsString::from("--root-helper"),
            OsString::from(&self.root_helper),
            OsString::from("--my-ip"),
            OsString::from(&self.my_ip),
        ];
        if self.multipath {
            args.push(OsString::from("--multipath"));
        }
        if self.enforce_multipath {
            args.push(OsString::from("--enforce-multipath"));
        }
        args
    }
}

/// Address of the interface that routes off-host, or loopback when none
/// does. No packet is sent.
#[must_use]
pub fn local_ip() -> IpAddr {
    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| {
            socket.connect(UNREACHABLE_PROBE)?;
            socket.local_addr()
        })
        .map_or(IpAddr::V4(Ipv4Addr::LOCALHOST), |addr| addr.ip())
}

/// Connector description returned by an [`AttachLibrary`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConnectorProperties(Map<String, Value>);

impl ConnectorProperties {
    /// Wraps a JSON object.
    #[must_use]
    pub const fn new(properties: Map<String, Value>) -> Self {
        Self(properties)
    }

    /// Raw property value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Host address.
    #[must_use]
    pub fn ip(&self) -> Option<&str> {
        self.get("ip").and_then(Value::as_str)
    }

    /// Host name.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.get("host").and_then(Value::as_str)
    }

    /// iSCSI initiator name.
    #[must_use]
    pub fn initiator(&self) -> Option<&str> {
        self.get("initiator").and_then(Value::as_str)
    }

    /// Whether multipath is enabled.
    #[must_use]
    pub fn multipath(&self) -> Option<bool> {
        self.get("multipath").and_then(Value::as_bool)
    }

    /// All properties.
    #[must_use]
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// Source of connector properties for this host.
pub trait AttachLibrary {
    /// Describes this host for attach requests.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError`] when the description cannot be produced.
    fn connector_properties(
        &self,
        request: &ConnectorRequest,
    ) -> Result<ConnectorProperties, ConnectorError>;
}

/// Attach library backed by an external helper program.
#[derive(Clone, Debug)]
pub struct HelperAttachLibrary<R: CommandRunner> {
    runner: R,
    program: String,
}

impl<R: CommandRunner> HelperAttachLibrary<R> {
    /// Confirms the helper runs and returns a library bound to it.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Install`] when the helper is not installed
    /// and [`ConnectorError::Command`] when it fails its version check.
    pub fn locate(runner: R, program: impl Into<String>) -> Result<Self, ConnectorError> {
        let helper = program.into();
        let output = runner.run(&helper, &[OsString::from("--version")])?;
        if !output.is_success() {
            return Err(ConnectorError::Command {
                program: helper,
                status: output.status_text(),
                stderr: output.stderr,
            });
        }
        debug!(program = %helper, version = output.stdout.trim(), "attach helper located");
        Ok(Self {
            runner,
            program: helper,
        })
    }

    /// Helper program in use.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }
}

impl<R: CommandRunner> AttachLibrary for HelperAttachLibrary<R> {
    fn connector_properties(
        &self,
        request: &ConnectorRequest,
    ) -> Result<ConnectorProperties, ConnectorError> {
        let output = self.runner.run(&self.program, &request.args())?;
        if !output.is_success() {
            return Err(ConnectorError::Command {
                program: self.program.clone(),
                status: output.status_text(),
                stderr: output.stderr,
            });
        }
        match serde_json::from_str::<Value>(&output.stdout) {
            Ok(Value::Object(properties)) => Ok(ConnectorProperties::new(properties)),
            Ok(other) => Err(ConnectorError::Parse {
                message: format!("expected a JSON object, got {other}"),
            }),
            Err(err) => Err(ConnectorError::Parse {
                message: err.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedRunner;
    use rstest::rstest;

    fn request(multipath: bool, enforce: bool) -> ConnectorRequest {
        ConnectorRequest {
            root_helper: String::from("sudo"),
            my_ip: String::from("10.0.0.5"),
            multipath,
            enforce_multipath: enforce,
        }
    }

    fn located(runner: &ScriptedRunner) -> HelperAttachLibrary<ScriptedRunner> {
        runner.push_stdout("os-brick-connector 6.4.0\n");
        HelperAttachLibrary::locate(runner.clone(), DEFAULT_HELPER_PROGRAM).expect("helper present")
    }

    #[test]
    fn locate_fails_fast_when_helper_is_missing() {
        let runner = ScriptedRunner::new();
        runner.push_not_installed(DEFAULT_HELPER_PROGRAM);

        let err = HelperAttachLibrary::locate(runner, DEFAULT_HELPER_PROGRAM)
            .expect_err("missing helper");
        assert_eq!(
            err,
            ConnectorError::Install {
                program: String::from(DEFAULT_HELPER_PROGRAM)
            }
        );
        assert!(err.to_string().contains("must be installed"));
    }

    #[rstest]
    #[case(false, false, "")]
    #[case(true, false, " --multipath")]
    #[case(true, true, " --multipath --enforce-multipath")]
    fn properties_request_forwards_flags(
        #[case] multipath: bool,
        #[case] enforce: bool,
        #[case] suffix: &str,
    ) {
        let runner = ScriptedRunner::new();
        let library = located(&runner);
        runner.push_stdout(r#"{"ip": "10.0.0.5", "host": "node-1", "multipath": false}"#);

        library
            .connector_properties(&request(multipath, enforce))
            .expect("properties");

        let last = runner.invocations().pop().expect("invocation recorded");
        assert_eq!(
            last.command_string(),
            format!(
                "os-brick-connector connector-properties --root-helper sudo --my-ip 10.0.0.5{suffix}"
            )
        );
    }

    #[test]
    fn properties_expose_typed_accessors() {
        let runner = ScriptedRunner::new();
        let library = located(&runner);
        runner.push_stdout(
            r#"{"ip": "10.0.0.5", "host": "node-1", "initiator": "iqn.1993-08.org.debian:01:abc", "multipath": true}"#,
        );

        let properties = library
            .connector_properties(&request(true, false))
            .expect("properties");
        assert_eq!(properties.ip(), Some("10.0.0.5"));
        assert_eq!(properties.host(), Some("node-1"));
        assert_eq!(properties.initiator(), Some("iqn.1993-08.org.debian:01:abc"));
        assert_eq!(properties.multipath(), Some(true));
    }

    #[rstest]
    #[case("[]")]
    #[case("not json")]
    fn non_object_output_is_a_parse_error(#[case] stdout: &str) {
        let runner = ScriptedRunner::new();
        let library = located(&runner);
        runner.push_stdout(stdout);

        let err = library
            .connector_properties(&request(false, false))
            .expect_err("bad output");
        assert!(matches!(err, ConnectorError::Parse { .. }));
    }

    #[test]
    fn helper_failure_carries_stderr() {
        let runner = ScriptedRunner::new();
        let library = located(&runner);
        runner.push_failure(1, "multipathd is not running");

        let err = library
            .connector_properties(&request(true, true))
            .expect_err("enforced multipath");
        assert!(err.to_string().contains("multipathd is not running"));
    }

    #[test]
    fn default_request_uses_sudo_and_a_parsable_address() {
        let built = ConnectorRequest::new(false, false);
        assert_eq!(built.root_helper, DEFAULT_ROOT_HELPER);
        assert!(built.my_ip.parse::<IpAddr>().is_ok());
    }
}
