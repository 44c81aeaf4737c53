//! Transport that drives the block-storage command-line client.

use std::borrow::Cow;
use std::ffi::OsString;

use tracing::{debug, warn};

use super::{Transport, TransportError};
use crate::command::CommandRunner;
use crate::credentials::Credentials;
use crate::parser::{listing_contains, parse_properties};
use crate::resource::{CreateRequest, ResourceHandle, ResourceKind};

const PASSWORD_FLAG: &str = "--os-password";
const NOT_FOUND_MARKER: &str = "with a name or ID of";

/// Runs client subcommands through a [`CommandRunner`].
#[derive(Clone, Debug)]
pub struct CliTransport<R> {
    runner: R,
    program: String,
    global_args: Vec<String>,
}

impl<R: CommandRunner> CliTransport<R> {
    /// Builds the transport, validating credentials up front.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Auth`] when a required credential is
    /// missing.
    pub fn new(
        runner: R,
        program: impl Into<String>,
        credentials: &Credentials,
    ) -> Result<Self, TransportError> {
        credentials.validate()?;
        let mut global_args = Vec::new();
        let flags = [
            ("--os-username", credentials.username.as_deref()),
            (PASSWORD_FLAG, credentials.password.as_deref()),
            ("--os-tenant-name", credentials.tenant_name.as_deref()),
            ("--os-auth-url", credentials.auth_url.as_deref()),
            ("--os-volume-api-version", credentials.api_version.as_deref()),
        ];
        for (flag, value) in flags {
            if let Some(set) = value {
                global_args.push(flag.to_owned());
                global_args.push(set.to_owned());
            }
        }
        Ok(Self {
            runner,
            program: program.into(),
            global_args,
        })
    }

    /// Program path invoked for every call.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Underlying command runner.
    #[must_use]
    pub const fn runner(&self) -> &R {
        &self.runner
    }

    /// Runs `command` with `params` appended after the global flags and
    /// returns stdout.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::CommandFailed`] on a non-zero exit and
    /// [`TransportError::Spawn`] when the client cannot be started.
    pub fn cinder(&self, command: &str, params: &[String]) -> Result<String, TransportError> {
        let mut args: Vec<String> = self.global_args.clone();
        args.push(command.to_owned());
        args.extend(params.iter().cloned());

        let rendered = self.render(&args);
        debug!(command = %rendered, "running block-storage client");

        let os_args: Vec<OsString> = args.into_iter().map(OsString::from).collect();
        let output = self.runner.run(&self.program, &os_args)?;
        if output.is_success() {
            return Ok(output.stdout);
        }
        Err(TransportError::CommandFailed {
            command: rendered,
            status: output.status_text(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn render(&self, args: &[String]) -> String {
        let mut parts = vec![shell_escape::escape(Cow::Borrowed(self.program.as_str())).into_owned()];
        let mut mask_next = false;
        for arg in args {
            if mask_next {
                parts.push(String::from("***"));
            } else {
                parts.push(shell_escape::escape(Cow::Borrowed(arg.as_str())).into_owned());
            }
            mask_next = arg == PASSWORD_FLAG;
        }
        parts.join(" ")
    }
}

/// Splits a parameter string on whitespace the way a shell would for
/// unquoted text: `"2 GB"` is two arguments and `""` is none.
fn tokens(value: &str) -> impl Iterator<Item = String> + '_ {
    value.split_whitespace().map(str::to_owned)
}

fn option_flag(key: &str) -> String {
    format!("--{}", key.replace('_', "-"))
}

impl<R: CommandRunner> Transport for CliTransport<R> {
    fn label(&self) -> &'static str {
        "cli"
    }

    fn create(
        &self,
        kind: ResourceKind,
        request: &CreateRequest,
    ) -> Result<ResourceHandle, TransportError> {
        let mut params = Vec::new();
        for (key, value) in request.options() {
            params.push(option_flag(key));
            params.push(value.clone());
        }
        params.extend(request.positional().iter().flat_map(|value| tokens(value)));

        let stdout = self.cinder(&kind.command("create"), &params)?;
        ResourceHandle::from_properties(kind, parse_properties(&stdout)).ok_or_else(|| {
            warn!(%kind, output = %stdout, "create succeeded but printed no id; the object may be left behind");
            TransportError::Parse {
                context: format!("{kind} create output"),
                message: String::from("no id property in the returned table"),
            }
        })
    }

    fn get(&self, kind: ResourceKind, id: &str) -> Result<ResourceHandle, TransportError> {
        let params: Vec<String> = tokens(id).collect();
        let stdout = match self.cinder(&kind.command("show"), &params) {
            Ok(stdout) => stdout,
            Err(TransportError::CommandFailed { stdout, stderr, .. })
                if stdout.contains(NOT_FOUND_MARKER) || stderr.contains(NOT_FOUND_MARKER) =>
            {
                return Err(TransportError::NotFound {
                    kind,
                    id: id.to_owned(),
                });
            }
            Err(err) => return Err(err),
        };
        if !stdout.contains(id) {
            return Err(TransportError::NotFound {
                kind,
                id: id.to_owned(),
            });
        }
        Ok(ResourceHandle::new(kind, id, parse_properties(&stdout)))
    }

    fn delete(&self, kind: ResourceKind, id: &str) -> Result<(), TransportError> {
        if !self.exists(kind, id)? {
            return Err(TransportError::NotFound {
                kind,
                id: id.to_owned(),
            });
        }
        self.cinder(&kind.command("delete"), &tokens(id).collect::<Vec<_>>())?;
        Ok(())
    }

    fn extend(&self, handle: &ResourceHandle, new_size: &str) -> Result<(), TransportError> {
        if handle.kind() != ResourceKind::Volume {
            return Err(TransportError::Unsupported {
                kind: handle.kind(),
                operation: String::from("extend"),
            });
        }
        let params: Vec<String> = tokens(handle.id()).chain(tokens(new_size)).collect();
        self.cinder("extend", &params)?;
        Ok(())
    }

    fn exists(&self, kind: ResourceKind, id: &str) -> Result<bool, TransportError> {
        let listing = self.cinder(&kind.command("list"), &[])?;
        Ok(listing_contains(&listing, id))
    }
}
