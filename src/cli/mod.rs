//! Command-line interface definitions for the `cinder-functional` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Top-level CLI for the `cinder-functional` binary.
#[derive(Debug, Parser)]
#[command(
    name = "cinder-functional",
    about = "Run block-storage lifecycle scenarios through the client or the API",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Options shared by every subcommand.
    #[command(flatten)]
    pub(crate) global: GlobalArgs,
    /// Subcommand to run.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Options shared by every subcommand.
#[derive(Debug, Args)]
pub(crate) struct GlobalArgs {
    /// Transport used to reach the service. Overrides the configuration file.
    #[arg(long, global = true, value_enum)]
    pub(crate) transport: Option<TransportArg>,
    /// Deadline for status and deletion waits, e.g. `90s` or `2m`.
    #[arg(long, global = true, value_parser = humantime::parse_duration)]
    pub(crate) timeout: Option<Duration>,
    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, global = true, default_value = "info")]
    pub(crate) log_level: String,
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub(crate) log_json: bool,
    /// How API requests authenticate.
    #[arg(long = "os-auth-type", global = true, value_enum, default_value_t = AuthTypeArg::Password)]
    pub(crate) auth_type: AuthTypeArg,
    /// Options for the no-auth plugin.
    #[command(flatten)]
    pub(crate) noauth: NoAuthArgs,
}

/// Options for the no-auth plugin.
#[derive(Debug, Args)]
pub(crate) struct NoAuthArgs {
    /// User id sent in `x-user-id`.
    #[arg(long = "os-user-id", global = true, env = "CINDER_USER_ID")]
    pub(crate) user_id: Option<String>,
    /// Project id sent in `x-project-id`.
    #[arg(long = "os-project-id", global = true, env = "CINDER_PROJECT_ID")]
    pub(crate) project_id: Option<String>,
    /// Legacy name for the project id.
    #[arg(long = "os-tenant-id", global = true, env = "CINDER_TENANT_ID")]
    pub(crate) tenant_id: Option<String>,
    /// Roles sent in `x-roles`.
    #[arg(long = "os-roles", global = true, env = "CINDER_ROLES")]
    pub(crate) roles: Option<String>,
    /// Block-storage endpoint to call.
    #[arg(long = "os-endpoint", global = true, env = "CINDER_ENDPOINT")]
    pub(crate) endpoint: Option<String>,
}

/// Subcommands.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Run named scenarios, or `all`, and print a pass/fail table.
    #[command(name = "scenario")]
    Scenario(ScenarioCommand),
    /// Create a resource and wait until it is available.
    #[command(name = "create")]
    Create(CreateCommand),
    /// Show a resource's properties.
    #[command(name = "show")]
    Show(TargetCommand),
    /// Delete a resource and wait until it is gone.
    #[command(name = "delete")]
    Delete(TargetCommand),
    /// Grow a volume and wait until it is available again.
    #[command(name = "extend")]
    Extend(ExtendCommand),
    /// Print this host's attach connector properties.
    #[command(name = "connector")]
    Connector(ConnectorCommand),
}

/// Arguments for `scenario`.
#[derive(Debug, Args)]
pub(crate) struct ScenarioCommand {
    /// Scenario names, or `all`.
    #[arg(required = true, value_name = "NAME")]
    pub(crate) names: Vec<String>,
    /// TOML file replacing the expected failure messages.
    #[arg(long, value_name = "PATH")]
    pub(crate) fixtures: Option<String>,
}

/// Arguments for `create`.
#[derive(Debug, Args)]
pub(crate) struct CreateCommand {
    /// Kind of resource to create.
    #[arg(value_enum)]
    pub(crate) kind: KindArg,
    /// Positional arguments: a size for volumes, a volume id otherwise.
    #[arg(value_name = "ARG")]
    pub(crate) args: Vec<String>,
    /// Extra create option as `key=value`, e.g. `name=scratch`.
    #[arg(long = "opt", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub(crate) options: Vec<(String, String)>,
}

/// Arguments naming one resource.
#[derive(Debug, Args)]
pub(crate) struct TargetCommand {
    /// Kind of resource.
    #[arg(value_enum)]
    pub(crate) kind: KindArg,
    /// Resource id.
    pub(crate) id: String,
}

/// Arguments for `extend`.
#[derive(Debug, Args)]
pub(crate) struct ExtendCommand {
    /// Volume id.
    pub(crate) id: String,
    /// New size in GiB.
    pub(crate) size: String,
}

/// Arguments for `connector`.
#[derive(Debug, Args)]
pub(crate) struct ConnectorCommand {
    /// Ask for multipath.
    #[arg(long)]
    pub(crate) multipath: bool,
    /// Fail rather than fall back when multipath is unavailable.
    #[arg(long, requires = "multipath")]
    pub(crate) enforce_multipath: bool,
    /// Helper program that reports connector properties.
    #[arg(long, default_value = "os-brick-connector")]
    pub(crate) helper: String,
    /// Privilege escalation prefix passed to the helper.
    #[arg(long, default_value = "sudo")]
    pub(crate) root_helper: String,
}

/// Transport choices.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum TransportArg {
    /// Run the command-line client.
    Cli,
    /// Call the REST API.
    Api,
}

/// Authentication choices for the API transport.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum AuthTypeArg {
    /// Password authentication against the identity service.
    Password,
    /// Trusted headers against a service running without identity.
    Noauth,
}

/// Resource kinds.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum KindArg {
    /// Block-storage volume.
    Volume,
    /// Volume snapshot.
    Snapshot,
    /// Volume backup.
    Backup,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .filter(|(key, _)| !key.trim().is_empty())
        .map(|(key, value)| (key.trim().to_owned(), value.to_owned()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))
}
