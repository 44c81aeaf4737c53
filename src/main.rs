//! Binary entry point for the `cinder-functional` harness.

mod cli;

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::process;
use std::time::Duration;

use camino::Utf8Path;
use clap::Parser;
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use cinder_functional::auth::{AuthError, AuthMethod, NoAuthOptions, NoAuthPlugin, PasswordAuth};
use cinder_functional::command::ProcessCommandRunner;
use cinder_functional::config::{HarnessConfig, TransportKind};
use cinder_functional::connector::{
    AttachLibrary, ConnectorError, ConnectorRequest, HelperAttachLibrary,
};
use cinder_functional::credentials::Credentials;
use cinder_functional::lifecycle::{Lifecycle, LifecycleError, PollPolicy};
use cinder_functional::parser::{render_properties, render_table};
use cinder_functional::resource::{
    CreateRequest, ResourceHandle, ResourceKind, STATUS_AVAILABLE,
};
use cinder_functional::scenario::{
    FailureFixtures, Scenario, ScenarioError, ScenarioOutcome, ScenarioRunner,
};
use cinder_functional::transport::{
    ApiTransport, CliTransport, HttpBlockStorage, Transport, TransportError,
};

use cli::{
    AuthTypeArg, Cli, Command, ConnectorCommand, CreateCommand, GlobalArgs, KindArg,
    ScenarioCommand, TransportArg,
};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("credentials error: {0}")]
    Credentials(String),
    #[error("logging setup failed: {0}")]
    Logging(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
    #[error(transparent)]
    Connector(#[from] ConnectorError),
    #[error("{failed} of {total} scenario runs failed")]
    ScenariosFailed { failed: usize, total: usize },
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = init_tracing(&cli.global) {
        report_error(&err);
        process::exit(1);
    }
    let exit_code = match dispatch(cli) {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing(global: &GlobalArgs) -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&global.log_level))
        .map_err(|err| CliError::Logging(err.to_string()))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(true);
    let installed = if global.log_json {
        builder.json().flatten_event(true).try_init()
    } else {
        builder.compact().try_init()
    };
    installed.map_err(|err| CliError::Logging(err.to_string()))
}

fn dispatch(cli: Cli) -> Result<(), CliError> {
    let Cli { global, command } = cli;
    let mut stdout = io::stdout().lock();
    if let Command::Connector(args) = &command {
        return run_connector(args, &mut stdout);
    }

    let config =
        HarnessConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    config
        .validate()
        .map_err(|err| CliError::Config(err.to_string()))?;
    let transport_kind = match global.transport {
        Some(TransportArg::Cli) => TransportKind::Cli,
        Some(TransportArg::Api) => TransportKind::Api,
        None => config
            .transport_kind()
            .map_err(|err| CliError::Config(err.to_string()))?,
    };
    let policy = poll_policy(&config, global.timeout);
    let credentials = Credentials::resolve(Utf8Path::new(&config.credentials_file))
        .map_err(|err| CliError::Credentials(err.to_string()))?;
    debug!(transport = %transport_kind, ?policy, "harness configured");

    match transport_kind {
        TransportKind::Cli => {
            let transport = CliTransport::new(
                ProcessCommandRunner,
                config.program_path().into_string(),
                &credentials,
            )?;
            execute(&transport, &command, &config, policy, &mut stdout)
        }
        TransportKind::Api => {
            let method = auth_method(&global, &credentials)?;
            let storage = HttpBlockStorage::connect(&method, credentials.api_version_or_default())?;
            execute(
                &ApiTransport::new(storage),
                &command,
                &config,
                policy,
                &mut stdout,
            )
        }
    }
}

fn poll_policy(config: &HarnessConfig, timeout: Option<Duration>) -> PollPolicy {
    let configured = config.poll_policy();
    timeout.map_or(configured, |deadline| {
        PollPolicy::new(deadline, configured.interval)
    })
}

fn auth_method(global: &GlobalArgs, credentials: &Credentials) -> Result<AuthMethod, CliError> {
    match global.auth_type {
        AuthTypeArg::Password => Ok(AuthMethod::Password(PasswordAuth::from_credentials(
            credentials,
        )?)),
        AuthTypeArg::Noauth => {
            let args = &global.noauth;
            let plugin = NoAuthPlugin::new(NoAuthOptions {
                user_id: args.user_id.clone(),
                project_id: args.project_id.clone(),
                tenant_id: args.tenant_id.clone(),
                roles: args.roles.clone(),
                endpoint: args.endpoint.clone(),
            })?;
            Ok(AuthMethod::NoAuth(plugin))
        }
    }
}

fn execute<T: Transport>(
    transport: &T,
    command: &Command,
    config: &HarnessConfig,
    policy: PollPolicy,
    out: &mut impl Write,
) -> Result<(), CliError> {
    let lifecycle = Lifecycle::new(transport).with_poll_policy(policy);
    match command {
        Command::Scenario(args) => run_scenarios(transport, args, config, policy, out),
        Command::Create(args) => {
            let kind = resource_kind(args.kind);
            let mut handle = transport.create(kind, &create_request(args))?;
            if let Err(err) = lifecycle.wait_for_status(&mut handle, STATUS_AVAILABLE, policy.timeout)
            {
                writeln!(
                    out,
                    "Created {kind} {id} is not {STATUS_AVAILABLE}; remove it with `cinder-functional delete {kind} {id}`",
                    id = handle.id()
                )?;
                return Err(err.into());
            }
            writeln!(out, "{}", render_properties(handle.properties()))?;
            Ok(())
        }
        Command::Show(args) => {
            let handle = transport.get(resource_kind(args.kind), &args.id)?;
            writeln!(out, "{}", render_properties(handle.properties()))?;
            Ok(())
        }
        Command::Delete(args) => {
            let kind = resource_kind(args.kind);
            lifecycle.delete(&ResourceHandle::new(kind, &args.id, BTreeMap::new()))?;
            writeln!(out, "Deleted {kind} {}", args.id)?;
            Ok(())
        }
        Command::Extend(args) => {
            let mut handle = transport.get(ResourceKind::Volume, &args.id)?;
            lifecycle.extend(&handle, &args.size)?;
            lifecycle.wait_for_status(&mut handle, STATUS_AVAILABLE, policy.timeout)?;
            lifecycle.refresh(&mut handle)?;
            writeln!(out, "{}", render_properties(handle.properties()))?;
            Ok(())
        }
        Command::Connector(args) => run_connector(args, out),
    }
}

fn run_scenarios<T: Transport>(
    transport: &T,
    args: &ScenarioCommand,
    config: &HarnessConfig,
    policy: PollPolicy,
    out: &mut impl Write,
) -> Result<(), CliError> {
    let scenarios = select_scenarios(&args.names)?;
    let fixtures = match args.fixtures.as_deref().or(config.failure_fixtures.as_deref()) {
        Some(path) => FailureFixtures::load(Utf8Path::new(path))?,
        None => FailureFixtures::default(),
    };
    let runner = ScenarioRunner::new(transport)
        .with_poll_policy(policy)
        .with_fixtures(fixtures);
    let outcomes = runner.run_all(&scenarios);
    writeln!(out, "{}", render_outcomes(&outcomes))?;

    let failed = outcomes.iter().filter(|outcome| !outcome.is_ok()).count();
    if failed > 0 {
        return Err(CliError::ScenariosFailed {
            failed,
            total: outcomes.len(),
        });
    }
    Ok(())
}

fn run_connector(args: &ConnectorCommand, out: &mut impl Write) -> Result<(), CliError> {
    let library = HelperAttachLibrary::locate(ProcessCommandRunner, args.helper.as_str())?;
    let mut request = ConnectorRequest::new(args.multipath, args.enforce_multipath);
    request.root_helper.clone_from(&args.root_helper);
    let properties = library.connector_properties(&request)?;
    let rows: Vec<Vec<String>> = properties
        .as_map()
        .iter()
        .map(|(key, value)| {
            let rendered = value
                .as_str()
                .map_or_else(|| value.to_string(), str::to_owned);
            vec![key.clone(), rendered]
        })
        .collect();
    writeln!(out, "{}", render_table(&["Property", "Value"], &rows))?;
    Ok(())
}

const fn resource_kind(kind: KindArg) -> ResourceKind {
    match kind {
        KindArg::Volume => ResourceKind::Volume,
        KindArg::Snapshot => ResourceKind::Snapshot,
        KindArg::Backup => ResourceKind::Backup,
    }
}

fn create_request(args: &CreateCommand) -> CreateRequest {
    let positional = args
        .args
        .iter()
        .fold(CreateRequest::new(), |request, value| request.arg(value));
    args.options
        .iter()
        .fold(positional, |request, (key, value)| request.option(key.as_str(), value))
}

fn select_scenarios(names: &[String]) -> Result<Vec<Scenario>, ScenarioError> {
    if names.iter().any(|name| name.trim() == "all") {
        return Ok(Scenario::ALL.to_vec());
    }
    names.iter().map(|name| name.parse()).collect()
}

fn render_outcomes(outcomes: &[ScenarioOutcome]) -> String {
    let rows: Vec<Vec<String>> = outcomes
        .iter()
        .map(|outcome| {
            let elapsed = Duration::from_millis(
                u64::try_from(outcome.elapsed.as_millis()).unwrap_or(u64::MAX),
            );
            vec![
                outcome.scenario.to_string(),
                outcome
                    .case
                    .as_ref()
                    .map_or_else(String::new, |value| format!("'{value}'")),
                outcome.verdict.label().to_owned(),
                humantime::format_duration(elapsed).to_string(),
                outcome.verdict.detail().to_owned(),
            ]
        })
        .collect();
    render_table(&["Scenario", "Case", "Result", "Elapsed", "Detail"], &rows)
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
