//! Command-line client emulation over [`FakeCinder`].

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::rc::Rc;

use super::{CommandInvocation, FakeCinder, ServiceError};
use crate::command::{CommandError, CommandOutput, CommandRunner};
use crate::parser::{render_properties, render_table};
use crate::resource::ResourceKind;

const USAGE_EXIT: i32 = 2;
const ERROR_EXIT: i32 = 1;

/// Answers `cinder` invocations from the shared fake service, reproducing
/// the client's argument errors, tables, and exit codes.
#[derive(Clone, Debug)]
pub struct FakeCinderCli {
    service: FakeCinder,
    invocations: Rc<RefCell<Vec<CommandInvocation>>>,
}

struct Parsed {
    positional: Vec<String>,
    options: BTreeMap<String, String>,
}

impl FakeCinderCli {
    /// Wraps a fake service.
    #[must_use]
    pub fn new(service: FakeCinder) -> Self {
        Self {
            service,
            invocations: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Service behind the client.
    #[must_use]
    pub const fn service(&self) -> &FakeCinder {
        &self.service
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    fn dispatch(&self, argv: &[String]) -> CommandOutput {
        let mut rest = argv;
        while let Some((flag, tail)) = rest.split_first()
            && flag.starts_with("--os-")
        {
            rest = tail.get(1..).unwrap_or_default();
        }
        let Some((command, args)) = rest.split_first() else {
            return usage_error("", "too few arguments");
        };
        let parsed = match parse_args(args) {
            Ok(parsed) => parsed,
            Err(message) => return usage_error(command, &message),
        };
        match self.execute(command, parsed) {
            Ok(stdout) => CommandOutput {
                code: Some(0),
                stdout,
                stderr: String::new(),
            },
            Err(output) => output,
        }
    }

    fn execute(&self, command: &str, parsed: Parsed) -> Result<String, CommandOutput> {
        let (kind, verb) = split_command(command);
        match (kind, verb) {
            (ResourceKind::Volume, "create") => self.create_volume(parsed),
            (ResourceKind::Snapshot | ResourceKind::Backup, "create") => {
                self.create_from_volume(kind, command, &parsed)
            }
            (_, "show") => {
                let id = self.single_target(kind, command, &parsed)?;
                let properties = self.service.show(kind, &id).map_err(|err| service_error(&err))?;
                Ok(render_properties(&properties))
            }
            (_, "list") => Ok(self.render_listing(kind)),
            (_, "delete") => self.delete(kind, command, &parsed),
            (ResourceKind::Volume, "extend") => self.extend(command, &parsed),
            _ => Err(usage_error(
                command,
                &format!("argument <subcommand>: invalid choice: '{command}'"),
            )),
        }
    }

    fn create_volume(&self, parsed: Parsed) -> Result<String, CommandOutput> {
        let mut positional = parsed.positional.into_iter();
        let size = positional
            .next()
            .map(|raw| parse_int("create", "size", &raw))
            .transpose()?;
        reject_extra("create", positional)?;

        let has_source = parsed.options.contains_key("snapshot_id")
            || parsed.options.contains_key("source_volid");
        if size.is_none() && !has_source {
            return Err(failure(
                "Size is a required parameter if snapshot or source volume or image is not \
                 specified.",
            ));
        }
        let created = self
            .service
            .create_volume(size, &parsed.options)
            .map_err(|err| service_error(&err))?;
        Ok(render_properties(&created))
    }

    fn create_from_volume(
        &self,
        kind: ResourceKind,
        command: &str,
        parsed: &Parsed,
    ) -> Result<String, CommandOutput> {
        let volume = self.single_target(ResourceKind::Volume, command, parsed)?;
        let created = self
            .service
            .create_from_volume(kind, &volume, &parsed.options)
            .map_err(|err| service_error(&err))?;
        Ok(render_properties(&created))
    }

    fn delete(
        &self,
        kind: ResourceKind,
        command: &str,
        parsed: &Parsed,
    ) -> Result<String, CommandOutput> {
        if parsed.positional.is_empty() {
            return Err(usage_error(command, "too few arguments"));
        }
        let mut stdout = String::new();
        for target in &parsed.positional {
            let id = self.resolve(kind, target)?;
            self.service.delete(kind, &id).map_err(|err| service_error(&err))?;
            stdout.push_str(&format!("Request to delete {kind} {id} has been accepted.\n"));
        }
        Ok(stdout)
    }

    fn extend(&self, command: &str, parsed: &Parsed) -> Result<String, CommandOutput> {
        let [volume, new_size, extra @ ..] = parsed.positional.as_slice() else {
            return Err(usage_error(command, "too few arguments"));
        };
        let size = parse_int(command, "new_size", new_size)?;
        reject_extra(command, extra.iter().cloned())?;

        let id = self.resolve(ResourceKind::Volume, volume)?;
        self.service.extend(&id, size).map_err(|err| service_error(&err))?;
        Ok(String::new())
    }

    fn single_target(
        &self,
        kind: ResourceKind,
        command: &str,
        parsed: &Parsed,
    ) -> Result<String, CommandOutput> {
        let [target, extra @ ..] = parsed.positional.as_slice() else {
            return Err(usage_error(command, "too few arguments"));
        };
        reject_extra(command, extra.iter().cloned())?;
        self.resolve(kind, target)
    }

    fn resolve(&self, kind: ResourceKind, name_or_id: &str) -> Result<String, CommandOutput> {
        self.service.find(kind, name_or_id).ok_or_else(|| {
            failure(&format!(
                "No {kind} with a name or ID of '{name_or_id}' exists."
            ))
        })
    }

    fn render_listing(&self, kind: ResourceKind) -> String {
        let headers: &[&str] = match kind {
            ResourceKind::Volume => &[
                "ID",
                "Status",
                "Name",
                "Size",
                "Volume Type",
                "Bootable",
                "Attached to",
            ],
            ResourceKind::Snapshot => &["ID", "Volume ID", "Status", "Name", "Size"],
            ResourceKind::Backup => &[
                "ID",
                "Volume ID",
                "Status",
                "Name",
                "Size",
                "Object Count",
                "Container",
            ],
        };
        let rows: Vec<Vec<String>> = self
            .service
            .list(kind)
            .iter()
            .map(|properties| {
                headers
                    .iter()
                    .map(|header| {
                        let key = header.to_ascii_lowercase().replace(' ', "_");
                        properties.get(&key).cloned().unwrap_or_default()
                    })
                    .collect()
            })
            .collect();
        render_table(headers, &rows)
    }
}

impl CommandRunner for FakeCinderCli {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, CommandError> {
        self.invocations.borrow_mut().push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        let argv: Vec<String> = args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        Ok(self.dispatch(&argv))
    }
}

fn split_command(command: &str) -> (ResourceKind, &str) {
    for kind in [ResourceKind::Snapshot, ResourceKind::Backup] {
        if let Some(verb) = command
            .strip_prefix(kind.noun())
            .and_then(|rest| rest.strip_prefix('-'))
        {
            return (kind, verb);
        }
    }
    (ResourceKind::Volume, command)
}

fn parse_args(args: &[String]) -> Result<Parsed, String> {
    let mut positional = Vec::new();
    let mut options = BTreeMap::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if let Some(flag) = arg.strip_prefix("--") {
            let value = iter
                .next()
                .ok_or_else(|| format!("argument --{flag}: expected one argument"))?;
            options.insert(flag.replace('-', "_"), value.clone());
        } else {
            positional.push(arg.clone());
        }
    }
    Ok(Parsed {
        positional,
        options,
    })
}

fn parse_int(command: &str, argument: &str, raw: &str) -> Result<i64, CommandOutput> {
    raw.parse().map_err(|_| {
        usage_error(
            command,
            &format!("argument {argument}: invalid int value: '{raw}'"),
        )
    })
}

fn reject_extra(
    command: &str,
    extra: impl Iterator<Item = String>,
) -> Result<(), CommandOutput> {
    let leftover: Vec<String> = extra.collect();
    if leftover.is_empty() {
        return Ok(());
    }
    Err(usage_error(
        command,
        &format!("unrecognized arguments: {}", leftover.join(" ")),
    ))
}

fn usage_error(command: &str, message: &str) -> CommandOutput {
    CommandOutput {
        code: Some(USAGE_EXIT),
        stdout: String::new(),
        stderr: format!(
            "usage: cinder {command} ...\nerror: {message}\nTry 'cinder help {command}' for more information.\n"
        ),
    }
}

fn failure(message: &str) -> CommandOutput {
    CommandOutput {
        code: Some(ERROR_EXIT),
        stdout: String::new(),
        stderr: format!("ERROR: {message}\n"),
    }
}

fn service_error(err: &ServiceError) -> CommandOutput {
    failure(&format!("{} (HTTP {})", err.message, err.status))
}
