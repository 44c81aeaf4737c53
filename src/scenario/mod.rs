//! Functional scenarios exercising volumes, snapshots, and backups.
//!
//! Each scenario takes a [`Lifecycle`] and leaves cleanup to it: anything a
//! scenario creates stays registered until it is deleted explicitly or the
//! orchestrator tears down. [`ScenarioRunner`] gives every scenario (and
//! every failure case) a fresh orchestrator and reports the outcome.

mod fixtures;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{info, warn};

use crate::lifecycle::{Lifecycle, LifecycleError, PollPolicy, TeardownSummary};
use crate::resource::{CreateRequest, ResourceHandle, ResourceKind, STATUS_AVAILABLE};
use crate::transport::{Transport, TransportError};

pub use fixtures::{FailureCase, FailureFixtures};

/// Properties every volume listing must show.
pub const VOLUME_PROPERTIES: [&str; 13] = [
    "attachments",
    "availability_zone",
    "bootable",
    "created_at",
    "description",
    "encrypted",
    "id",
    "metadata",
    "name",
    "size",
    "status",
    "user_id",
    "volume_type",
];

/// Properties every snapshot listing must show.
pub const SNAPSHOT_PROPERTIES: [&str; 8] = [
    "created_at",
    "description",
    "metadata",
    "id",
    "name",
    "size",
    "status",
    "volume_id",
];

/// Properties every backup listing must show.
pub const BACKUP_PROPERTIES: [&str; 3] = ["id", "name", "volume_id"];

/// Name given to the volume in [`volume_create_delete_name`].
pub const NAMED_VOLUME: &str = "TestVolumeNamedCreate";
/// Name given to the volume in [`volume_extend`].
pub const EXTENDED_VOLUME: &str = "TestVolumeExtend";

/// Errors raised while running scenarios.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ScenarioError {
    /// Raised when creation, polling, or deletion fails.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    /// Raised when an observed resource does not look as expected.
    #[error("{scenario}: {message}")]
    Assertion {
        /// Scenario that failed.
        scenario: String,
        /// What was wrong.
        message: String,
    },
    /// Raised when an invalid input was accepted.
    #[error("{scenario}: value '{value}' was accepted but should have failed")]
    UnexpectedSuccess {
        /// Scenario that failed.
        scenario: String,
        /// Input that should have been rejected.
        value: String,
    },
    /// Raised when an invalid input failed for the wrong reason.
    #[error("{scenario}: value '{value}' failed without matching '{pattern}': {output}")]
    WrongFailure {
        /// Scenario that failed.
        scenario: String,
        /// Input that was rejected.
        value: String,
        /// Expected pattern.
        pattern: String,
        /// Failure output actually seen.
        output: String,
    },
    /// Raised when a fixture pattern is not a valid regular expression.
    #[error("invalid failure pattern '{pattern}': {message}")]
    InvalidPattern {
        /// Offending pattern.
        pattern: String,
        /// Compiler message.
        message: String,
    },
    /// Raised when a fixtures file cannot be read or parsed.
    #[error("failed to load failure fixtures from {path}: {message}")]
    Fixtures {
        /// Fixtures file.
        path: String,
        /// Reason.
        message: String,
    },
    /// Raised for a scenario name that is not in the catalogue.
    #[error("unknown scenario '{0}'")]
    UnknownScenario(String),
}

impl From<TransportError> for ScenarioError {
    fn from(value: TransportError) -> Self {
        Self::Lifecycle(LifecycleError::Transport(value))
    }
}

fn assert_properties(
    scenario: &str,
    handle: &ResourceHandle,
    expected: &[&str],
) -> Result<(), ScenarioError> {
    let missing: Vec<&str> = expected
        .iter()
        .copied()
        .filter(|name| !handle.has_property(name))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(ScenarioError::Assertion {
        scenario: scenario.to_owned(),
        message: format!(
            "{} {} is missing properties: {}",
            handle.kind(),
            handle.id(),
            missing.join(", ")
        ),
    })
}

fn assert_property(
    scenario: &str,
    handle: &ResourceHandle,
    name: &str,
    expected: &str,
) -> Result<(), ScenarioError> {
    match handle.property(name) {
        Some(value) if value == expected => Ok(()),
        observed => Err(ScenarioError::Assertion {
            scenario: scenario.to_owned(),
            message: format!(
                "{} {} has {name} {observed:?}, expected '{expected}'",
                handle.kind(),
                handle.id()
            ),
        }),
    }
}

fn one_gib_volume<T: Transport>(lifecycle: &Lifecycle<T>) -> Result<ResourceHandle, ScenarioError> {
    Ok(lifecycle.create(ResourceKind::Volume, &CreateRequest::new().arg(1))?)
}

/// Creates a 1 GiB volume, checks its properties, and deletes it by id.
///
/// # Errors
///
/// Returns [`ScenarioError`] when any step fails.
pub fn volume_create_delete_id<T: Transport>(lifecycle: &Lifecycle<T>) -> Result<(), ScenarioError> {
    let volume = one_gib_volume(lifecycle)?;
    assert_properties(Scenario::VolumeCreateDeleteId.name(), &volume, &VOLUME_PROPERTIES)?;
    lifecycle.delete(&volume)?;
    Ok(())
}

/// Creates a named volume, checks the name, and deletes it.
///
/// # Errors
///
/// Returns [`ScenarioError`] when any step fails.
pub fn volume_create_delete_name<T: Transport>(
    lifecycle: &Lifecycle<T>,
) -> Result<(), ScenarioError> {
    let scenario = Scenario::VolumeCreateDeleteName.name();
    let volume = lifecycle.create(
        ResourceKind::Volume,
        &CreateRequest::new().arg(1).option("name", NAMED_VOLUME),
    )?;
    assert_properties(scenario, &volume, &VOLUME_PROPERTIES)?;
    assert_property(scenario, &volume, "name", NAMED_VOLUME)?;
    lifecycle.delete(&volume)?;
    Ok(())
}

/// Grows a 1 GiB volume to 2 GiB and checks the new size.
///
/// # Errors
///
/// Returns [`ScenarioError`] when any step fails.
pub fn volume_extend<T: Transport>(lifecycle: &Lifecycle<T>) -> Result<(), ScenarioError> {
    let scenario = Scenario::VolumeExtend.name();
    let mut volume = lifecycle.create(
        ResourceKind::Volume,
        &CreateRequest::new().arg(1).option("name", EXTENDED_VOLUME),
    )?;
    lifecycle.extend(&volume, 2)?;
    lifecycle.wait_for_status(&mut volume, STATUS_AVAILABLE, lifecycle.policy().timeout)?;
    lifecycle.refresh(&mut volume)?;
    assert_property(scenario, &volume, "size", "2")?;
    lifecycle.delete(&volume)?;
    Ok(())
}

/// Creates a volume from a snapshot of another volume.
///
/// # Errors
///
/// Returns [`ScenarioError`] when any step fails.
pub fn volume_create_from_snapshot<T: Transport>(
    lifecycle: &Lifecycle<T>,
) -> Result<(), ScenarioError> {
    let scenario = Scenario::VolumeCreateFromSnapshot.name();
    let source = one_gib_volume(lifecycle)?;
    let snapshot = lifecycle.create(
        ResourceKind::Snapshot,
        &CreateRequest::new().arg(source.id()),
    )?;
    assert_properties(scenario, &snapshot, &SNAPSHOT_PROPERTIES)?;
    let restored = lifecycle.create(
        ResourceKind::Volume,
        &CreateRequest::new()
            .arg(1)
            .option("snapshot_id", snapshot.id()),
    )?;
    assert_properties(scenario, &restored, &VOLUME_PROPERTIES)?;
    lifecycle.delete(&snapshot)?;
    lifecycle.delete(&source)?;
    lifecycle.delete(&restored)?;
    Ok(())
}

/// Clones a volume through `source_volid`.
///
/// # Errors
///
/// Returns [`ScenarioError`] when any step fails.
pub fn volume_create_from_volume<T: Transport>(
    lifecycle: &Lifecycle<T>,
) -> Result<(), ScenarioError> {
    let scenario = Scenario::VolumeCreateFromVolume.name();
    let source = one_gib_volume(lifecycle)?;
    let clone = lifecycle.create(
        ResourceKind::Volume,
        &CreateRequest::new()
            .arg(1)
            .option("source_volid", source.id()),
    )?;
    assert_properties(scenario, &clone, &VOLUME_PROPERTIES)?;
    lifecycle.delete(&source)?;
    lifecycle.delete(&clone)?;
    Ok(())
}

/// Snapshots a volume, checks the snapshot, and deletes both.
///
/// # Errors
///
/// Returns [`ScenarioError`] when any step fails.
pub fn snapshot_create_delete<T: Transport>(lifecycle: &Lifecycle<T>) -> Result<(), ScenarioError> {
    let volume = one_gib_volume(lifecycle)?;
    let snapshot = lifecycle.create(
        ResourceKind::Snapshot,
        &CreateRequest::new().arg(volume.id()),
    )?;
    assert_properties(
        Scenario::SnapshotCreateDelete.name(),
        &snapshot,
        &SNAPSHOT_PROPERTIES,
    )?;
    lifecycle.delete(&snapshot)?;
    lifecycle.delete(&volume)?;
    Ok(())
}

/// Backs a volume up, then deletes the volume before the backup.
///
/// # Errors
///
/// Returns [`ScenarioError`] when any step fails.
pub fn backup_create_delete<T: Transport>(lifecycle: &Lifecycle<T>) -> Result<(), ScenarioError> {
    let volume = one_gib_volume(lifecycle)?;
    let backup = lifecycle.create(
        ResourceKind::Backup,
        &CreateRequest::new().arg(volume.id()),
    )?;
    assert_properties(
        Scenario::BackupCreateDelete.name(),
        &backup,
        &BACKUP_PROPERTIES,
    )?;
    lifecycle.delete(&volume)?;
    lifecycle.delete(&backup)?;
    Ok(())
}

fn expect_failure<V>(
    scenario: Scenario,
    case: &FailureCase,
    result: Result<V, LifecycleError>,
) -> Result<(), ScenarioError> {
    match result {
        Ok(_) => Err(ScenarioError::UnexpectedSuccess {
            scenario: scenario.name().to_owned(),
            value: case.value.clone(),
        }),
        Err(LifecycleError::Transport(err)) => {
            let output = err.failure_text();
            if case.matches(&output)? {
                info!(scenario = %scenario, value = %case.value, "rejected as expected");
                return Ok(());
            }
            Err(ScenarioError::WrongFailure {
                scenario: scenario.name().to_owned(),
                value: case.value.clone(),
                pattern: case.pattern.clone(),
                output,
            })
        }
        Err(other) => Err(other.into()),
    }
}

/// Creates a volume of an invalid size and checks the failure output.
///
/// # Errors
///
/// Returns [`ScenarioError::UnexpectedSuccess`] when the volume is created
/// and [`ScenarioError::WrongFailure`] when the output does not match.
pub fn volume_create_with_incorrect_size<T: Transport>(
    lifecycle: &Lifecycle<T>,
    case: &FailureCase,
) -> Result<(), ScenarioError> {
    let result = lifecycle.create(ResourceKind::Volume, &CreateRequest::new().arg(&case.value));
    expect_failure(Scenario::VolumeCreateWithIncorrectSize, case, result)
}

/// Extends a fresh volume to an invalid size and checks the failure output.
///
/// # Errors
///
/// Returns [`ScenarioError::UnexpectedSuccess`] when the extend is accepted
/// and [`ScenarioError::WrongFailure`] when the output does not match.
pub fn volume_extend_with_incorrect_size<T: Transport>(
    lifecycle: &Lifecycle<T>,
    case: &FailureCase,
) -> Result<(), ScenarioError> {
    let volume = one_gib_volume(lifecycle)?;
    let result = lifecycle.extend(&volume, &case.value);
    expect_failure(Scenario::VolumeExtendWithIncorrectSize, case, result)
}

/// Extends a volume reference that does not exist and checks the failure
/// output.
///
/// # Errors
///
/// Returns [`ScenarioError::UnexpectedSuccess`] when the extend is accepted
/// and [`ScenarioError::WrongFailure`] when the output does not match.
pub fn volume_extend_with_incorrect_volume_id<T: Transport>(
    lifecycle: &Lifecycle<T>,
    case: &FailureCase,
) -> Result<(), ScenarioError> {
    let bogus = ResourceHandle::new(ResourceKind::Volume, &case.value, BTreeMap::new());
    let result = lifecycle.extend(&bogus, 2);
    expect_failure(Scenario::VolumeExtendWithIncorrectVolumeId, case, result)
}

/// Catalogue of runnable scenarios.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Scenario {
    /// [`volume_create_delete_id`].
    VolumeCreateDeleteId,
    /// [`volume_create_delete_name`].
    VolumeCreateDeleteName,
    /// [`volume_extend`].
    VolumeExtend,
    /// [`volume_create_from_snapshot`].
    VolumeCreateFromSnapshot,
    /// [`volume_create_from_volume`].
    VolumeCreateFromVolume,
    /// [`snapshot_create_delete`].
    SnapshotCreateDelete,
    /// [`backup_create_delete`].
    BackupCreateDelete,
    /// [`volume_create_with_incorrect_size`], once per fixture.
    VolumeCreateWithIncorrectSize,
    /// [`volume_extend_with_incorrect_size`], once per fixture.
    VolumeExtendWithIncorrectSize,
    /// [`volume_extend_with_incorrect_volume_id`], once per fixture.
    VolumeExtendWithIncorrectVolumeId,
}

impl Scenario {
    /// Every scenario in catalogue order.
    pub const ALL: [Self; 10] = [
        Self::VolumeCreateDeleteId,
        Self::VolumeCreateDeleteName,
        Self::VolumeExtend,
        Self::VolumeCreateFromSnapshot,
        Self::VolumeCreateFromVolume,
        Self::SnapshotCreateDelete,
        Self::BackupCreateDelete,
        Self::VolumeCreateWithIncorrectSize,
        Self::VolumeExtendWithIncorrectSize,
        Self::VolumeExtendWithIncorrectVolumeId,
    ];

    /// Name used on the command line and in reports.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::VolumeCreateDeleteId => "volume_create_delete_id",
            Self::VolumeCreateDeleteName => "volume_create_delete_name",
            Self::VolumeExtend => "volume_extend",
            Self::VolumeCreateFromSnapshot => "volume_create_from_snapshot",
            Self::VolumeCreateFromVolume => "volume_create_from_volume",
            Self::SnapshotCreateDelete => "snapshot_create_delete",
            Self::BackupCreateDelete => "backup_create_delete",
            Self::VolumeCreateWithIncorrectSize => "volume_create_with_incorrect_size",
            Self::VolumeExtendWithIncorrectSize => "volume_extend_with_incorrect_size",
            Self::VolumeExtendWithIncorrectVolumeId => "volume_extend_with_incorrect_volume_id",
        }
    }

    /// Returns `true` for scenarios whose expected failures are argument
    /// parser messages that only the command-line client prints.
    #[must_use]
    pub const fn cli_only(self) -> bool {
        matches!(
            self,
            Self::VolumeCreateWithIncorrectSize
                | Self::VolumeExtendWithIncorrectSize
                | Self::VolumeExtendWithIncorrectVolumeId
        )
    }

    fn cases(self, fixtures: &FailureFixtures) -> Option<&[FailureCase]> {
        match self {
            Self::VolumeCreateWithIncorrectSize => Some(&fixtures.create_size),
            Self::VolumeExtendWithIncorrectSize => Some(&fixtures.extend_size),
            Self::VolumeExtendWithIncorrectVolumeId => Some(&fixtures.volume_id),
            _ => None,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scenario {
    type Err = ScenarioError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|scenario| scenario.name() == wanted)
            .ok_or_else(|| ScenarioError::UnknownScenario(value.to_owned()))
    }
}

/// How a scenario run ended.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Verdict {
    /// Every step succeeded and cleanup was clean.
    Passed,
    /// A step or the cleanup failed.
    Failed(String),
    /// The scenario does not apply to the transport in use.
    Skipped(String),
}

impl Verdict {
    /// Short label for reports.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Passed => "PASS",
            Self::Failed(_) => "FAIL",
            Self::Skipped(_) => "SKIP",
        }
    }

    /// Failure or skip reason, empty for a pass.
    #[must_use]
    pub fn detail(&self) -> &str {
        match self {
            Self::Passed => "",
            Self::Failed(reason) | Self::Skipped(reason) => reason,
        }
    }
}

/// Result of one scenario run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScenarioOutcome {
    /// Scenario that ran.
    pub scenario: Scenario,
    /// Failure-case value, for the negative scenarios.
    pub case: Option<String>,
    /// How the run ended.
    pub verdict: Verdict,
    /// Cleanup performed after the run.
    pub teardown: TeardownSummary,
    /// Wall-clock duration including cleanup.
    pub elapsed: Duration,
}

impl ScenarioOutcome {
    /// Returns `true` unless the run failed.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        !matches!(self.verdict, Verdict::Failed(_))
    }
}

/// Runs catalogue scenarios over one transport.
#[derive(Debug)]
pub struct ScenarioRunner<T: Transport> {
    transport: T,
    policy: PollPolicy,
    fixtures: FailureFixtures,
}

impl<T: Transport> ScenarioRunner<T> {
    /// Builds a runner with default fixtures and poll policy.
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            policy: PollPolicy::default(),
            fixtures: FailureFixtures::default(),
        }
    }

    /// Replaces the poll policy handed to each orchestrator.
    #[must_use]
    pub const fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replaces the expected failure messages.
    #[must_use]
    pub fn with_fixtures(mut self, fixtures: FailureFixtures) -> Self {
        self.fixtures = fixtures;
        self
    }

    /// Transport in use.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Runs every scenario in `scenarios`, in order.
    #[must_use]
    pub fn run_all(&self, scenarios: &[Scenario]) -> Vec<ScenarioOutcome> {
        scenarios
            .iter()
            .flat_map(|scenario| self.run(*scenario))
            .collect()
    }

    /// Runs one scenario; negative scenarios yield one outcome per fixture
    /// case.
    #[must_use]
    pub fn run(&self, scenario: Scenario) -> Vec<ScenarioOutcome> {
        if scenario.cli_only() && self.transport.label() != "cli" {
            return vec![ScenarioOutcome {
                scenario,
                case: None,
                verdict: Verdict::Skipped(format!(
                    "expects client messages; transport is {}",
                    self.transport.label()
                )),
                teardown: TeardownSummary::default(),
                elapsed: Duration::ZERO,
            }];
        }
        match scenario.cases(&self.fixtures) {
            Some(cases) => cases
                .iter()
                .map(|case| self.run_once(scenario, Some(case)))
                .collect(),
            None => vec![self.run_once(scenario, None)],
        }
    }

    fn run_once(&self, scenario: Scenario, case: Option<&FailureCase>) -> ScenarioOutcome {
        let started = Instant::now();
        info!(%scenario, case = case.map(|failure| failure.value.as_str()), "scenario started");
        let lifecycle = Lifecycle::new(&self.transport).with_poll_policy(self.policy);
        let result = match (scenario, case) {
            (Scenario::VolumeCreateDeleteId, _) => volume_create_delete_id(&lifecycle),
            (Scenario::VolumeCreateDeleteName, _) => volume_create_delete_name(&lifecycle),
            (Scenario::VolumeExtend, _) => volume_extend(&lifecycle),
            (Scenario::VolumeCreateFromSnapshot, _) => volume_create_from_snapshot(&lifecycle),
            (Scenario::VolumeCreateFromVolume, _) => volume_create_from_volume(&lifecycle),
            (Scenario::SnapshotCreateDelete, _) => snapshot_create_delete(&lifecycle),
            (Scenario::BackupCreateDelete, _) => backup_create_delete(&lifecycle),
            (Scenario::VolumeCreateWithIncorrectSize, Some(failure)) => {
                volume_create_with_incorrect_size(&lifecycle, failure)
            }
            (Scenario::VolumeExtendWithIncorrectSize, Some(failure)) => {
                volume_extend_with_incorrect_size(&lifecycle, failure)
            }
            (Scenario::VolumeExtendWithIncorrectVolumeId, Some(failure)) => {
                volume_extend_with_incorrect_volume_id(&lifecycle, failure)
            }
            (_, None) => Err(ScenarioError::Fixtures {
                path: String::from("<defaults>"),
                message: format!("{scenario} needs a failure case"),
            }),
        };
        let teardown = lifecycle.teardown();
        let verdict = match result {
            Ok(()) if teardown.is_clean() => Verdict::Passed,
            Ok(()) => Verdict::Failed(format!(
                "cleanup left {} resource(s) behind",
                teardown.failures.len()
            )),
            Err(err) => Verdict::Failed(err.to_string()),
        };
        let elapsed = started.elapsed();
        match &verdict {
            Verdict::Failed(reason) => warn!(%scenario, %reason, ?elapsed, "scenario failed"),
            _ => info!(%scenario, verdict = verdict.label(), ?elapsed, "scenario finished"),
        }
        ScenarioOutcome {
            scenario,
            case: case.map(|failure| failure.value.clone()),
            verdict,
            teardown,
            elapsed,
        }
    }
}

#[cfg(test)]
mod tests;
