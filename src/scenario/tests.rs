//! Unit tests for the scenario catalogue and runner.

use std::io::Write as _;

use camino::Utf8Path;
use rstest::{fixture, rstest};

use super::*;
use crate::test_support::{FakeCinder, FakeCinderCli, fake_credentials};
use crate::transport::{ApiTransport, CliTransport};

const POLICY: PollPolicy = PollPolicy::new(Duration::from_millis(200), Duration::from_millis(1));

const POSITIVE: [Scenario; 7] = [
    Scenario::VolumeCreateDeleteId,
    Scenario::VolumeCreateDeleteName,
    Scenario::VolumeExtend,
    Scenario::VolumeCreateFromSnapshot,
    Scenario::VolumeCreateFromVolume,
    Scenario::SnapshotCreateDelete,
    Scenario::BackupCreateDelete,
];

#[fixture]
fn service() -> FakeCinder {
    FakeCinder::new()
}

fn api_runner(service: &FakeCinder) -> ScenarioRunner<ApiTransport<FakeCinder>> {
    ScenarioRunner::new(ApiTransport::new(service.clone())).with_poll_policy(POLICY)
}

fn cli_runner(service: &FakeCinder) -> ScenarioRunner<CliTransport<FakeCinderCli>> {
    let transport = CliTransport::new(
        FakeCinderCli::new(service.clone()),
        "cinder",
        &fake_credentials(),
    )
    .expect("fake credentials are complete");
    ScenarioRunner::new(transport).with_poll_policy(POLICY)
}

fn single(outcomes: &[ScenarioOutcome]) -> &ScenarioOutcome {
    let [outcome] = outcomes else {
        panic!("expected one outcome, got {outcomes:?}");
    };
    outcome
}

fn assert_residue_free(service: &FakeCinder) {
    for kind in ResourceKind::ALL {
        assert_eq!(service.count(kind), 0, "{kind}s left behind");
    }
}

#[rstest]
fn positive_scenarios_pass_over_the_api(service: FakeCinder) {
    let outcomes = api_runner(&service).run_all(&POSITIVE);

    assert_eq!(outcomes.len(), POSITIVE.len());
    for outcome in &outcomes {
        assert_eq!(outcome.verdict, Verdict::Passed, "{}", outcome.scenario);
        assert!(outcome.teardown.is_clean());
    }
    assert_residue_free(&service);
}

#[rstest]
fn positive_scenarios_pass_over_the_client(service: FakeCinder) {
    let outcomes = cli_runner(&service).run_all(&POSITIVE);

    for outcome in &outcomes {
        assert_eq!(outcome.verdict, Verdict::Passed, "{}", outcome.scenario);
    }
    assert_residue_free(&service);
}

#[rstest]
#[case(Scenario::VolumeCreateWithIncorrectSize, 7)]
#[case(Scenario::VolumeExtendWithIncorrectSize, 7)]
#[case(Scenario::VolumeExtendWithIncorrectVolumeId, 4)]
fn default_fixtures_match_client_failures(
    service: FakeCinder,
    #[case] scenario: Scenario,
    #[case] cases: usize,
) {
    let outcomes = cli_runner(&service).run(scenario);

    assert_eq!(outcomes.len(), cases);
    for outcome in &outcomes {
        assert_eq!(
            outcome.verdict,
            Verdict::Passed,
            "{} with {:?}",
            outcome.scenario,
            outcome.case
        );
    }
    assert_residue_free(&service);
}

#[rstest]
fn client_message_scenarios_are_skipped_over_the_api(service: FakeCinder) {
    let outcomes = api_runner(&service).run(Scenario::VolumeCreateWithIncorrectSize);
    let outcome = single(&outcomes);

    assert!(matches!(outcome.verdict, Verdict::Skipped(_)));
    assert!(outcome.is_ok());
}

#[rstest]
fn accepted_invalid_value_fails_and_is_cleaned_up(service: FakeCinder) {
    let fixtures = FailureFixtures {
        create_size: vec![FailureCase::new("1", "anything")],
        ..FailureFixtures::default()
    };
    let outcomes = cli_runner(&service)
        .with_fixtures(fixtures)
        .run(Scenario::VolumeCreateWithIncorrectSize);
    let outcome = single(&outcomes);

    let Verdict::Failed(reason) = &outcome.verdict else {
        panic!("expected a failure, got {:?}", outcome.verdict);
    };
    assert!(reason.contains("was accepted"), "{reason}");
    assert_eq!(outcome.teardown.deleted, 1);
    assert_residue_free(&service);
}

#[rstest]
fn failure_with_unexpected_output_is_reported(service: FakeCinder) {
    let runner = cli_runner(&service);
    let lifecycle = Lifecycle::new(runner.transport()).with_poll_policy(POLICY);
    let case = FailureCase::new("size", "Size is a required parameter");

    let err = volume_create_with_incorrect_size(&lifecycle, &case).expect_err("wrong message");

    let ScenarioError::WrongFailure { output, .. } = &err else {
        panic!("expected WrongFailure, got {err:?}");
    };
    assert!(output.contains("invalid int value"), "{output}");
}

#[rstest]
fn malformed_pattern_is_an_error(service: FakeCinder) {
    let runner = cli_runner(&service);
    let lifecycle = Lifecycle::new(runner.transport()).with_poll_policy(POLICY);
    let case = FailureCase::new("size", "(unclosed");

    let err = volume_create_with_incorrect_size(&lifecycle, &case).expect_err("bad regex");
    assert!(matches!(err, ScenarioError::InvalidPattern { .. }));
}

#[rstest]
fn failed_step_still_tears_down_earlier_resources(service: FakeCinder) {
    let tight = service.with_quota_gb(1);
    let outcomes = api_runner(&tight).run(Scenario::VolumeCreateFromVolume);
    let outcome = single(&outcomes);

    let Verdict::Failed(reason) = &outcome.verdict else {
        panic!("clone should exceed quota, got {:?}", outcome.verdict);
    };
    assert!(reason.contains("VolumeSizeExceedsAvailableQuota"), "{reason}");
    assert_eq!(outcome.teardown.deleted, 1);
    assert_residue_free(&tight);
}

#[rstest]
#[case("volume_extend", Scenario::VolumeExtend)]
#[case("backup-create-delete", Scenario::BackupCreateDelete)]
#[case(" snapshot_create_delete ", Scenario::SnapshotCreateDelete)]
fn scenario_names_parse(#[case] raw: &str, #[case] expected: Scenario) {
    assert_eq!(raw.parse::<Scenario>(), Ok(expected));
}

#[test]
fn unknown_scenario_name_is_rejected() {
    assert_eq!(
        "volume_teleport".parse::<Scenario>(),
        Err(ScenarioError::UnknownScenario(String::from("volume_teleport")))
    );
}

#[test]
fn catalogue_names_round_trip() {
    for scenario in Scenario::ALL {
        assert_eq!(scenario.name().parse::<Scenario>(), Ok(scenario));
    }
}

#[test]
fn fixtures_override_only_the_tables_given() {
    let fixtures = FailureFixtures::from_toml(
        r#"
        [[volume_id]]
        value = "nope"
        pattern = "No volume"
        "#,
    )
    .expect("valid fixtures");

    assert_eq!(fixtures.volume_id, vec![FailureCase::new("nope", "No volume")]);
    assert_eq!(fixtures.create_size, FailureFixtures::default().create_size);
}

#[test]
fn fixtures_load_from_a_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(
        file,
        "[[extend_size]]\nvalue = \"7 TB\"\npattern = \"unrecognized arguments\""
    )
    .expect("write fixtures");
    let path = Utf8Path::from_path(file.path()).expect("utf8 temp path");

    let fixtures = FailureFixtures::load(path).expect("load fixtures");
    assert_eq!(
        fixtures.extend_size,
        vec![FailureCase::new("7 TB", "unrecognized arguments")]
    );
}

#[test]
fn missing_fixtures_file_names_the_path() {
    let err = FailureFixtures::load(Utf8Path::new("/nonexistent/fixtures.toml"))
        .expect_err("missing file");
    assert!(err.to_string().contains("/nonexistent/fixtures.toml"));
}
