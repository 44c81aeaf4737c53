//! Unit tests for the `cinder-functional` binary implementation.
//!
//! Keeping these tests in a separate module helps keep `src/main.rs` focused
//! on wiring.

use super::*;
use cinder_functional::scenario::Verdict;
use cinder_functional::test_support::FakeCinder;
use cli::{ExtendCommand, TargetCommand};
use rstest::{fixture, rstest};

const FAST: PollPolicy = PollPolicy::new(Duration::from_millis(200), Duration::from_millis(1));

fn config() -> HarnessConfig {
    HarnessConfig {
        transport: String::from("api"),
        cli_program: String::from("cinder"),
        exec_dir: None,
        wait_timeout_secs: 1,
        poll_interval_ms: 1,
        credentials_file: String::from("functional_creds.conf"),
        failure_fixtures: None,
    }
}

#[fixture]
fn service() -> FakeCinder {
    FakeCinder::new()
}

fn run(service: &FakeCinder, command: &Command) -> Result<String, CliError> {
    let transport = ApiTransport::new(service.clone());
    let mut out = Vec::new();
    execute(&transport, command, &config(), FAST, &mut out)?;
    Ok(String::from_utf8(out).expect("utf8 output"))
}

#[rstest]
fn create_prints_the_available_resource(service: FakeCinder) {
    let command = Command::Create(CreateCommand {
        kind: KindArg::Volume,
        args: vec![String::from("1")],
        options: vec![(String::from("name"), String::from("scratch"))],
    });

    let rendered = run(&service, &command).expect("create");

    assert!(rendered.contains("scratch"), "{rendered}");
    assert!(rendered.contains(STATUS_AVAILABLE), "{rendered}");
    assert_eq!(service.count(ResourceKind::Volume), 1);
}

#[rstest]
fn create_timeout_prints_the_leftover_id(service: FakeCinder) {
    service.freeze();
    let transport = ApiTransport::new(service.clone());
    let command = Command::Create(CreateCommand {
        kind: KindArg::Volume,
        args: vec![String::from("1")],
        options: Vec::new(),
    });
    let mut out = Vec::new();

    let err = execute(&transport, &command, &config(), FAST, &mut out).expect_err("never settles");

    assert!(
        matches!(err, CliError::Lifecycle(LifecycleError::Timeout { .. })),
        "unexpected error: {err}"
    );
    let rendered = String::from_utf8(out).expect("utf8 output");
    let volumes = service.list(ResourceKind::Volume);
    let [volume] = volumes.as_slice() else {
        panic!("expected one volume, got {volumes:?}");
    };
    let id = volume.get("id").expect("volume id");
    assert!(rendered.contains(&format!("delete volume {id}")), "{rendered}");
    service.thaw();
}

#[rstest]
fn delete_removes_the_resource(service: FakeCinder) {
    let transport = ApiTransport::new(service.clone());
    let created = transport
        .create(ResourceKind::Volume, &CreateRequest::new().arg(1))
        .expect("create");
    transport
        .get(ResourceKind::Volume, created.id())
        .expect("settle");

    let rendered = run(
        &service,
        &Command::Delete(TargetCommand {
            kind: KindArg::Volume,
            id: created.id().to_owned(),
        }),
    )
    .expect("delete");

    assert!(rendered.starts_with("Deleted volume"), "{rendered}");
    assert!(!service.contains(ResourceKind::Volume, created.id()));
}

#[rstest]
fn extend_reports_the_new_size(service: FakeCinder) {
    let transport = ApiTransport::new(service.clone());
    let created = transport
        .create(ResourceKind::Volume, &CreateRequest::new().arg(1))
        .expect("create");
    transport
        .get(ResourceKind::Volume, created.id())
        .expect("settle");

    run(
        &service,
        &Command::Extend(ExtendCommand {
            id: created.id().to_owned(),
            size: String::from("3"),
        }),
    )
    .expect("extend");

    let extended = transport
        .get(ResourceKind::Volume, created.id())
        .expect("get");
    assert_eq!(extended.size(), Some(3));
}

#[rstest]
fn show_missing_resource_is_not_found(service: FakeCinder) {
    let err = run(
        &service,
        &Command::Show(TargetCommand {
            kind: KindArg::Snapshot,
            id: String::from("missing"),
        }),
    )
    .expect_err("missing snapshot");

    assert!(
        matches!(err, CliError::Transport(TransportError::NotFound { .. })),
        "unexpected error: {err}"
    );
}

#[rstest]
fn scenario_table_lists_each_run(service: FakeCinder) {
    let rendered = run(
        &service,
        &Command::Scenario(ScenarioCommand {
            names: vec![String::from("volume_extend"), String::from("backup_create_delete")],
            fixtures: None,
        }),
    )
    .expect("scenarios pass");

    assert!(rendered.contains("volume_extend"), "{rendered}");
    assert!(rendered.contains("backup_create_delete"), "{rendered}");
    assert_eq!(rendered.matches("PASS").count(), 2, "{rendered}");
}

#[rstest]
fn failing_scenarios_set_the_error(service: FakeCinder) {
    let tight = service.with_quota_gb(1);
    let err = run(
        &tight,
        &Command::Scenario(ScenarioCommand {
            names: vec![String::from("volume_create_from_volume")],
            fixtures: None,
        }),
    )
    .expect_err("quota exceeded");

    assert!(
        matches!(err, CliError::ScenariosFailed { failed: 1, total: 1 }),
        "unexpected error: {err}"
    );
}

#[test]
fn select_scenarios_expands_all() {
    let selected = select_scenarios(&[String::from("all")]).expect("all");
    assert_eq!(selected, Scenario::ALL.to_vec());
}

#[test]
fn select_scenarios_rejects_unknown_names() {
    let err = select_scenarios(&[String::from("volume_extend"), String::from("nope")])
        .expect_err("unknown scenario");
    assert_eq!(err, ScenarioError::UnknownScenario(String::from("nope")));
}

#[test]
fn render_outcomes_shows_skip_reasons() {
    let outcome = ScenarioOutcome {
        scenario: Scenario::VolumeExtendWithIncorrectSize,
        case: None,
        verdict: Verdict::Skipped(String::from("expects client messages")),
        teardown: cinder_functional::lifecycle::TeardownSummary::default(),
        elapsed: Duration::from_millis(1500),
    };
    let rendered = render_outcomes(&[outcome]);

    assert!(rendered.contains("SKIP"), "{rendered}");
    assert!(rendered.contains("expects client messages"), "{rendered}");
    assert!(rendered.contains("1s 500ms"), "{rendered}");
}

#[test]
fn timeout_flag_overrides_configured_deadline() {
    let policy = poll_policy(&config(), Some(Duration::from_secs(90)));
    assert_eq!(policy.timeout, Duration::from_secs(90));
    assert_eq!(policy.interval, Duration::from_millis(1));
}

#[test]
fn create_request_keeps_argument_order() {
    let request = create_request(&CreateCommand {
        kind: KindArg::Volume,
        args: vec![String::from("2"), String::from("GB")],
        options: vec![(String::from("source_volid"), String::from("v-1"))],
    });
    assert_eq!(request.positional(), ["2", "GB"]);
    assert_eq!(
        request.options(),
        [(String::from("source_volid"), String::from("v-1"))]
    );
}

#[rstest]
#[case(&["cinder-functional", "create", "volume", "1", "--opt", "name=x"])]
#[case(&["cinder-functional", "--transport", "api", "show", "backup", "b-1"])]
#[case(&["cinder-functional", "scenario", "all", "--timeout", "2m"])]
fn command_lines_parse(#[case] argv: &[&str]) {
    Cli::try_parse_from(argv).expect("valid command line");
}

#[rstest]
#[case(&["cinder-functional", "create", "volume", "--opt", "novalue"])]
#[case(&["cinder-functional", "scenario"])]
#[case(&["cinder-functional", "connector", "--enforce-multipath"])]
fn invalid_command_lines_are_rejected(#[case] argv: &[&str]) {
    assert!(Cli::try_parse_from(argv).is_err());
}

#[test]
fn write_error_writes_cli_error() {
    let mut buf = Vec::new();
    let err = CliError::ScenariosFailed {
        failed: 2,
        total: 5,
    };
    write_error(&mut buf, &err);
    let rendered = String::from_utf8(buf).expect("utf8");
    assert!(
        rendered.contains("2 of 5 scenario runs failed"),
        "rendered: {rendered}"
    );
}
