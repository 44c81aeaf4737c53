//! Unit tests for the lifecycle orchestrator.

use std::cell::Cell;
use std::time::{Duration, Instant};

use rstest::{fixture, rstest};

use super::*;
use crate::test_support::FakeCinder;
use crate::transport::ApiTransport;

const TIMEOUT: Duration = Duration::from_millis(80);
const INTERVAL: Duration = Duration::from_millis(10);

/// Counts observations made through the wrapped transport.
struct Counting<T> {
    inner: T,
    gets: Cell<usize>,
}

impl<T: Transport> Transport for Counting<T> {
    fn label(&self) -> &'static str {
        "counting"
    }

    fn create(
        &self,
        kind: ResourceKind,
        request: &CreateRequest,
    ) -> Result<ResourceHandle, TransportError> {
        self.inner.create(kind, request)
    }

    fn get(&self, kind: ResourceKind, id: &str) -> Result<ResourceHandle, TransportError> {
        self.gets.set(self.gets.get() + 1);
        self.inner.get(kind, id)
    }

    fn delete(&self, kind: ResourceKind, id: &str) -> Result<(), TransportError> {
        self.inner.delete(kind, id)
    }

    fn extend(&self, handle: &ResourceHandle, new_size: &str) -> Result<(), TransportError> {
        self.inner.extend(handle, new_size)
    }
}

#[fixture]
fn service() -> FakeCinder {
    FakeCinder::new()
}

fn lifecycle(service: &FakeCinder) -> Lifecycle<ApiTransport<FakeCinder>> {
    Lifecycle::new(ApiTransport::new(service.clone()))
        .with_poll_policy(PollPolicy::new(TIMEOUT, INTERVAL))
}

fn one_gib() -> CreateRequest {
    CreateRequest::new().arg(1)
}

#[rstest]
fn create_waits_until_available_and_registers(service: FakeCinder) {
    let slow = service.with_transition_polls(3);
    let orchestrator = lifecycle(&slow);

    let handle = orchestrator
        .create(ResourceKind::Volume, &one_gib())
        .expect("volume becomes available");

    assert_eq!(handle.status(), Some(STATUS_AVAILABLE));
    assert_eq!(
        orchestrator.registered(),
        vec![(ResourceKind::Volume, handle.id().to_owned())]
    );
}

#[rstest]
fn satisfied_status_needs_a_single_observation(service: FakeCinder) {
    let orchestrator = lifecycle(&service);
    let mut handle = orchestrator
        .create(ResourceKind::Volume, &one_gib())
        .expect("create");

    let counting = Counting {
        inner: ApiTransport::new(service.clone()),
        gets: Cell::new(0),
    };
    let observer = Lifecycle::new(&counting).with_poll_policy(PollPolicy::new(TIMEOUT, INTERVAL));
    observer
        .wait_for_status(&mut handle, STATUS_AVAILABLE, TIMEOUT)
        .expect("already available");

    assert_eq!(counting.gets.get(), 1);
}

#[rstest]
fn unreachable_status_times_out_no_earlier_than_the_deadline(service: FakeCinder) {
    let orchestrator = lifecycle(&service);
    let mut handle = orchestrator
        .create(ResourceKind::Volume, &one_gib())
        .expect("create");

    let started = Instant::now();
    let err = orchestrator
        .wait_for_status(&mut handle, "in-use", TIMEOUT)
        .expect_err("volume never attaches");
    let elapsed = started.elapsed();

    assert!(elapsed >= TIMEOUT, "gave up after {elapsed:?}");
    assert!(elapsed < TIMEOUT * 20, "hung for {elapsed:?}");
    let LifecycleError::Timeout { id, status, .. } = &err else {
        panic!("expected Timeout, got {err:?}");
    };
    assert_eq!(id, handle.id());
    assert_eq!(status, STATUS_AVAILABLE);
    assert!(err.to_string().contains(handle.id()));
}

#[rstest]
fn timed_out_create_stays_registered(service: FakeCinder) {
    service.freeze();
    let orchestrator = lifecycle(&service);

    let err = orchestrator
        .create(ResourceKind::Volume, &one_gib())
        .expect_err("frozen service never settles");

    assert!(matches!(err, LifecycleError::Timeout { ref status, .. } if status == "creating"));
    assert_eq!(orchestrator.registered().len(), 1);

    service.thaw();
    let summary = orchestrator.teardown();
    assert_eq!(summary.deleted, 1);
    assert_eq!(service.count(ResourceKind::Volume), 0);
}

#[rstest]
fn deleting_an_absent_resource_succeeds(service: FakeCinder) {
    let orchestrator = lifecycle(&service);
    let ghost = ResourceHandle::new(ResourceKind::Volume, "gone", Default::default());

    let started = Instant::now();
    orchestrator.delete(&ghost).expect("idempotent delete");
    assert!(started.elapsed() < TIMEOUT);
}

#[rstest]
fn delete_confirms_absence_and_unregisters(service: FakeCinder) {
    let orchestrator = lifecycle(&service);
    let handle = orchestrator
        .create(ResourceKind::Volume, &one_gib())
        .expect("create");

    orchestrator.delete(&handle).expect("delete");

    assert!(!service.contains(ResourceKind::Volume, handle.id()));
    assert!(orchestrator.registered().is_empty());
    assert_eq!(orchestrator.teardown(), TeardownSummary::default());
}

#[rstest]
fn stuck_deletion_times_out(service: FakeCinder) {
    let orchestrator = lifecycle(&service);
    let handle = orchestrator
        .create(ResourceKind::Volume, &one_gib())
        .expect("create");
    service.freeze();

    let err = orchestrator.delete(&handle).expect_err("deletion never completes");
    assert!(matches!(err, LifecycleError::DeleteTimeout { .. }));
    service.thaw();
}

#[rstest]
fn timed_out_deletion_stays_registered_for_teardown(service: FakeCinder) {
    let orchestrator = lifecycle(&service);
    let handle = orchestrator
        .create(ResourceKind::Volume, &one_gib())
        .expect("create");
    service.freeze();

    orchestrator
        .delete(&handle)
        .expect_err("deletion never completes");

    assert_eq!(
        orchestrator.registered(),
        vec![(ResourceKind::Volume, handle.id().to_owned())]
    );
    assert!(service.contains(ResourceKind::Volume, handle.id()));

    let summary = orchestrator.teardown();
    assert_eq!(summary.deleted, 0);
    let [failure] = summary.failures.as_slice() else {
        panic!("expected one cleanup failure, got {summary:?}");
    };
    assert_eq!(failure.id, handle.id());
    assert!(matches!(failure.error, LifecycleError::DeleteTimeout { .. }));
    service.thaw();
}

#[rstest]
fn refused_delete_propagates_and_stays_registered(service: FakeCinder) {
    let orchestrator = lifecycle(&service);
    let volume = orchestrator
        .create(ResourceKind::Volume, &one_gib())
        .expect("volume");
    orchestrator
        .create(ResourceKind::Snapshot, &CreateRequest::new().arg(volume.id()))
        .expect("snapshot");

    let err = orchestrator.delete(&volume).expect_err("volume has a snapshot");
    assert!(matches!(
        err,
        LifecycleError::Transport(TransportError::Api { status: 400, .. })
    ));
    assert_eq!(orchestrator.registered().len(), 2);
}

#[rstest]
fn teardown_runs_newest_first_and_only_once(service: FakeCinder) {
    let orchestrator = lifecycle(&service);
    let volume = orchestrator
        .create(ResourceKind::Volume, &one_gib())
        .expect("volume");
    orchestrator
        .create(ResourceKind::Snapshot, &CreateRequest::new().arg(volume.id()))
        .expect("snapshot");

    let summary = orchestrator.teardown();
    assert!(summary.is_clean(), "{summary:?}");
    assert_eq!(summary.deleted, 2);
    assert_eq!(orchestrator.teardown().deleted, 0);
    assert_eq!(service.count(ResourceKind::Volume), 0);
    assert_eq!(service.count(ResourceKind::Snapshot), 0);
}

#[rstest]
fn drop_cleans_up_registered_resources(service: FakeCinder) {
    {
        let orchestrator = lifecycle(&service);
        let volume = orchestrator
            .create(ResourceKind::Volume, &one_gib())
            .expect("volume");
        orchestrator
            .create(ResourceKind::Backup, &CreateRequest::new().arg(volume.id()))
            .expect("backup");
    }
    assert_eq!(service.count(ResourceKind::Volume), 0);
    assert_eq!(service.count(ResourceKind::Backup), 0);
}

#[rstest]
fn extend_then_wait_reports_new_size(service: FakeCinder) {
    let orchestrator = lifecycle(&service);
    let mut handle = orchestrator
        .create(ResourceKind::Volume, &one_gib())
        .expect("create");

    orchestrator.extend(&handle, 2).expect("extend");
    orchestrator
        .wait_for_status(&mut handle, STATUS_AVAILABLE, TIMEOUT)
        .expect("available again");
    orchestrator.refresh(&mut handle).expect("refresh");

    assert_eq!(handle.size(), Some(2));
}
