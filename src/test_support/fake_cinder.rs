//! In-memory block-storage service.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::resource::{ResourceKind, STATUS_AVAILABLE};
use crate::transport::api::flatten_properties;
use crate::transport::{BlockStorageApi, HttpMethod, TransportError};

const DEFAULT_QUOTA_GB: i64 = 1000;
const CREATED_AT: &str = "2024-01-01T00:00:00.000000";

/// Error answered by the fake service, shaped like an HTTP fault.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{message} (HTTP {status})")]
pub struct ServiceError {
    /// HTTP status code.
    pub status: u16,
    /// Fault message.
    pub message: String,
}

impl ServiceError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: 400,
            message: message.into(),
        }
    }

    fn not_found(kind: ResourceKind, id: &str) -> Self {
        Self {
            status: 404,
            message: format!("{} {id} could not be found.", title(kind)),
        }
    }
}

impl From<ServiceError> for TransportError {
    fn from(err: ServiceError) -> Self {
        Self::Api {
            status: err.status,
            message: err.message,
        }
    }
}

fn title(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Volume => "Volume",
        ResourceKind::Snapshot => "Snapshot",
        ResourceKind::Backup => "Backup",
    }
}

#[derive(Debug)]
enum Outcome {
    Settle {
        status: &'static str,
        size: Option<i64>,
    },
    Remove,
}

#[derive(Debug)]
struct Transition {
    polls_left: u32,
    outcome: Outcome,
}

#[derive(Debug)]
struct Record {
    kind: ResourceKind,
    seq: u64,
    properties: BTreeMap<String, String>,
    transition: Option<Transition>,
}

impl Record {
    fn size(&self) -> i64 {
        self.properties
            .get("size")
            .and_then(|value| value.parse().ok())
            .unwrap_or(0)
    }

    fn status(&self) -> &str {
        self.properties.get("status").map_or("", String::as_str)
    }

    fn is_deleting(&self) -> bool {
        matches!(
            self.transition,
            Some(Transition {
                outcome: Outcome::Remove,
                ..
            })
        )
    }
}

#[derive(Debug)]
struct State {
    records: BTreeMap<String, Record>,
    next_seq: u64,
    transition_polls: u32,
    frozen: bool,
    quota_gb: i64,
    user_id: String,
}

impl State {
    fn record(&self, kind: ResourceKind, id: &str) -> Result<&Record, ServiceError> {
        self.records
            .get(id)
            .filter(|record| record.kind == kind)
            .ok_or_else(|| ServiceError::not_found(kind, id))
    }

    fn used_gb(&self) -> i64 {
        self.records
            .values()
            .filter(|record| record.kind == ResourceKind::Volume && !record.is_deleting())
            .map(Record::size)
            .sum()
    }

    fn check_quota(&self, requested: i64) -> Result<(), ServiceError> {
        let used = self.used_gb();
        if requested.saturating_add(used) > self.quota_gb {
            return Err(ServiceError {
                status: 413,
                message: format!(
                    "VolumeSizeExceedsAvailableQuota: Requested volume or snapshot exceeds \
                     allowed gigabytes quota. Requested {requested}G, quota is {}G and {used}G \
                     has been consumed.",
                    self.quota_gb
                ),
            });
        }
        Ok(())
    }

    fn insert(&mut self, kind: ResourceKind, properties: BTreeMap<String, String>) -> String {
        let id = properties.get("id").cloned().unwrap_or_default();
        self.next_seq += 1;
        self.records.insert(
            id.clone(),
            Record {
                kind,
                seq: self.next_seq,
                properties,
                transition: None,
            },
        );
        id
    }

    fn schedule(&mut self, id: &str, outcome: Outcome) {
        if self.transition_polls == 0 {
            self.apply(id, outcome);
            return;
        }
        let polls_left = self.transition_polls;
        if let Some(record) = self.records.get_mut(id) {
            record.transition = Some(Transition {
                polls_left,
                outcome,
            });
        }
    }

    fn apply(&mut self, id: &str, outcome: Outcome) {
        match outcome {
            Outcome::Remove => {
                self.records.remove(id);
            }
            Outcome::Settle { status, size } => {
                if let Some(record) = self.records.get_mut(id) {
                    record
                        .properties
                        .insert(String::from("status"), status.to_owned());
                    if let Some(new_size) = size {
                        record
                            .properties
                            .insert(String::from("size"), new_size.to_string());
                    }
                }
            }
        }
    }

    /// One observation: every pending transition moves one poll closer.
    fn tick(&mut self) {
        if self.frozen {
            return;
        }
        let mut due = Vec::new();
        for (id, record) in &mut self.records {
            let ready = record.transition.as_mut().is_some_and(|transition| {
                transition.polls_left = transition.polls_left.saturating_sub(1);
                transition.polls_left == 0
            });
            if ready && let Some(transition) = record.transition.take() {
                due.push((id.clone(), transition.outcome));
            }
        }
        for (id, outcome) in due {
            self.apply(&id, outcome);
        }
    }
}

/// Shared in-memory block-storage service.
///
/// Objects start in a transitional status (`creating`, `extending`,
/// `deleting`) and settle after a configurable number of observations
/// (`show` or `list` calls). Clones share state.
#[derive(Clone, Debug)]
pub struct FakeCinder {
    state: Rc<RefCell<State>>,
}

impl Default for FakeCinder {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCinder {
    /// Creates an empty service where transitions settle on the next
    /// observation.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(State {
                records: BTreeMap::new(),
                next_seq: 0,
                transition_polls: 1,
                frozen: false,
                quota_gb: DEFAULT_QUOTA_GB,
                user_id: String::from("fake-user"),
            })),
        }
    }

    /// Number of observations before a transition settles; `0` settles
    /// immediately.
    #[must_use]
    pub fn with_transition_polls(self, polls: u32) -> Self {
        self.state.borrow_mut().transition_polls = polls;
        self
    }

    /// Total gigabyte quota for volumes.
    #[must_use]
    pub fn with_quota_gb(self, quota_gb: i64) -> Self {
        self.state.borrow_mut().quota_gb = quota_gb;
        self
    }

    /// Stops pending transitions from settling.
    pub fn freeze(&self) {
        self.state.borrow_mut().frozen = true;
    }

    /// Lets pending transitions settle again.
    pub fn thaw(&self) {
        self.state.borrow_mut().frozen = false;
    }

    /// Returns `true` while the object exists, including while deleting.
    #[must_use]
    pub fn contains(&self, kind: ResourceKind, id: &str) -> bool {
        self.state.borrow().record(kind, id).is_ok()
    }

    /// Number of stored objects of `kind`.
    #[must_use]
    pub fn count(&self, kind: ResourceKind) -> usize {
        self.state
            .borrow()
            .records
            .values()
            .filter(|record| record.kind == kind)
            .count()
    }

    /// Current status without counting as an observation.
    #[must_use]
    pub fn status_of(&self, kind: ResourceKind, id: &str) -> Option<String> {
        self.state
            .borrow()
            .record(kind, id)
            .ok()
            .map(|record| record.status().to_owned())
    }

    /// Resolves a name or id to an id without counting as an observation.
    #[must_use]
    pub fn find(&self, kind: ResourceKind, name_or_id: &str) -> Option<String> {
        let state = self.state.borrow();
        if state.record(kind, name_or_id).is_ok() {
            return Some(name_or_id.to_owned());
        }
        let mut named = state.records.iter().filter(|(_, record)| {
            record.kind == kind
                && record.properties.get("name").map(String::as_str) == Some(name_or_id)
        });
        match (named.next(), named.next()) {
            (Some((id, _)), None) => Some(id.clone()),
            _ => None,
        }
    }

    /// Creates a volume. Without a size the size of `snapshot_id` or
    /// `source_volid` is used.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] for invalid sizes, unknown sources, or
    /// exhausted quota.
    pub fn create_volume(
        &self,
        size: Option<i64>,
        options: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>, ServiceError> {
        let mut state = self.state.borrow_mut();

        let mut source_size = None;
        if let Some(snapshot_id) = options.get("snapshot_id") {
            source_size = Some(state.record(ResourceKind::Snapshot, snapshot_id)?.size());
        }
        if let Some(volume_id) = options.get("source_volid") {
            source_size = Some(state.record(ResourceKind::Volume, volume_id)?.size());
        }

        let requested = match (size, source_size) {
            (Some(value), _) => value,
            (None, Some(value)) => value,
            (None, None) => {
                return Err(ServiceError::bad_request(
                    "Invalid input received: Volume size must be specified",
                ));
            }
        };
        if requested < 0 {
            return Err(ServiceError::bad_request(format!(
                "Invalid volume size provided for create request: Volume size '{requested}' \
                 must be an integer and greater than 0"
            )));
        }
        if requested == 0 {
            return Err(ServiceError::bad_request(format!(
                "Invalid input received: Volume size '{requested}' must be an integer and \
                 greater than 0"
            )));
        }
        if let Some(minimum) = source_size
            && requested < minimum
        {
            return Err(ServiceError::bad_request(format!(
                "Invalid input received: Volume size {requested}GB cannot be smaller than the \
                 source size {minimum}GB"
            )));
        }
        state.check_quota(requested)?;

        let mut properties = BTreeMap::from([
            (String::from("id"), Uuid::new_v4().to_string()),
            (String::from("attachments"), String::from("[]")),
            (String::from("availability_zone"), String::from("nova")),
            (String::from("bootable"), String::from("false")),
            (String::from("created_at"), String::from(CREATED_AT)),
            (String::from("description"), String::from("None")),
            (String::from("encrypted"), String::from("False")),
            (String::from("metadata"), String::from("{}")),
            (String::from("multiattach"), String::from("False")),
            (String::from("name"), String::from("None")),
            (String::from("size"), requested.to_string()),
            (String::from("snapshot_id"), String::from("None")),
            (String::from("source_volid"), String::from("None")),
            (String::from("status"), String::from("creating")),
            (String::from("user_id"), state.user_id.clone()),
            (String::from("volume_type"), String::from("__DEFAULT__")),
        ]);
        merge_options(&mut properties, options);

        let id = state.insert(ResourceKind::Volume, properties);
        state.schedule(
            &id,
            Outcome::Settle {
                status: STATUS_AVAILABLE,
                size: None,
            },
        );
        state.record(ResourceKind::Volume, &id).map(|record| record.properties.clone())
    }

    /// Creates a snapshot or backup of an available volume.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] when the volume is missing or not available,
    /// or when `kind` is a volume.
    pub fn create_from_volume(
        &self,
        kind: ResourceKind,
        volume_id: &str,
        options: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>, ServiceError> {
        let mut state = self.state.borrow_mut();
        let volume = state.record(ResourceKind::Volume, volume_id)?;
        if volume.status() != STATUS_AVAILABLE {
            return Err(ServiceError::bad_request(format!(
                "Invalid volume: Volume {volume_id} status must be available, but current \
                 status is: {}",
                volume.status()
            )));
        }
        let size = volume.size();

        let mut properties = BTreeMap::from([
            (String::from("id"), Uuid::new_v4().to_string()),
            (String::from("created_at"), String::from(CREATED_AT)),
            (String::from("description"), String::from("None")),
            (String::from("name"), String::from("None")),
            (String::from("size"), size.to_string()),
            (String::from("status"), String::from("creating")),
            (String::from("volume_id"), volume_id.to_owned()),
        ]);
        match kind {
            ResourceKind::Snapshot => {
                properties.insert(String::from("metadata"), String::from("{}"));
            }
            ResourceKind::Backup => {
                properties.insert(String::from("availability_zone"), String::from("nova"));
                properties.insert(String::from("container"), String::from("None"));
                properties.insert(String::from("is_incremental"), String::from("False"));
                properties.insert(String::from("object_count"), String::from("0"));
            }
            ResourceKind::Volume => {
                return Err(ServiceError::bad_request(
                    "Invalid input received: volumes are created with create_volume",
                ));
            }
        }
        merge_options(&mut properties, options);

        let id = state.insert(kind, properties);
        state.schedule(
            &id,
            Outcome::Settle {
                status: STATUS_AVAILABLE,
                size: None,
            },
        );
        state.record(kind, &id).map(|record| record.properties.clone())
    }

    /// Returns the properties of one object. Counts as an observation.
    ///
    /// # Errors
    ///
    /// Returns a 404 [`ServiceError`] when the object is absent.
    pub fn show(
        &self,
        kind: ResourceKind,
        id: &str,
    ) -> Result<BTreeMap<String, String>, ServiceError> {
        let mut state = self.state.borrow_mut();
        state.tick();
        state.record(kind, id).map(|record| record.properties.clone())
    }

    /// Returns every object of `kind` in creation order. Counts as an
    /// observation.
    #[must_use]
    pub fn list(&self, kind: ResourceKind) -> Vec<BTreeMap<String, String>> {
        let mut state = self.state.borrow_mut();
        state.tick();
        let mut records: Vec<&Record> = state
            .records
            .values()
            .filter(|record| record.kind == kind)
            .collect();
        records.sort_by_key(|record| record.seq);
        records
            .into_iter()
            .map(|record| record.properties.clone())
            .collect()
    }

    /// Starts deleting an object.
    ///
    /// # Errors
    ///
    /// Returns a 404 [`ServiceError`] when the object is absent and a 400
    /// when a volume still has snapshots.
    pub fn delete(&self, kind: ResourceKind, id: &str) -> Result<(), ServiceError> {
        let mut state = self.state.borrow_mut();
        state.record(kind, id)?;
        if kind == ResourceKind::Volume {
            let dependents = state
                .records
                .values()
                .filter(|record| {
                    record.kind == ResourceKind::Snapshot
                        && record.properties.get("volume_id").map(String::as_str) == Some(id)
                })
                .count();
            if dependents > 0 {
                return Err(ServiceError::bad_request(format!(
                    "Invalid volume: Volume {id} still has {dependents} dependent snapshots."
                )));
            }
        }
        if let Some(record) = state.records.get_mut(id) {
            record
                .properties
                .insert(String::from("status"), String::from("deleting"));
        }
        state.schedule(id, Outcome::Remove);
        Ok(())
    }

    /// Starts growing a volume to `new_size` GiB.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] when the volume is missing or busy, the size
    /// does not grow, or quota is exhausted.
    pub fn extend(&self, id: &str, new_size: i64) -> Result<(), ServiceError> {
        let mut state = self.state.borrow_mut();
        let volume = state.record(ResourceKind::Volume, id)?;
        if volume.status() != STATUS_AVAILABLE {
            return Err(ServiceError::bad_request(format!(
                "Invalid volume: Volume {id} status must be available to extend, but current \
                 status is: {}",
                volume.status()
            )));
        }
        let current = volume.size();
        if new_size <= current {
            return Err(ServiceError::bad_request(format!(
                "Invalid input received: New size for extend must be greater than current \
                 size. (current: {current}, extended: {new_size})."
            )));
        }
        state.check_quota(new_size.saturating_sub(current))?;

        if let Some(record) = state.records.get_mut(id) {
            record
                .properties
                .insert(String::from("status"), String::from("extending"));
        }
        state.schedule(
            id,
            Outcome::Settle {
                status: STATUS_AVAILABLE,
                size: Some(new_size),
            },
        );
        Ok(())
    }
}

fn merge_options(properties: &mut BTreeMap<String, String>, options: &BTreeMap<String, String>) {
    for (key, value) in options {
        properties.insert(key.replace('-', "_"), value.clone());
    }
}

fn kind_of_collection(collection: &str) -> Option<ResourceKind> {
    ResourceKind::ALL
        .into_iter()
        .find(|kind| kind.collection() == collection)
}

/// Reads an integer size the way the API does: numbers and numeric strings
/// are accepted, anything else is invalid input.
fn size_field(value: Option<&Value>) -> Result<Option<i64>, ServiceError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => number.as_i64().map(Some).ok_or_else(|| {
            ServiceError::bad_request(format!(
                "Invalid input received: size '{number}' must be an integer"
            ))
        }),
        Some(Value::String(text)) => text.trim().parse().map(Some).map_err(|_| {
            ServiceError::bad_request(format!(
                "Invalid input received: size '{text}' must be an integer"
            ))
        }),
        Some(other) => Err(ServiceError::bad_request(format!(
            "Invalid input received: size '{other}' must be an integer"
        ))),
    }
}

fn envelope(kind: ResourceKind, properties: BTreeMap<String, String>) -> Value {
    let object: Map<String, Value> = properties
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect();
    let mut outer = Map::new();
    outer.insert(kind.noun().to_owned(), Value::Object(object));
    Value::Object(outer)
}

impl FakeCinder {
    fn route(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Option<Value>, ServiceError> {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        let unknown = || ServiceError {
            status: 404,
            message: String::from("The resource could not be found."),
        };
        match (method, segments.as_slice()) {
            (HttpMethod::Post, [collection]) => {
                let kind = kind_of_collection(collection).ok_or_else(unknown)?;
                let fields = body
                    .and_then(|value| value.get(kind.noun()))
                    .and_then(Value::as_object)
                    .ok_or_else(|| {
                        ServiceError::bad_request(format!(
                            "Invalid input received: missing '{}' in request body",
                            kind.noun()
                        ))
                    })?;
                let mut options = flatten_properties(fields);
                options.remove("size");
                let created = if kind == ResourceKind::Volume {
                    self.create_volume(size_field(fields.get("size"))?, &options)?
                } else {
                    let volume_id = options.remove("volume_id").ok_or_else(|| {
                        ServiceError::bad_request("Invalid input received: volume_id is required")
                    })?;
                    self.create_from_volume(kind, &volume_id, &options)?
                };
                Ok(Some(envelope(kind, created)))
            }
            (HttpMethod::Get, [collection, id]) => {
                let kind = kind_of_collection(collection).ok_or_else(unknown)?;
                Ok(Some(envelope(kind, self.show(kind, id)?)))
            }
            (HttpMethod::Delete, [collection, id]) => {
                let kind = kind_of_collection(collection).ok_or_else(unknown)?;
                self.delete(kind, id)?;
                Ok(None)
            }
            (HttpMethod::Post, ["volumes", id, "action"]) => {
                let new_size = size_field(body.and_then(|value| value.pointer("/os-extend/new_size")))?
                    .ok_or_else(|| {
                        ServiceError::bad_request("Invalid input received: new_size is required")
                    })?;
                self.extend(id, new_size)?;
                Ok(None)
            }
            _ => Err(unknown()),
        }
    }
}

impl BlockStorageApi for FakeCinder {
    fn send(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Option<Value>, TransportError> {
        self.route(method, path, body).map_err(TransportError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_options() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    #[test]
    fn volume_settles_after_configured_observations() {
        let cinder = FakeCinder::new().with_transition_polls(2);
        let volume = cinder.create_volume(Some(1), &no_options()).expect("create");
        let id = volume.get("id").cloned().unwrap_or_default();

        assert_eq!(volume.get("status").map(String::as_str), Some("creating"));
        assert_eq!(
            cinder.show(ResourceKind::Volume, &id).expect("show").get("status").map(String::as_str),
            Some("creating")
        );
        assert_eq!(
            cinder.show(ResourceKind::Volume, &id).expect("show").get("status").map(String::as_str),
            Some(STATUS_AVAILABLE)
        );
    }

    #[test]
    fn quota_is_enforced() {
        let cinder = FakeCinder::new().with_quota_gb(10);
        let err = cinder
            .create_volume(Some(11), &no_options())
            .expect_err("quota exceeded");
        assert_eq!(err.status, 413);
        assert!(err.message.contains("VolumeSizeExceedsAvailableQuota"));
    }

    #[test]
    fn volume_with_snapshot_cannot_be_deleted() {
        let cinder = FakeCinder::new().with_transition_polls(0);
        let volume = cinder.create_volume(Some(1), &no_options()).expect("volume");
        let id = volume.get("id").cloned().unwrap_or_default();
        cinder
            .create_from_volume(ResourceKind::Snapshot, &id, &no_options())
            .expect("snapshot");

        let err = cinder.delete(ResourceKind::Volume, &id).expect_err("dependent snapshot");
        assert!(err.message.contains("dependent snapshots"));
    }

    #[test]
    fn routes_unknown_paths_to_404() {
        let cinder = FakeCinder::new();
        let err = cinder
            .send(HttpMethod::Get, "qos-specs/x/y", None)
            .expect_err("unknown path");
        assert!(matches!(err, TransportError::Api { status: 404, .. }));
    }

    #[test]
    fn find_resolves_unique_names() {
        let cinder = FakeCinder::new();
        let options = BTreeMap::from([(String::from("name"), String::from("data"))]);
        let volume = cinder.create_volume(Some(1), &options).expect("volume");
        assert_eq!(cinder.find(ResourceKind::Volume, "data"), volume.get("id").cloned());
        assert_eq!(cinder.find(ResourceKind::Volume, "other"), None);
    }
}
