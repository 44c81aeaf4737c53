//! Local representation of remote block-storage objects.
//!
//! A [`ResourceHandle`] carries the identifier assigned by the service and the
//! most recent set of properties observed for it. Both transports produce the
//! same handle shape, so callers never need to know how it was fetched.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Status reported once a resource is ready for use.
pub const STATUS_AVAILABLE: &str = "available";

/// The orchestrated entity types.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ResourceKind {
    /// A block-storage volume.
    Volume,
    /// A point-in-time snapshot of a volume.
    Snapshot,
    /// A backup of a volume stored by the backup service.
    Backup,
}

impl ResourceKind {
    /// Every kind, in dependency order.
    pub const ALL: [Self; 3] = [Self::Volume, Self::Snapshot, Self::Backup];

    /// Singular noun used in messages and JSON envelopes.
    #[must_use]
    pub const fn noun(self) -> &'static str {
        match self {
            Self::Volume => "volume",
            Self::Snapshot => "snapshot",
            Self::Backup => "backup",
        }
    }

    /// REST collection name served by the block-storage API.
    #[must_use]
    pub const fn collection(self) -> &'static str {
        match self {
            Self::Volume => "volumes",
            Self::Snapshot => "snapshots",
            Self::Backup => "backups",
        }
    }

    /// CLI subcommand for `verb`. Volume commands are bare (`create`), the
    /// others are prefixed with the noun (`snapshot-create`).
    #[must_use]
    pub fn command(self, verb: &str) -> String {
        match self {
            Self::Volume => verb.to_owned(),
            Self::Snapshot | Self::Backup => format!("{}-{verb}", self.noun()),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.noun())
    }
}

/// Raised when a string does not name a resource kind.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("unknown resource kind '{0}' (expected volume, snapshot or backup)")]
pub struct UnknownKindError(pub String);

impl FromStr for ResourceKind {
    type Err = UnknownKindError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "volume" | "volumes" => Ok(Self::Volume),
            "snapshot" | "snapshots" => Ok(Self::Snapshot),
            "backup" | "backups" => Ok(Self::Backup),
            _ => Err(UnknownKindError(value.to_owned())),
        }
    }
}

/// Identifier plus observed property bag for a remote object.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResourceHandle {
    id: String,
    kind: ResourceKind,
    properties: BTreeMap<String, String>,
}

impl ResourceHandle {
    /// Builds a handle for a known identifier.
    #[must_use]
    pub fn new(
        kind: ResourceKind,
        id: impl Into<String>,
        properties: BTreeMap<String, String>,
    ) -> Self {
        let mut handle = Self {
            id: id.into(),
            kind,
            properties,
        };
        handle.pin_id();
        handle
    }

    /// Builds a handle from a property map, taking the identifier from its
    /// `id` entry. Returns `None` when the map carries no usable id.
    #[must_use]
    pub fn from_properties(kind: ResourceKind, properties: BTreeMap<String, String>) -> Option<Self> {
        let id = properties
            .get("id")
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())?;
        Some(Self::new(kind, id, properties))
    }

    /// Identifier assigned by the remote service.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Resource kind.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Every property observed so far.
    #[must_use]
    pub const fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Returns a single property value.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    /// Returns `true` when the property has been observed.
    #[must_use]
    pub fn has_property(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    /// Last observed status.
    #[must_use]
    pub fn status(&self) -> Option<&str> {
        self.property("status")
    }

    /// Last observed size in GiB, when it parses as an integer.
    #[must_use]
    pub fn size(&self) -> Option<u64> {
        self.property("size")
            .and_then(|value| value.trim().parse().ok())
    }

    /// Display name, omitting the `None` placeholder the service uses for
    /// unnamed objects.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.property("name")
            .filter(|value| !value.is_empty() && *value != "None")
    }

    /// Consumes the handle, returning its property map.
    #[must_use]
    pub fn into_properties(self) -> BTreeMap<String, String> {
        self.properties
    }

    /// Merges freshly observed properties into the handle. The identifier is
    /// never replaced.
    pub fn observe(&mut self, properties: BTreeMap<String, String>) {
        self.properties.extend(properties);
        self.pin_id();
    }

    fn pin_id(&mut self) {
        self.properties.insert(String::from("id"), self.id.clone());
    }
}

/// Positional and optional arguments for a create call.
///
/// Positional values mirror the CLI's required parameters (size for volumes,
/// source volume id for snapshots and backups); options map to `--key value`
/// flags on the CLI and to body fields on the API.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CreateRequest {
    positional: Vec<String>,
    options: Vec<(String, String)>,
}

impl CreateRequest {
    /// Starts an empty request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a positional argument.
    #[must_use]
    pub fn arg(mut self, value: impl fmt::Display) -> Self {
        self.positional.push(value.to_string());
        self
    }

    /// Appends an optional `key=value` argument.
    #[must_use]
    pub fn option(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.options.push((key.into(), value.to_string()));
        self
    }

    /// Positional arguments in order.
    #[must_use]
    pub fn positional(&self) -> &[String] {
        &self.positional
    }

    /// Optional arguments in insertion order.
    #[must_use]
    pub fn options(&self) -> &[(String, String)] {
        &self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ResourceKind::Volume, "create", "create")]
    #[case(ResourceKind::Snapshot, "show", "snapshot-show")]
    #[case(ResourceKind::Backup, "list", "backup-list")]
    fn command_names_follow_cli_convention(
        #[case] kind: ResourceKind,
        #[case] verb: &str,
        #[case] expected: &str,
    ) {
        assert_eq!(kind.command(verb), expected);
    }

    #[test]
    fn kind_parses_plural_and_mixed_case() {
        assert_eq!("Snapshots".parse::<ResourceKind>(), Ok(ResourceKind::Snapshot));
        assert!("disk".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn observe_keeps_identifier_stable() {
        let mut handle = ResourceHandle::new(ResourceKind::Volume, "vol-1", BTreeMap::new());
        handle.observe(BTreeMap::from([
            (String::from("id"), String::from("other")),
            (String::from("status"), String::from("available")),
            (String::from("size"), String::from("2")),
        ]));

        assert_eq!(handle.id(), "vol-1");
        assert_eq!(handle.property("id"), Some("vol-1"));
        assert_eq!(handle.status(), Some("available"));
        assert_eq!(handle.size(), Some(2));
    }

    #[test]
    fn from_properties_requires_an_id() {
        let props = BTreeMap::from([(String::from("status"), String::from("creating"))]);
        assert!(ResourceHandle::from_properties(ResourceKind::Volume, props).is_none());
    }

    #[test]
    fn name_hides_none_placeholder() {
        let handle = ResourceHandle::new(
            ResourceKind::Volume,
            "vol-1",
            BTreeMap::from([(String::from("name"), String::from("None"))]),
        );
        assert_eq!(handle.name(), None);
    }
}
