//! Transport that calls the block-storage REST resource managers.

use std::collections::BTreeMap;

use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use super::{Transport, TransportError};
use crate::resource::{CreateRequest, ResourceHandle, ResourceKind};

/// HTTP verbs used by the resource managers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HttpMethod {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `DELETE`
    Delete,
}

impl HttpMethod {
    /// Upper-case verb.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        }
    }
}

/// Request seam between the resource managers and the wire.
pub trait BlockStorageApi {
    /// Sends a request relative to the block-storage endpoint and returns the
    /// decoded body, or `None` for empty responses.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Api`] for error statuses (404 included) and
    /// [`TransportError::Http`] when the request cannot be completed.
    fn send(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Option<Value>, TransportError>;
}

impl<T: BlockStorageApi + ?Sized> BlockStorageApi for &T {
    fn send(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Option<Value>, TransportError> {
        (**self).send(method, path, body)
    }
}

/// Flattens a JSON object into the string map the command-line client
/// prints: `null` becomes `None`, booleans `True`/`False`, and nested
/// values compact JSON.
#[must_use]
pub fn flatten_properties(object: &Map<String, Value>) -> BTreeMap<String, String> {
    object
        .iter()
        .map(|(key, value)| (key.clone(), flatten_value(value)))
        .collect()
}

fn flatten_value(value: &Value) -> String {
    match value {
        Value::Null => String::from("None"),
        Value::Bool(true) => String::from("True"),
        Value::Bool(false) => String::from("False"),
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Sends sizes as integers when they parse, so the service validates the
/// value rather than the type.
fn size_value(raw: &str) -> Value {
    raw.trim()
        .parse::<i64>()
        .map_or_else(|_| Value::String(raw.to_owned()), Value::from)
}

fn option_value(raw: &str) -> Value {
    if raw.eq_ignore_ascii_case("true") {
        Value::Bool(true)
    } else if raw.eq_ignore_ascii_case("false") {
        Value::Bool(false)
    } else {
        Value::String(raw.to_owned())
    }
}

/// CRUD operations for one resource collection.
#[derive(Debug)]
pub struct ResourceManager<'a, C: ?Sized> {
    client: &'a C,
    kind: ResourceKind,
}

impl<'a, C: BlockStorageApi + ?Sized> ResourceManager<'a, C> {
    /// Binds a manager to a collection.
    #[must_use]
    pub const fn new(client: &'a C, kind: ResourceKind) -> Self {
        Self { client, kind }
    }

    /// Creates a resource; the first positional argument is the size for
    /// volumes and the source volume id for snapshots and backups.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the service rejects the request.
    pub fn create(&self, request: &CreateRequest) -> Result<BTreeMap<String, String>, TransportError> {
        let mut fields = Map::new();
        let first = request.positional().first().map(String::as_str);
        match (self.kind, first) {
            (ResourceKind::Volume, Some(size)) => {
                fields.insert(String::from("size"), size_value(size));
            }
            (ResourceKind::Snapshot | ResourceKind::Backup, Some(volume_id)) => {
                fields.insert(String::from("volume_id"), Value::String(volume_id.to_owned()));
            }
            (_, None) => {}
        }
        for (key, value) in request.options() {
            fields.insert(key.replace('-', "_"), option_value(value));
        }

        let mut envelope = Map::new();
        envelope.insert(self.kind.noun().to_owned(), Value::Object(fields));
        let body = Value::Object(envelope);
        let response = self
            .client
            .send(HttpMethod::Post, self.kind.collection(), Some(&body))?;
        self.unwrap_envelope(response.as_ref())
    }

    /// Fetches one resource.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotFound`] when the service answers 404.
    pub fn get(&self, id: &str) -> Result<BTreeMap<String, String>, TransportError> {
        let response = self
            .client
            .send(HttpMethod::Get, &self.member_path(id), None)
            .map_err(|err| self.not_found(err, id))?;
        self.unwrap_envelope(response.as_ref())
    }

    /// Deletes one resource.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotFound`] when the service answers 404.
    pub fn delete(&self, id: &str) -> Result<(), TransportError> {
        self.client
            .send(HttpMethod::Delete, &self.member_path(id), None)
            .map_err(|err| self.not_found(err, id))?;
        Ok(())
    }

    /// Grows a volume through the `os-extend` action.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Unsupported`] for collections other than
    /// volumes.
    pub fn extend(&self, id: &str, new_size: &str) -> Result<(), TransportError> {
        if self.kind != ResourceKind::Volume {
            return Err(TransportError::Unsupported {
                kind: self.kind,
                operation: String::from("extend"),
            });
        }
        let body = json!({ "os-extend": { "new_size": size_value(new_size) } });
        self.client
            .send(
                HttpMethod::Post,
                &format!("{}/action", self.member_path(id)),
                Some(&body),
            )
            .map_err(|err| self.not_found(err, id))?;
        Ok(())
    }

    fn member_path(&self, id: &str) -> String {
        format!("{}/{}", self.kind.collection(), urlencoding::encode(id))
    }

    fn not_found(&self, err: TransportError, id: &str) -> TransportError {
        match err {
            TransportError::Api { status: 404, .. } => TransportError::NotFound {
                kind: self.kind,
                id: id.to_owned(),
            },
            other => other,
        }
    }

    fn unwrap_envelope(
        &self,
        response: Option<&Value>,
    ) -> Result<BTreeMap<String, String>, TransportError> {
        response
            .and_then(|body| body.get(self.kind.noun()))
            .and_then(Value::as_object)
            .map(flatten_properties)
            .ok_or_else(|| TransportError::Parse {
                context: format!("{} response", self.kind),
                message: format!("missing '{}' envelope", self.kind.noun()),
            })
    }
}

/// Transport backed by a [`BlockStorageApi`] client.
#[derive(Clone, Debug)]
pub struct ApiTransport<C> {
    client: C,
}

impl<C: BlockStorageApi> ApiTransport<C> {
    /// Wraps an API client.
    #[must_use]
    pub const fn new(client: C) -> Self {
        Self { client }
    }

    /// Underlying client.
    #[must_use]
    pub const fn client(&self) -> &C {
        &self.client
    }

    /// Manager for the given collection.
    #[must_use]
    pub const fn manager(&self, kind: ResourceKind) -> ResourceManager<'_, C> {
        ResourceManager::new(&self.client, kind)
    }
}

impl<C: BlockStorageApi> Transport for ApiTransport<C> {
    fn label(&self) -> &'static str {
        "api"
    }

    fn create(
        &self,
        kind: ResourceKind,
        request: &CreateRequest,
    ) -> Result<ResourceHandle, TransportError> {
        debug!(%kind, ?request, "creating through the API");
        let properties = self.manager(kind).create(request)?;
        ResourceHandle::from_properties(kind, properties.clone()).ok_or_else(|| {
            warn!(%kind, response = ?properties, "create succeeded but returned no id; the object may be left behind");
            TransportError::Parse {
                context: format!("{kind} create response"),
                message: String::from("no id in the returned object"),
            }
        })
    }

    fn get(&self, kind: ResourceKind, id: &str) -> Result<ResourceHandle, TransportError> {
        let properties = self.manager(kind).get(id)?;
        Ok(ResourceHandle::new(kind, id, properties))
    }

    fn delete(&self, kind: ResourceKind, id: &str) -> Result<(), TransportError> {
        debug!(%kind, %id, "deleting through the API");
        self.manager(kind).delete(id)
    }

    fn extend(&self, handle: &ResourceHandle, new_size: &str) -> Result<(), TransportError> {
        debug!(id = %handle.id(), %new_size, "extending through the API");
        self.manager(handle.kind()).extend(handle.id(), new_size)
    }
}
