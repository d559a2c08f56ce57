//! Normalized remote object shape
//!
//! Each platform answers in its own dialect (`{"network": {...}}`, Kubernetes
//! `metadata`, Rancher Norman `data`). Adapters normalize responses through a
//! [`FieldMap`] of JSON pointers into one [`RemoteObject`] shape.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{PlatformError, ResourceKind};

/// Platform-agnostic view of a remote object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteObject {
    /// Platform-assigned identifier, used for get/replace/delete
    pub id: String,

    /// Native name, when the API has one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Status or phase string (`ACTIVE`, `BUILD`, `active`, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Last observed revision for mutate-in-place objects
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_token: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// The unwrapped native body
    pub raw: Value,
}

impl RemoteObject {
    /// Normalize a native body using the kind's field map
    pub fn from_raw(kind: ResourceKind, raw: Value, fields: &FieldMap) -> Result<Self, PlatformError> {
        let id = raw
            .pointer(&fields.id)
            .and_then(scalar_to_string)
            .ok_or_else(|| {
                PlatformError::Decode(format!("{} object has no id at {}", kind, fields.id))
            })?;

        let lookup = |pointer: &Option<String>| {
            pointer
                .as_deref()
                .and_then(|p| raw.pointer(p))
                .and_then(scalar_to_string)
        };

        let tags = fields
            .tags
            .as_deref()
            .and_then(|p| raw.pointer(p))
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            id,
            name: lookup(&fields.name),
            status: lookup(&fields.status),
            version_token: lookup(&fields.version),
            tags,
            raw,
        })
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Look up a field of the raw body by JSON pointer
    pub fn field(&self, pointer: &str) -> Option<&Value> {
        self.raw.pointer(pointer)
    }

    pub fn field_str(&self, pointer: &str) -> Option<&str> {
        self.field(pointer).and_then(Value::as_str)
    }
}

/// JSON pointers locating the normalized fields in a native body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMap {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
}

impl FieldMap {
    /// Neutron/Nova/Cinder/Octavia style: top-level `id`, `name`, `status`
    pub fn openstack() -> Self {
        Self {
            id: "/id".to_string(),
            name: Some("/name".to_string()),
            status: Some("/status".to_string()),
            version: Some("/revision_number".to_string()),
            tags: Some("/tags".to_string()),
        }
    }

    /// Kubernetes objects are addressed by `metadata.name`
    pub fn kubernetes() -> Self {
        Self {
            id: "/metadata/name".to_string(),
            name: Some("/metadata/name".to_string()),
            status: Some("/status/phase".to_string()),
            version: Some("/metadata/resourceVersion".to_string()),
            tags: None,
        }
    }

    /// Rancher Norman (`/v3`) objects
    pub fn norman() -> Self {
        Self {
            id: "/id".to_string(),
            name: Some("/name".to_string()),
            status: Some("/state".to_string()),
            version: None,
            tags: None,
        }
    }

    pub fn with_status(mut self, pointer: impl Into<String>) -> Self {
        self.status = Some(pointer.into());
        self
    }

    pub fn without_name(mut self) -> Self {
        self.name = None;
        self
    }

    pub fn without_version(mut self) -> Self {
        self.version = None;
        self
    }
}

/// Address of one remote object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: ResourceKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    pub id: String,
}

impl ObjectRef {
    pub fn new(kind: ResourceKind, namespace: Option<&str>, id: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.map(String::from),
            id: id.into(),
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.id),
            None => write!(f, "{} {}", self.kind, self.id),
        }
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Write `new` at `pointer`, creating intermediate objects as needed.
///
/// Non-object intermediates are replaced by objects.
pub fn set_pointer(target: &mut Value, pointer: &str, new: Value) {
    if pointer.is_empty() {
        *target = new;
        return;
    }

    let mut current = target;
    let segments: Vec<String> = pointer
        .trim_start_matches('/')
        .split('/')
        .map(|s| s.replace("~1", "/").replace("~0", "~"))
        .collect();

    let Some((last, parents)) = segments.split_last() else {
        return;
    };

    for segment in parents {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(obj) = current else {
            return;
        };
        current = obj
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    if let Value::Object(obj) = current {
        obj.insert(last.clone(), new);
    }
}

/// True if every field of `desired` is present with an equal value in `actual`.
///
/// Objects are compared recursively; arrays and scalars must match exactly.
pub fn is_json_subset(desired: &Value, actual: &Value) -> bool {
    match (desired, actual) {
        (Value::Object(want), Value::Object(have)) => want.iter().all(|(key, value)| {
            have.get(key)
                .map(|existing| is_json_subset(value, existing))
                .unwrap_or(false)
        }),
        _ => desired == actual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_raw_openstack() {
        let raw = json!({
            "id": "6f1c",
            "name": "net-a",
            "status": "ACTIVE",
            "revision_number": 3,
            "tags": ["name:net-a", "env:dev"]
        });
        let obj = RemoteObject::from_raw(ResourceKind::Network, raw, &FieldMap::openstack()).unwrap();
        assert_eq!(obj.id, "6f1c");
        assert_eq!(obj.name.as_deref(), Some("net-a"));
        assert_eq!(obj.status.as_deref(), Some("ACTIVE"));
        assert_eq!(obj.version_token.as_deref(), Some("3"));
        assert!(obj.has_tag("env:dev"));
    }

    #[test]
    fn test_from_raw_kubernetes() {
        let raw = json!({
            "metadata": {"name": "tls", "namespace": "auth", "resourceVersion": "812"},
            "data": {}
        });
        let obj = RemoteObject::from_raw(ResourceKind::Secret, raw, &FieldMap::kubernetes()).unwrap();
        assert_eq!(obj.id, "tls");
        assert_eq!(obj.version_token.as_deref(), Some("812"));
        assert_eq!(obj.status, None);
        assert!(obj.tags.is_empty());
    }

    #[test]
    fn test_from_raw_without_id_fails() {
        let result = RemoteObject::from_raw(
            ResourceKind::Network,
            json!({"name": "x"}),
            &FieldMap::openstack(),
        );
        assert!(matches!(result, Err(PlatformError::Decode(_))));
    }

    #[test]
    fn test_set_pointer_creates_intermediates() {
        let mut value = json!({"spec": {"replicas": 1}});
        set_pointer(&mut value, "/metadata/resourceVersion", json!("7"));
        set_pointer(&mut value, "/spec/replicas", json!(3));
        assert_eq!(value["metadata"]["resourceVersion"], "7");
        assert_eq!(value["spec"]["replicas"], 3);
    }

    #[test]
    fn test_set_pointer_on_null_body() {
        let mut value = Value::Null;
        set_pointer(&mut value, "/name", json!("net-a"));
        assert_eq!(value, json!({"name": "net-a"}));
    }

    #[test]
    fn test_json_subset() {
        let actual = json!({"name": "a", "admin_state_up": true, "mtu": 1500, "tags": ["x"]});
        assert!(is_json_subset(&json!({"name": "a"}), &actual));
        assert!(is_json_subset(&json!({"mtu": 1500, "tags": ["x"]}), &actual));
        assert!(!is_json_subset(&json!({"mtu": 9000}), &actual));
        assert!(!is_json_subset(&json!({"missing": 1}), &actual));
    }

    #[test]
    fn test_object_ref_display() {
        let r = ObjectRef::new(ResourceKind::Secret, Some("auth"), "tls");
        assert_eq!(r.to_string(), "secret auth/tls");
        let r = ObjectRef::new(ResourceKind::Network, None, "6f1c");
        assert_eq!(r.to_string(), "network 6f1c");
    }
}
