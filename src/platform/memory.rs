//! In-memory platform
//!
//! A [`Platform`] backed by a concurrent map. It behaves like the real control
//! planes where it matters to the reconciler:
//!
//! - OpenStack kinds allow duplicate names, Kubernetes and Rancher kinds
//!   reject them with `Conflict`
//! - versioned kinds carry a token and reject stale replaces
//! - status transitions can be scripted per object name, one step per `get`
//! - faults, create races and lingering deletes can be injected
//!
//! Every call is counted per operation and kind so tests can assert that a
//! second reconcile issues no create.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde_json::Value;
use tracing::debug;

use super::{
    set_pointer, EndpointTable, FieldMap, Platform, PlatformError, PlatformFamily, RemoteObject,
    ResourceKind,
};

/// Platform operations, used for call accounting and fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    List,
    Get,
    Create,
    Replace,
    Delete,
    AddTag,
}

type ObjectKey = (ResourceKind, Option<String>, String);

struct Stored {
    seq: u64,
    version: u64,
    raw: Value,
    /// Remaining visible `get`s after a delete, when deletes linger
    deleting: Option<usize>,
}

struct Fault {
    op: Operation,
    kind: ResourceKind,
    skip: usize,
    error: PlatformError,
}

/// In-process backing store implementing [`Platform`]
pub struct MemoryPlatform {
    name: String,
    fields: HashMap<ResourceKind, FieldMap>,
    objects: DashMap<ObjectKey, Stored>,
    seq: AtomicU64,
    calls: DashMap<(Operation, ResourceKind), usize>,
    scripts: DashMap<(ResourceKind, String), VecDeque<Vec<(String, Value)>>>,
    faults: Mutex<Vec<Fault>>,
    races: DashMap<ResourceKind, VecDeque<(Option<String>, Value)>>,
    unversioned: DashSet<ResourceKind>,
    linger: DashMap<ResourceKind, usize>,
}

impl MemoryPlatform {
    pub fn new(name: impl Into<String>) -> Self {
        let mut fields = HashMap::new();
        for family in [
            PlatformFamily::OpenStack,
            PlatformFamily::Kubernetes,
            PlatformFamily::Rancher,
        ] {
            for (kind, endpoint) in EndpointTable::for_family(family).endpoints {
                fields.insert(kind, endpoint.fields);
            }
        }

        Self {
            name: name.into(),
            fields,
            objects: DashMap::new(),
            seq: AtomicU64::new(0),
            calls: DashMap::new(),
            scripts: DashMap::new(),
            faults: Mutex::new(Vec::new()),
            races: DashMap::new(),
            unversioned: DashSet::new(),
            linger: DashMap::new(),
        }
    }

    // =========================================================================
    // Test and dry-run controls
    // =========================================================================

    /// Number of calls made for an operation on a kind
    pub fn calls(&self, op: Operation, kind: ResourceKind) -> usize {
        self.calls.get(&(op, kind)).map(|c| *c).unwrap_or(0)
    }

    /// Seed an object as if another actor had created it
    pub fn insert(&self, kind: ResourceKind, namespace: Option<&str>, raw: Value) -> RemoteObject {
        self.store_new(kind, namespace, raw)
    }

    /// Every object of a kind in insertion order, without counting a call
    pub fn objects(&self, kind: ResourceKind, namespace: Option<&str>) -> Vec<RemoteObject> {
        self.collect(kind, namespace)
    }

    /// Script the status reported by successive `get`s of the object named
    /// `name`. The last value sticks once the script is exhausted.
    pub fn script_status(&self, kind: ResourceKind, name: &str, statuses: &[&str]) {
        let pointer = self
            .field_map(kind)
            .status
            .unwrap_or_else(|| "/status".to_string());
        let values = statuses.iter().map(|s| Value::from(*s)).collect();
        self.script_field(kind, name, &pointer, values);
    }

    /// Script a field observed by successive `get`s of the object named `name`
    pub fn script_field(&self, kind: ResourceKind, name: &str, pointer: &str, values: Vec<Value>) {
        let mut script = self.scripts.entry((kind, name.to_string())).or_default();
        for value in values {
            script.push_back(vec![(pointer.to_string(), value)]);
        }
    }

    /// Let `successes` calls of `op` on `kind` succeed, then fail one with `error`
    pub fn fail_after(&self, op: Operation, kind: ResourceKind, successes: usize, error: PlatformError) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.push(Fault {
                op,
                kind,
                skip: successes,
                error,
            });
        }
    }

    /// The next create of `kind` loses a race: `winner` is stored first and
    /// the create answers `Conflict`
    pub fn race_on_create(&self, kind: ResourceKind, namespace: Option<&str>, winner: Value) {
        self.races
            .entry(kind)
            .or_default()
            .push_back((namespace.map(String::from), winner));
    }

    /// Report objects of `kind` without a version token
    pub fn strip_versions(&self, kind: ResourceKind) {
        self.unversioned.insert(kind);
    }

    /// Deleted objects of `kind` stay visible for `gets` more reads
    pub fn linger_on_delete(&self, kind: ResourceKind, gets: usize) {
        self.linger.insert(kind, gets);
    }

    /// Bump an object's version as a concurrent writer would
    pub fn touch(&self, kind: ResourceKind, namespace: Option<&str>, id: &str) -> bool {
        let key = self.key(kind, namespace, id);
        let fields = self.field_map(kind);
        match self.objects.get_mut(&key) {
            Some(mut stored) => {
                stored.version += 1;
                if let Some(pointer) = &fields.version {
                    let version = stored.version.to_string();
                    set_pointer(&mut stored.raw, pointer, Value::from(version));
                }
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn field_map(&self, kind: ResourceKind) -> FieldMap {
        self.fields
            .get(&kind)
            .cloned()
            .unwrap_or_else(FieldMap::openstack)
    }

    fn scope(kind: ResourceKind, namespace: Option<&str>) -> Option<String> {
        if kind.is_namespaced() {
            namespace.map(String::from)
        } else {
            None
        }
    }

    fn key(&self, kind: ResourceKind, namespace: Option<&str>, id: &str) -> ObjectKey {
        (kind, Self::scope(kind, namespace), id.to_string())
    }

    fn count(&self, op: Operation, kind: ResourceKind) {
        *self.calls.entry((op, kind)).or_insert(0) += 1;
    }

    fn check_fault(&self, op: Operation, kind: ResourceKind) -> Result<(), PlatformError> {
        let Ok(mut faults) = self.faults.lock() else {
            return Ok(());
        };
        let Some(index) = faults.iter().position(|f| f.op == op && f.kind == kind) else {
            return Ok(());
        };
        if faults[index].skip > 0 {
            faults[index].skip -= 1;
            return Ok(());
        }
        let fault = faults.remove(index);
        debug!(?op, %kind, error = %fault.error, "injected fault");
        Err(fault.error)
    }

    fn normalize(&self, kind: ResourceKind, raw: &Value) -> Result<RemoteObject, PlatformError> {
        let mut object = RemoteObject::from_raw(kind, raw.clone(), &self.field_map(kind))?;
        if self.unversioned.contains(&kind) {
            object.version_token = None;
        }
        Ok(object)
    }

    fn collect(&self, kind: ResourceKind, namespace: Option<&str>) -> Vec<RemoteObject> {
        let scope = Self::scope(kind, namespace);
        let mut matching: Vec<(u64, Value)> = self
            .objects
            .iter()
            .filter(|entry| entry.key().0 == kind && entry.key().1 == scope)
            .map(|entry| (entry.seq, entry.raw.clone()))
            .collect();
        matching.sort_by_key(|(seq, _)| *seq);
        matching
            .iter()
            .filter_map(|(_, raw)| self.normalize(kind, raw).ok())
            .collect()
    }

    fn store_new(&self, kind: ResourceKind, namespace: Option<&str>, mut raw: Value) -> RemoteObject {
        let fields = self.field_map(kind);
        let scope = Self::scope(kind, namespace);

        let id = match raw.pointer(&fields.id).and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                set_pointer(&mut raw, &fields.id, Value::from(id.clone()));
                id
            }
        };
        if let (Some(pointer), Some(ns)) = (kind.namespace_pointer(), scope.as_deref()) {
            set_pointer(&mut raw, pointer, Value::from(ns));
        }
        if let Some(pointer) = &fields.version {
            set_pointer(&mut raw, pointer, Value::from("1"));
        }

        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let object = self
            .normalize(kind, &raw)
            .unwrap_or_else(|_| RemoteObject {
                id: id.clone(),
                name: None,
                status: None,
                version_token: None,
                tags: Vec::new(),
                raw: raw.clone(),
            });
        self.objects.insert(
            (kind, scope, id),
            Stored {
                seq,
                version: 1,
                raw,
                deleting: None,
            },
        );
        object
    }

    fn name_taken(&self, kind: ResourceKind, namespace: Option<&str>, body: &Value) -> bool {
        let Some(pointer) = kind.name_pointer() else {
            return false;
        };
        let Some(name) = body.pointer(pointer).and_then(Value::as_str) else {
            return false;
        };
        self.collect(kind, namespace)
            .iter()
            .any(|o| o.name.as_deref() == Some(name))
    }

    fn advance_script(&self, kind: ResourceKind, stored: &mut Stored) {
        let fields = self.field_map(kind);
        let name = fields
            .name
            .as_deref()
            .and_then(|p| stored.raw.pointer(p))
            .and_then(Value::as_str)
            .map(String::from);
        let id = stored
            .raw
            .pointer(&fields.id)
            .and_then(Value::as_str)
            .map(String::from);

        for key in [name, id].into_iter().flatten() {
            if let Some(mut script) = self.scripts.get_mut(&(kind, key)) {
                if let Some(step) = script.pop_front() {
                    for (pointer, value) in step {
                        set_pointer(&mut stored.raw, &pointer, value);
                    }
                }
                return;
            }
        }
    }
}

#[async_trait]
impl Platform for MemoryPlatform {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
    ) -> Result<Vec<RemoteObject>, PlatformError> {
        self.count(Operation::List, kind);
        self.check_fault(Operation::List, kind)?;
        Ok(self.collect(kind, namespace))
    }

    async fn get(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        id: &str,
    ) -> Result<RemoteObject, PlatformError> {
        self.count(Operation::Get, kind);
        self.check_fault(Operation::Get, kind)?;

        let key = self.key(kind, namespace, id);
        let raw = {
            let Some(mut stored) = self.objects.get_mut(&key) else {
                return Err(PlatformError::NotFound(format!("{} {}", kind, id)));
            };
            match stored.deleting {
                Some(0) => None,
                Some(remaining) => {
                    stored.deleting = Some(remaining - 1);
                    Some(stored.raw.clone())
                }
                None => {
                    self.advance_script(kind, &mut stored);
                    Some(stored.raw.clone())
                }
            }
        };

        match raw {
            Some(raw) => self.normalize(kind, &raw),
            None => {
                self.objects.remove(&key);
                Err(PlatformError::NotFound(format!("{} {}", kind, id)))
            }
        }
    }

    async fn create(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        body: &Value,
    ) -> Result<RemoteObject, PlatformError> {
        self.count(Operation::Create, kind);
        self.check_fault(Operation::Create, kind)?;

        let race = self.races.get_mut(&kind).and_then(|mut q| q.pop_front());
        if let Some((race_ns, winner)) = race {
            self.store_new(kind, race_ns.as_deref(), winner);
            return Err(PlatformError::Conflict(format!(
                "{} was created concurrently",
                kind
            )));
        }

        if kind.is_namespaced() && namespace.is_none() {
            return Err(PlatformError::MissingNamespace(kind));
        }
        if kind.family() != PlatformFamily::OpenStack && self.name_taken(kind, namespace, body) {
            return Err(PlatformError::Conflict(format!("{} already exists", kind)));
        }

        Ok(self.store_new(kind, namespace, body.clone()))
    }

    async fn replace(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        id: &str,
        body: &Value,
        version: Option<&str>,
    ) -> Result<RemoteObject, PlatformError> {
        self.count(Operation::Replace, kind);
        self.check_fault(Operation::Replace, kind)?;

        let fields = self.field_map(kind);
        let key = self.key(kind, namespace, id);
        let raw = {
            let Some(mut stored) = self.objects.get_mut(&key) else {
                return Err(PlatformError::NotFound(format!("{} {}", kind, id)));
            };

            if let Some(token) = version {
                if token != stored.version.to_string() {
                    return Err(PlatformError::VersionConflict(format!(
                        "{} {} is at version {}, write carried {}",
                        kind, id, stored.version, token
                    )));
                }
            }

            let mut raw = body.clone();
            set_pointer(&mut raw, &fields.id, Value::from(id));
            if let (Some(pointer), Some(ns)) = (kind.namespace_pointer(), key.1.as_deref()) {
                set_pointer(&mut raw, pointer, Value::from(ns));
            }
            stored.version += 1;
            if let Some(pointer) = &fields.version {
                set_pointer(&mut raw, pointer, Value::from(stored.version.to_string()));
            }
            stored.raw = raw.clone();
            raw
        };

        self.normalize(kind, &raw)
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        id: &str,
    ) -> Result<(), PlatformError> {
        self.count(Operation::Delete, kind);
        self.check_fault(Operation::Delete, kind)?;

        let key = self.key(kind, namespace, id);
        let linger = self.linger.get(&kind).map(|g| *g);
        match linger {
            Some(gets) => match self.objects.get_mut(&key) {
                Some(mut stored) if stored.deleting.is_none() => {
                    stored.deleting = Some(gets);
                    Ok(())
                }
                Some(_) => Ok(()),
                None => Err(PlatformError::NotFound(format!("{} {}", kind, id))),
            },
            None => self
                .objects
                .remove(&key)
                .map(|_| ())
                .ok_or_else(|| PlatformError::NotFound(format!("{} {}", kind, id))),
        }
    }

    async fn add_tag(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        id: &str,
        tag: &str,
    ) -> Result<(), PlatformError> {
        self.count(Operation::AddTag, kind);
        self.check_fault(Operation::AddTag, kind)?;

        let Some(pointer) = self.field_map(kind).tags else {
            return Err(PlatformError::Unsupported(kind, self.name.clone()));
        };
        let key = self.key(kind, namespace, id);
        let Some(mut stored) = self.objects.get_mut(&key) else {
            return Err(PlatformError::NotFound(format!("{} {}", kind, id)));
        };

        let mut tags: Vec<Value> = stored
            .raw
            .pointer(&pointer)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if !tags.iter().any(|t| t.as_str() == Some(tag)) {
            tags.push(Value::from(tag));
        }
        set_pointer(&mut stored.raw, &pointer, Value::Array(tags));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_assigns_id_and_counts_calls() {
        let store = MemoryPlatform::new("mem");
        let obj = store
            .create(ResourceKind::Network, None, &json!({"name": "net-a"}))
            .await
            .unwrap();
        assert!(!obj.id.is_empty());
        assert_eq!(obj.name.as_deref(), Some("net-a"));
        assert_eq!(store.calls(Operation::Create, ResourceKind::Network), 1);
        assert_eq!(store.calls(Operation::Create, ResourceKind::Subnet), 0);
    }

    #[tokio::test]
    async fn test_openstack_allows_duplicate_names() {
        let store = MemoryPlatform::new("mem");
        let body = json!({"name": "dup"});
        store.create(ResourceKind::Network, None, &body).await.unwrap();
        store.create(ResourceKind::Network, None, &body).await.unwrap();
        assert_eq!(store.objects(ResourceKind::Network, None).len(), 2);
    }

    #[tokio::test]
    async fn test_kubernetes_rejects_duplicate_names() {
        let store = MemoryPlatform::new("mem");
        let body = json!({"metadata": {"name": "tls"}});
        store
            .create(ResourceKind::Secret, Some("auth"), &body)
            .await
            .unwrap();
        let second = store.create(ResourceKind::Secret, Some("auth"), &body).await;
        assert!(matches!(second, Err(PlatformError::Conflict(_))));

        // Same name in another namespace is fine
        store
            .create(ResourceKind::Secret, Some("other"), &body)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_scripted_status_advances_per_get() {
        let store = MemoryPlatform::new("mem");
        store.script_status(ResourceKind::Server, "vm-1", &["BUILD", "ACTIVE"]);
        let obj = store
            .create(ResourceKind::Server, None, &json!({"name": "vm-1"}))
            .await
            .unwrap();

        let first = store.get(ResourceKind::Server, None, &obj.id).await.unwrap();
        let second = store.get(ResourceKind::Server, None, &obj.id).await.unwrap();
        let third = store.get(ResourceKind::Server, None, &obj.id).await.unwrap();
        assert_eq!(first.status.as_deref(), Some("BUILD"));
        assert_eq!(second.status.as_deref(), Some("ACTIVE"));
        assert_eq!(third.status.as_deref(), Some("ACTIVE"));
    }

    #[tokio::test]
    async fn test_replace_rejects_stale_version() {
        let store = MemoryPlatform::new("mem");
        let obj = store
            .create(
                ResourceKind::Secret,
                Some("auth"),
                &json!({"metadata": {"name": "tls"}}),
            )
            .await
            .unwrap();
        assert_eq!(obj.version_token.as_deref(), Some("1"));

        assert!(store.touch(ResourceKind::Secret, Some("auth"), "tls"));
        let result = store
            .replace(
                ResourceKind::Secret,
                Some("auth"),
                "tls",
                &json!({"metadata": {"name": "tls"}}),
                Some("1"),
            )
            .await;
        assert!(matches!(result, Err(PlatformError::VersionConflict(_))));

        let ok = store
            .replace(
                ResourceKind::Secret,
                Some("auth"),
                "tls",
                &json!({"metadata": {"name": "tls"}, "data": {"k": "dg=="}}),
                Some("2"),
            )
            .await
            .unwrap();
        assert_eq!(ok.version_token.as_deref(), Some("3"));
        assert_eq!(ok.raw["metadata"]["namespace"], "auth");
    }

    #[tokio::test]
    async fn test_fail_after_injects_once() {
        let store = MemoryPlatform::new("mem");
        store.fail_after(
            Operation::Create,
            ResourceKind::Subnet,
            1,
            PlatformError::Unavailable("boom".into()),
        );
        let body = json!({"name": "s"});
        assert!(store.create(ResourceKind::Subnet, None, &body).await.is_ok());
        assert!(store.create(ResourceKind::Subnet, None, &body).await.is_err());
        assert!(store.create(ResourceKind::Subnet, None, &body).await.is_ok());
    }

    #[tokio::test]
    async fn test_lingering_delete() {
        let store = MemoryPlatform::new("mem");
        store.linger_on_delete(ResourceKind::Volume, 1);
        let obj = store
            .create(ResourceKind::Volume, None, &json!({"name": "data"}))
            .await
            .unwrap();
        store.delete(ResourceKind::Volume, None, &obj.id).await.unwrap();

        assert!(store.get(ResourceKind::Volume, None, &obj.id).await.is_ok());
        let gone = store.get(ResourceKind::Volume, None, &obj.id).await;
        assert!(matches!(gone, Err(PlatformError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_add_tag_is_idempotent() {
        let store = MemoryPlatform::new("mem");
        let fip = store
            .create(ResourceKind::FloatingIp, None, &json!({"floating_network_id": "ext"}))
            .await
            .unwrap();
        store
            .add_tag(ResourceKind::FloatingIp, None, &fip.id, "name:lb")
            .await
            .unwrap();
        store
            .add_tag(ResourceKind::FloatingIp, None, &fip.id, "name:lb")
            .await
            .unwrap();
        let fip = store.get(ResourceKind::FloatingIp, None, &fip.id).await.unwrap();
        assert_eq!(fip.tags, vec!["name:lb".to_string()]);
    }
}
