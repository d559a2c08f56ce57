//! Resource descriptors: the desired state of one logical resource

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ReconcileError;
use crate::platform::{set_pointer, IdentityMode, ResourceKind};
use crate::poll::{Predicate, WaitSpec};

/// Maximum length of a Kubernetes object name
const MAX_KUBE_NAME_LEN: usize = 253;

/// RFC 1123 subdomain, as Kubernetes requires for `metadata.name`
static DNS1123_SUBDOMAIN: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
});

/// What to do when the object already exists
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Leave an existing object untouched, even if it drifted
    #[default]
    CreateOnly,
    /// Replace an existing object whose body does not contain `spec`
    ConvergeToSpec,
}

/// Desired state of one logical resource.
///
/// `name` is the idempotency key: within one platform, kind and namespace it
/// identifies at most one remote object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub name: String,
    pub kind: ResourceKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Native request body, without the name
    #[serde(default)]
    pub spec: Value,

    /// Context to apply against; the current context when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,

    #[serde(default)]
    pub strategy: Strategy,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait: Option<WaitSpec>,
}

impl ResourceDescriptor {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            namespace: None,
            spec: Value::Object(Map::new()),
            platform: None,
            strategy: Strategy::CreateOnly,
            wait: None,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_spec(mut self, spec: Value) -> Self {
        self.spec = spec;
        self
    }

    pub fn with_platform(mut self, context: impl Into<String>) -> Self {
        self.platform = Some(context.into());
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_wait(mut self, wait: WaitSpec) -> Self {
        self.wait = Some(wait);
        self
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Check the descriptor before any platform call
    pub fn validate(&self) -> Result<(), ReconcileError> {
        let invalid = |msg: String| Err(ReconcileError::InvalidDescriptor(msg));

        if self.name.trim().is_empty() {
            return invalid(format!("{} descriptor has an empty name", self.kind));
        }
        if !matches!(self.spec, Value::Object(_) | Value::Null) {
            return invalid(format!("{} '{}': spec must be an object", self.kind, self.name));
        }
        // Without a name field the resolver could never find the object again
        if self.kind.identity() == IdentityMode::Name && self.kind.name_pointer().is_none() {
            return invalid(format!(
                "{} '{}' has no name on the platform; list it under its parent's `rules`",
                self.kind, self.name
            ));
        }
        if self.kind.is_namespaced() && self.namespace.is_none() {
            return invalid(format!("{} '{}' requires a namespace", self.kind, self.name));
        }

        if self.kind.name_pointer() == Some("/metadata/name") {
            let pattern = DNS1123_SUBDOMAIN
                .as_ref()
                .map_err(|e| ReconcileError::InvalidDescriptor(e.to_string()))?;
            if self.name.len() > MAX_KUBE_NAME_LEN || !pattern.is_match(&self.name) {
                return invalid(format!(
                    "'{}' is not a valid {} name (lowercase alphanumerics, '-' and '.')",
                    self.name, self.kind
                ));
            }
        }

        if let Some(pointer) = self.kind.name_pointer() {
            if let Some(spec_name) = self.spec.pointer(pointer).and_then(Value::as_str) {
                if spec_name != self.name {
                    return invalid(format!(
                        "{} '{}': spec names it '{}'",
                        self.kind, self.name, spec_name
                    ));
                }
            }
        }

        if let Some(wait) = &self.wait {
            if wait.predicate == Predicate::Absent {
                return invalid(format!(
                    "{} '{}': cannot wait for absence of a resource being ensured",
                    self.kind, self.name
                ));
            }
            if wait.interval_secs == Some(0) {
                return invalid(format!("{} '{}': wait interval must be > 0", self.kind, self.name));
            }
        }

        Ok(())
    }

    /// Request body: `spec` with the name (and namespace, for Kubernetes
    /// style objects) filled in
    pub fn body(&self) -> Value {
        let mut body = match &self.spec {
            Value::Object(_) => self.spec.clone(),
            _ => Value::Object(Map::new()),
        };
        if let Some(pointer) = self.kind.name_pointer() {
            set_pointer(&mut body, pointer, Value::from(self.name.as_str()));
        }
        if let (Some(pointer), Some(ns)) = (self.kind.namespace_pointer(), &self.namespace) {
            set_pointer(&mut body, pointer, Value::from(ns.as_str()));
        }
        body
    }
}
