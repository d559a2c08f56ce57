use tracing::{info, warn};

use super::{Reconciler, ResourceDescriptor};
use crate::error::ReconcileError;
use crate::platform::{PlatformError, RemoteObject};

/// What `upsert` did
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    Created(RemoteObject),
    Replaced(RemoteObject),
    /// The object exists but exposes no version token; left untouched
    Skipped(RemoteObject),
}

impl UpsertOutcome {
    pub fn object(&self) -> &RemoteObject {
        match self {
            UpsertOutcome::Created(o) | UpsertOutcome::Replaced(o) | UpsertOutcome::Skipped(o) => o,
        }
    }

    pub fn into_object(self) -> RemoteObject {
        match self {
            UpsertOutcome::Created(o) | UpsertOutcome::Replaced(o) | UpsertOutcome::Skipped(o) => o,
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            UpsertOutcome::Created(_) => "created",
            UpsertOutcome::Replaced(_) => "replaced",
            UpsertOutcome::Skipped(_) => "skipped",
        }
    }
}

impl Reconciler {
    /// Create the object, or fully replace it guarded by its version token.
    ///
    /// The replace carries the token read during resolution; if the object
    /// changed in between, the store rejects the write and the error is
    /// `VersionConflict`, which callers may treat as non-fatal. No retry.
    pub async fn upsert(&self, desc: &ResourceDescriptor) -> Result<UpsertOutcome, ReconcileError> {
        desc.validate()?;
        self.admit(desc.kind)?;
        let body = desc.body();

        let outcome = match self.resolve(desc.kind, desc.namespace(), &desc.name).await? {
            None => {
                let created = self
                    .platform
                    .create(desc.kind, desc.namespace(), &body)
                    .await
                    .map_err(|e| match e {
                        PlatformError::Conflict(message) => ReconcileError::VersionConflict {
                            kind: desc.kind,
                            name: desc.name.clone(),
                            message: format!("created concurrently: {}", message),
                        },
                        other => ReconcileError::platform(other, desc.kind, &desc.name),
                    })?;
                info!(kind = %desc.kind, name = %desc.name, id = %created.id, "Created");
                UpsertOutcome::Created(created)
            }
            Some(existing) => match existing.version_token.clone() {
                None => {
                    warn!(
                        kind = %desc.kind,
                        name = %desc.name,
                        "Object has no version token, skipping replace"
                    );
                    return Ok(UpsertOutcome::Skipped(existing));
                }
                Some(token) => {
                    let replaced = self
                        .platform
                        .replace(desc.kind, desc.namespace(), &existing.id, &body, Some(&token))
                        .await
                        .map_err(|e| ReconcileError::platform(e, desc.kind, &desc.name))?;
                    info!(
                        kind = %desc.kind,
                        name = %desc.name,
                        from = %token,
                        to = ?replaced.version_token,
                        "Replaced"
                    );
                    UpsertOutcome::Replaced(replaced)
                }
            },
        };

        let outcome = match outcome {
            UpsertOutcome::Created(o) => UpsertOutcome::Created(self.settle(desc, o).await?),
            UpsertOutcome::Replaced(o) => UpsertOutcome::Replaced(self.settle(desc, o).await?),
            skipped => skipped,
        };
        self.record(desc.kind);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;
    use crate::platform::{MemoryPlatform, Operation, Platform, ResourceKind};

    fn secret(data: &str) -> ResourceDescriptor {
        ResourceDescriptor::new(ResourceKind::Secret, "tls")
            .with_namespace("auth")
            .with_spec(json!({"data": {"tls.crt": data}}))
    }

    #[tokio::test]
    async fn test_upsert_creates_then_replaces() {
        let store = Arc::new(MemoryPlatform::new("mem"));
        let reconciler = Reconciler::new(store.clone());

        let created = reconciler.upsert(&secret("djE=")).await.unwrap();
        assert!(matches!(created, UpsertOutcome::Created(_)));
        assert_eq!(created.object().version_token.as_deref(), Some("1"));

        let replaced = reconciler.upsert(&secret("djI=")).await.unwrap();
        assert_eq!(replaced.action(), "replaced");
        let object = replaced.into_object();
        assert_eq!(object.raw["data"]["tls.crt"], "djI=");
        assert_eq!(object.version_token.as_deref(), Some("2"));
        assert_eq!(store.calls(Operation::Create, ResourceKind::Secret), 1);
    }

    #[tokio::test]
    async fn test_upsert_without_version_skips() {
        let store = Arc::new(MemoryPlatform::new("mem"));
        store.strip_versions(ResourceKind::Secret);
        store.insert(
            ResourceKind::Secret,
            Some("auth"),
            json!({"metadata": {"name": "tls"}}),
        );
        let reconciler = Reconciler::new(store.clone());

        let outcome = reconciler.upsert(&secret("djE=")).await.unwrap();
        assert!(matches!(outcome, UpsertOutcome::Skipped(_)));
        assert_eq!(store.calls(Operation::Replace, ResourceKind::Secret), 0);
    }

    /// Lets a concurrent writer bump the version between list and replace
    struct Interleaved {
        inner: MemoryPlatform,
    }

    #[async_trait]
    impl Platform for Interleaved {
        fn name(&self) -> &str {
            self.inner.name()
        }

        async fn list(
            &self,
            kind: ResourceKind,
            namespace: Option<&str>,
        ) -> Result<Vec<RemoteObject>, PlatformError> {
            let listed = self.inner.list(kind, namespace).await?;
            for object in &listed {
                self.inner.touch(kind, namespace, &object.id);
            }
            Ok(listed)
        }

        async fn get(
            &self,
            kind: ResourceKind,
            namespace: Option<&str>,
            id: &str,
        ) -> Result<RemoteObject, PlatformError> {
            self.inner.get(kind, namespace, id).await
        }

        async fn create(
            &self,
            kind: ResourceKind,
            namespace: Option<&str>,
            body: &Value,
        ) -> Result<RemoteObject, PlatformError> {
            self.inner.create(kind, namespace, body).await
        }

        async fn replace(
            &self,
            kind: ResourceKind,
            namespace: Option<&str>,
            id: &str,
            body: &Value,
            version: Option<&str>,
        ) -> Result<RemoteObject, PlatformError> {
            self.inner.replace(kind, namespace, id, body, version).await
        }

        async fn delete(
            &self,
            kind: ResourceKind,
            namespace: Option<&str>,
            id: &str,
        ) -> Result<(), PlatformError> {
            self.inner.delete(kind, namespace, id).await
        }

        async fn add_tag(
            &self,
            kind: ResourceKind,
            namespace: Option<&str>,
            id: &str,
            tag: &str,
        ) -> Result<(), PlatformError> {
            self.inner.add_tag(kind, namespace, id, tag).await
        }
    }

    #[tokio::test]
    async fn test_stale_token_is_non_fatal_version_conflict() {
        let inner = MemoryPlatform::new("mem");
        inner.insert(
            ResourceKind::Secret,
            Some("auth"),
            json!({"metadata": {"name": "tls"}, "data": {"tls.crt": "b2xk"}}),
        );
        let store = Arc::new(Interleaved { inner });
        let reconciler = Reconciler::new(store.clone());

        let err = reconciler.upsert(&secret("bmV3")).await.unwrap_err();
        assert!(matches!(err, ReconcileError::VersionConflict { .. }));
        assert!(!err.is_fatal());

        // The concurrent write is preserved
        let current = store
            .inner
            .objects(ResourceKind::Secret, Some("auth"))
            .remove(0);
        assert_eq!(current.raw["data"]["tls.crt"], "b2xk");
        assert_eq!(store.inner.calls(Operation::Replace, ResourceKind::Secret), 1);
    }
}
