use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Reconciler, ResourceDescriptor, Strategy};
use crate::error::ReconcileError;
use crate::platform::{is_json_subset, IdentityMode, PlatformError, RemoteObject};
use crate::resolve::name_tag;
use crate::sequence::run_bounded;

impl Reconciler {
    /// Make sure the object named by `desc` exists.
    ///
    /// An existing object is returned as is under `CreateOnly`, or replaced
    /// when it drifted from `spec` under `ConvergeToSpec`. A `Conflict`
    /// from create means another actor won the race; the winner is resolved
    /// and returned.
    pub async fn ensure(&self, desc: &ResourceDescriptor) -> Result<RemoteObject, ReconcileError> {
        desc.validate()?;
        self.admit(desc.kind)?;

        let object = match self.resolve(desc.kind, desc.namespace(), &desc.name).await? {
            Some(existing) => match desc.strategy {
                Strategy::CreateOnly => {
                    debug!(kind = %desc.kind, name = %desc.name, id = %existing.id, "Exists");
                    existing
                }
                Strategy::ConvergeToSpec => self.converge(desc, existing).await?,
            },
            None => self.create(desc).await?,
        };

        let object = self.settle(desc, object).await?;
        self.record(desc.kind);
        Ok(object)
    }

    /// Ensure independent descriptors concurrently, `limit` at a time.
    ///
    /// The first failure cancels the remaining work. Results are in input
    /// order.
    pub async fn ensure_all(
        &self,
        descs: Vec<ResourceDescriptor>,
        limit: usize,
    ) -> Result<Vec<RemoteObject>, ReconcileError> {
        let tasks: Vec<_> = descs
            .into_iter()
            .map(|desc| {
                let reconciler = self.clone();
                move |_token: CancellationToken| async move { reconciler.ensure(&desc).await }
            })
            .collect();
        run_bounded(limit, tasks, CancellationToken::new()).await
    }

    async fn create(&self, desc: &ResourceDescriptor) -> Result<RemoteObject, ReconcileError> {
        let body = desc.body();
        match self
            .platform
            .create(desc.kind, desc.namespace(), &body)
            .await
        {
            Ok(created) => {
                info!(kind = %desc.kind, name = %desc.name, id = %created.id, "Created");
                self.tag(desc, created).await
            }
            Err(PlatformError::Conflict(message)) => {
                warn!(
                    kind = %desc.kind,
                    name = %desc.name,
                    %message,
                    "Create conflicted, resolving existing object"
                );
                self.resolve(desc.kind, desc.namespace(), &desc.name)
                    .await?
                    .ok_or_else(|| ReconcileError::NotFound {
                        kind: desc.kind,
                        name: desc.name.clone(),
                    })
            }
            Err(e) => Err(ReconcileError::platform(e, desc.kind, &desc.name)),
        }
    }

    /// Attach the identity tag to a freshly created tag-only object
    async fn tag(
        &self,
        desc: &ResourceDescriptor,
        mut created: RemoteObject,
    ) -> Result<RemoteObject, ReconcileError> {
        if desc.kind.identity() != IdentityMode::Tag {
            return Ok(created);
        }
        let tag = name_tag(&desc.name);
        if created.has_tag(&tag) {
            return Ok(created);
        }

        self.platform
            .add_tag(desc.kind, desc.namespace(), &created.id, &tag)
            .await
            .map_err(|e| ReconcileError::platform(e, desc.kind, &desc.name))?;
        debug!(kind = %desc.kind, id = %created.id, %tag, "Tagged");
        created.tags.push(tag);
        Ok(created)
    }

    async fn converge(
        &self,
        desc: &ResourceDescriptor,
        existing: RemoteObject,
    ) -> Result<RemoteObject, ReconcileError> {
        let desired = match &desc.spec {
            Value::Null => return Ok(existing),
            spec => spec,
        };
        if is_json_subset(desired, &existing.raw) {
            debug!(kind = %desc.kind, name = %desc.name, "In sync");
            return Ok(existing);
        }

        let replaced = self
            .platform
            .replace(
                desc.kind,
                desc.namespace(),
                &existing.id,
                &desc.body(),
                existing.version_token.as_deref(),
            )
            .await
            .map_err(|e| ReconcileError::platform(e, desc.kind, &desc.name))?;
        info!(
            kind = %desc.kind,
            name = %desc.name,
            id = %replaced.id,
            version = ?replaced.version_token,
            "Converged drifted object"
        );
        Ok(replaced)
    }
}
