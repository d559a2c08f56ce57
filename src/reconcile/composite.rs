use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{CompositeKey, CompositeState, Reconciler, ResourceDescriptor};
use crate::error::ReconcileError;
use crate::platform::{set_pointer, PlatformError, RemoteObject, ResourceKind};

/// Children owned by a composite parent.
///
/// Children have no name of their own; an existing child is recognized by
/// the values at `key_fields`, never by its platform id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildSet {
    pub kind: ResourceKind,

    /// Pointer in each child body that holds the parent id
    pub parent_field: String,

    /// Pointers whose values identify a child among its siblings
    pub key_fields: Vec<String>,

    /// Desired child bodies, created in this order
    pub items: Vec<Value>,
}

impl ChildSet {
    /// Security group rules keyed by direction, protocol and port range
    pub fn security_group_rules(items: Vec<Value>) -> Self {
        Self {
            kind: ResourceKind::SecurityGroupRule,
            parent_field: "/security_group_id".to_string(),
            key_fields: vec![
                "/direction".to_string(),
                "/protocol".to_string(),
                "/port_range_min".to_string(),
                "/port_range_max".to_string(),
            ],
            items,
        }
    }

    /// Key tuple of a child body; missing fields count as null
    pub fn key_of(&self, body: &Value) -> Vec<Value> {
        self.key_fields
            .iter()
            .map(|p| body.pointer(p).cloned().unwrap_or(Value::Null))
            .collect()
    }

    fn belongs_to(&self, child: &RemoteObject, parent_id: &str) -> bool {
        child.field_str(&self.parent_field) == Some(parent_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeDescriptor {
    pub parent: ResourceDescriptor,
    pub children: ChildSet,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompositeReport {
    pub parent: RemoteObject,
    pub created: usize,
    pub skipped: usize,
    /// Children were not re-queried because the ledger had the composite
    /// as ready
    pub cached: bool,
}

impl Reconciler {
    /// Ensure a parent and all of its children.
    ///
    /// Children are created in order; a failure part way leaves the parent
    /// partially configured and the next call creates only what is missing.
    pub async fn ensure_composite(
        &self,
        composite: &CompositeDescriptor,
    ) -> Result<CompositeReport, ReconcileError> {
        let parent_desc = &composite.parent;
        let children = &composite.children;
        let namespace = parent_desc.namespace();
        let key = CompositeKey::new(parent_desc.kind, namespace, &parent_desc.name);

        if self.ledger.state(&key) == CompositeState::Ready {
            if let Some(parent) = self
                .resolve(parent_desc.kind, namespace, &parent_desc.name)
                .await?
            {
                debug!(composite = %key, "Ready in this run, skipping children");
                return Ok(CompositeReport {
                    parent,
                    created: 0,
                    skipped: children.items.len(),
                    cached: true,
                });
            }
            warn!(composite = %key, "Parent disappeared since it was ready");
            self.ledger.reset(&key);
        }

        let parent = self.ensure(parent_desc).await?;

        let existing = self
            .platform
            .list(children.kind, namespace)
            .await
            .map_err(|e| ReconcileError::platform(e, children.kind, &parent_desc.name))?;
        let mut present: Vec<Vec<Value>> = existing
            .iter()
            .filter(|child| children.belongs_to(child, &parent.id))
            .map(|child| children.key_of(&child.raw))
            .collect();

        let mut created = 0;
        let mut skipped = 0;

        for (completed, item) in children.items.iter().enumerate() {
            let child_key = children.key_of(item);
            if present.contains(&child_key) {
                skipped += 1;
            } else {
                let mut body = item.clone();
                set_pointer(&mut body, &children.parent_field, Value::from(parent.id.as_str()));

                match self.platform.create(children.kind, namespace, &body).await {
                    Ok(child) => {
                        debug!(composite = %key, child = %child.id, key = ?child_key, "Child created");
                        created += 1;
                    }
                    Err(PlatformError::Conflict(_)) => {
                        debug!(composite = %key, key = ?child_key, "Child already exists");
                        skipped += 1;
                    }
                    Err(e) => {
                        self.ledger
                            .set(&key, CompositeState::PartiallyCreated { completed });
                        warn!(
                            composite = %key,
                            completed,
                            total = children.items.len(),
                            error = %e,
                            "Child creation failed"
                        );
                        return Err(ReconcileError::platform(e, children.kind, &parent_desc.name));
                    }
                }
                present.push(child_key);
            }
            self.ledger.set(
                &key,
                CompositeState::PartiallyCreated {
                    completed: completed + 1,
                },
            );
        }

        self.ledger.set(&key, CompositeState::Ready);
        info!(composite = %key, created, skipped, "Composite ready");
        Ok(CompositeReport {
            parent,
            created,
            skipped,
            cached: false,
        })
    }
}
