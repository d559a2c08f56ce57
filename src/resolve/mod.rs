//! Identity Resolver
//!
//! Finds the one remote object a logical name refers to. Name-bearing kinds
//! match on their native name; kinds without a name field match on a
//! `name:<logical>` tag by exact membership, so `name:web-1` never matches
//! `web`.

use tracing::debug;

use crate::error::ReconcileError;
use crate::platform::{IdentityMode, Platform, RemoteObject, ResourceKind};

/// Prefix of the identity tag attached to tag-only kinds
pub const NAME_TAG_PREFIX: &str = "name:";

/// Identity tag for a logical name
pub fn name_tag(logical_name: &str) -> String {
    format!("{}{}", NAME_TAG_PREFIX, logical_name)
}

/// Whether `object` is the object named `logical_name`
pub fn matches(kind: ResourceKind, object: &RemoteObject, logical_name: &str) -> bool {
    match kind.identity() {
        IdentityMode::Name => object.name.as_deref() == Some(logical_name),
        IdentityMode::Tag => object.has_tag(&name_tag(logical_name)),
    }
}

/// Resolve a logical name to at most one remote object.
///
/// Read-only. More than one match is an `Ambiguous` error; transport
/// failures propagate without retry.
pub async fn resolve(
    platform: &dyn Platform,
    kind: ResourceKind,
    namespace: Option<&str>,
    logical_name: &str,
) -> Result<Option<RemoteObject>, ReconcileError> {
    let objects = platform
        .list(kind, namespace)
        .await
        .map_err(|e| ReconcileError::platform(e, kind, logical_name))?;

    let mut found: Vec<RemoteObject> = objects
        .into_iter()
        .filter(|o| matches(kind, o, logical_name))
        .collect();

    match found.len() {
        0 => {
            debug!(%kind, name = logical_name, "Not found");
            Ok(None)
        }
        1 => {
            let object = found.remove(0);
            debug!(%kind, name = logical_name, id = %object.id, "Resolved");
            Ok(Some(object))
        }
        _ => Err(ReconcileError::Ambiguous {
            kind,
            name: logical_name.to_string(),
            ids: found.into_iter().map(|o| o.id).collect(),
        }),
    }
}
