//! Platform capability layer
//!
//! Every control plane the core drives (OpenStack, Kubernetes, Rancher) is
//! reached through the [`Platform`] trait. The trait is the minimal capability
//! set the reconciler needs: list, get, create, replace, delete, and tagging
//! for APIs without a name field.
//!
//! Two implementations ship with the crate:
//!
//! - [`HttpPlatform`]: reqwest-backed REST adapter driven by an
//!   [`EndpointTable`] of per-kind paths and JSON pointers
//! - [`MemoryPlatform`]: an in-process store with scripted status
//!   progressions and fault injection, used by tests and dry runs

pub mod endpoints;
pub mod http;
pub mod kind;
pub mod memory;
pub mod object;

pub use endpoints::{Endpoint, EndpointTable, VersionPlacement};
pub use http::HttpPlatform;
pub use kind::{IdentityMode, PlatformFamily, ResourceKind};
pub use memory::{MemoryPlatform, Operation};
pub use object::{is_json_subset, set_pointer, FieldMap, ObjectRef, RemoteObject};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors surfaced by a platform adapter
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlatformError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    Conflict(String),

    #[error("Version conflict: {0}")]
    VersionConflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Platform unavailable: {0}")]
    Unavailable(String),

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("List response for {0} is paginated; partial listings are not supported")]
    Paginated(ResourceKind),

    #[error("Resource kind {0} is not served by platform '{1}'")]
    Unsupported(ResourceKind, String),

    #[error("Resource kind {0} requires a namespace")]
    MissingNamespace(ResourceKind),
}

impl From<reqwest::Error> for PlatformError {
    fn from(e: reqwest::Error) -> Self {
        PlatformError::Unavailable(e.to_string())
    }
}

/// Capability set the reconciliation core requires from a control plane.
///
/// `list` must return the complete set of objects; adapters reject paginated
/// responses rather than return a partial view.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Context name this platform was built from
    fn name(&self) -> &str;

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
    ) -> Result<Vec<RemoteObject>, PlatformError>;

    async fn get(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        id: &str,
    ) -> Result<RemoteObject, PlatformError>;

    /// Create an object. Returns `Conflict` if it already exists.
    async fn create(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        body: &Value,
    ) -> Result<RemoteObject, PlatformError>;

    /// Fully replace an object. When `version` is given, the store rejects
    /// the write with `VersionConflict` if the token is stale.
    async fn replace(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        id: &str,
        body: &Value,
        version: Option<&str>,
    ) -> Result<RemoteObject, PlatformError>;

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        id: &str,
    ) -> Result<(), PlatformError>;

    /// Attach a tag to an object of a kind without a native name field
    async fn add_tag(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        id: &str,
        tag: &str,
    ) -> Result<(), PlatformError>;
}
