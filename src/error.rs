//! Reconciliation error taxonomy

use std::time::Duration;

use thiserror::Error;

use crate::platform::{ObjectRef, PlatformError, ResourceKind};

/// Errors produced by the reconciliation core
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReconcileError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: ResourceKind, name: String },

    #[error("{kind} '{name}' is ambiguous: {} objects match ({})", ids.len(), ids.join(", "))]
    Ambiguous {
        kind: ResourceKind,
        name: String,
        ids: Vec<String>,
    },

    #[error("{kind} '{name}' changed since it was read: {message}")]
    VersionConflict {
        kind: ResourceKind,
        name: String,
        message: String,
    },

    #[error("Timed out after {waited:?} waiting for {target} (last status: {})", last_status.as_deref().unwrap_or("none"))]
    Timeout {
        target: ObjectRef,
        waited: Duration,
        last_status: Option<String>,
    },

    #[error("{target} entered failure state '{status}'")]
    Failed { target: ObjectRef, status: String },

    #[error("Back identity of '{front}' not populated after {attempts} attempts")]
    Pending { front: String, attempts: u32 },

    #[error("Cannot reconcile {kind} (tier {tier}): tier {required} not reached (highest reached: {})", reached.map(|t| t.to_string()).unwrap_or_else(|| "none".to_string()))]
    OutOfOrder {
        kind: ResourceKind,
        tier: u8,
        required: u8,
        reached: Option<u8>,
    },

    #[error("Platform error: {0}")]
    PlatformUnavailable(PlatformError),

    #[error("Invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Task failed: {0}")]
    TaskFailed(String),
}

impl ReconcileError {
    /// Map a platform error raised while handling `kind`/`name`.
    ///
    /// `NotFound` and `VersionConflict` keep their meaning; everything else
    /// is a platform failure.
    pub fn platform(err: PlatformError, kind: ResourceKind, name: &str) -> Self {
        match err {
            PlatformError::NotFound(_) => ReconcileError::NotFound {
                kind,
                name: name.to_string(),
            },
            PlatformError::VersionConflict(message) => ReconcileError::VersionConflict {
                kind,
                name: name.to_string(),
                message,
            },
            other => ReconcileError::PlatformUnavailable(other),
        }
    }

    /// Whether a run should stop on this error.
    ///
    /// Only a stale version token is recoverable: the object exists and
    /// somebody else changed it.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ReconcileError::VersionConflict { .. })
    }
}
