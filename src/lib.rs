//! stratum: idempotent reconciliation of cloud resources
//!
//! Drives OpenStack, Kubernetes and Rancher REST control planes towards a
//! declared set of objects. Every operation resolves what already exists
//! before writing, so a run interrupted at any point can simply be re-run.

pub mod bridge;
pub mod cli;
pub mod context;
pub mod error;
pub mod platform;
pub mod poll;
pub mod reconcile;
pub mod resolve;
pub mod sequence;

pub use error::ReconcileError;
pub use platform::{Platform, PlatformError, RemoteObject, ResourceKind};
pub use reconcile::{Reconciler, ResourceDescriptor};
