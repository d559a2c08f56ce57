//! Reconciler
//!
//! Drives one platform towards desired state, one descriptor at a time:
//!
//! - [`Reconciler::ensure`]: create-if-absent, optionally converging drift
//! - [`Reconciler::upsert`]: create-or-replace guarded by a version token
//! - [`Reconciler::ensure_composite`]: a parent plus keyed children
//! - [`Reconciler::remove`]: delete-if-present
//!
//! Every operation resolves first, so re-running after a partial failure
//! picks up where the last run stopped.

mod composite;
mod descriptor;
mod ensure;
mod ledger;
mod remove;
mod upsert;

pub use composite::{ChildSet, CompositeDescriptor, CompositeReport};
pub use descriptor::{ResourceDescriptor, Strategy};
pub use ledger::{CompositeKey, CompositeState, LedgerEntry, ProgressLedger};
pub use upsert::UpsertOutcome;

use std::sync::Arc;

use crate::error::ReconcileError;
use crate::platform::{ObjectRef, Platform, RemoteObject, ResourceKind};
use crate::poll::{wait_for, PollDefaults, WaitOutcome};
use crate::resolve::resolve;
use crate::sequence::Sequencer;

/// Reconciliation entry point bound to one platform
#[derive(Clone)]
pub struct Reconciler {
    platform: Arc<dyn Platform>,
    defaults: PollDefaults,
    sequencer: Option<Arc<Sequencer>>,
    ledger: Arc<ProgressLedger>,
}

impl Reconciler {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self {
            platform,
            defaults: PollDefaults::default(),
            sequencer: None,
            ledger: Arc::new(ProgressLedger::new()),
        }
    }

    pub fn with_poll_defaults(mut self, defaults: PollDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Enforce tier order across calls sharing `sequencer`
    pub fn with_sequencer(mut self, sequencer: Arc<Sequencer>) -> Self {
        self.sequencer = Some(sequencer);
        self
    }

    pub fn with_ledger(mut self, ledger: Arc<ProgressLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn platform(&self) -> &dyn Platform {
        self.platform.as_ref()
    }

    pub fn platform_arc(&self) -> Arc<dyn Platform> {
        self.platform.clone()
    }

    pub fn poll_defaults(&self) -> PollDefaults {
        self.defaults
    }

    pub fn ledger(&self) -> &ProgressLedger {
        &self.ledger
    }

    /// Resolve a logical name on this reconciler's platform
    pub async fn resolve(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<RemoteObject>, ReconcileError> {
        resolve(self.platform.as_ref(), kind, namespace, name).await
    }

    fn admit(&self, kind: ResourceKind) -> Result<(), ReconcileError> {
        match &self.sequencer {
            Some(sequencer) => sequencer.admit(kind),
            None => Ok(()),
        }
    }

    fn record(&self, kind: ResourceKind) {
        if let Some(sequencer) = &self.sequencer {
            sequencer.record(kind);
        }
    }

    /// Apply the descriptor's wait, if any, to `object`
    async fn settle(
        &self,
        desc: &ResourceDescriptor,
        object: RemoteObject,
    ) -> Result<RemoteObject, ReconcileError> {
        let Some(wait) = &desc.wait else {
            return Ok(object);
        };
        let target = ObjectRef::new(desc.kind, desc.namespace(), &object.id);
        let condition = wait.condition(target, &self.defaults);
        match wait_for(self.platform.as_ref(), &condition).await? {
            WaitOutcome::Ready(ready) => Ok(ready),
            WaitOutcome::Absent => Ok(object),
        }
    }
}
