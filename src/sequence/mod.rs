//! Dependency Sequencer
//!
//! Network objects are created in a fixed chain: network, subnet, router,
//! security group, server/volume/port, floating IP, load balancer,
//! listener/pool, member. A [`Sequencer`] tracks the highest tier reached in
//! a run and refuses to admit a kind whose predecessor tier has not been
//! reached. Kinds without a tier (Kubernetes and Rancher objects) are always
//! admitted.
//!
//! [`run_bounded`] runs independent steps of the same tier concurrently.

mod pool;

pub use pool::run_bounded;

use std::sync::Mutex;

use tracing::debug;

use crate::error::ReconcileError;
use crate::platform::ResourceKind;

/// Tier bookkeeping for one run
#[derive(Debug, Default)]
pub struct Sequencer {
    reached: Mutex<Option<u8>>,
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest tier completed so far
    pub fn reached(&self) -> Option<u8> {
        *self.reached.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Check that `kind` may be reconciled now.
    ///
    /// Re-visiting a tier at or below the highest reached is always allowed.
    pub fn admit(&self, kind: ResourceKind) -> Result<(), ReconcileError> {
        let Some(tier) = kind.tier() else {
            return Ok(());
        };
        if tier == 0 {
            return Ok(());
        }

        let reached = self.reached();
        let required = tier - 1;
        match reached {
            Some(r) if r >= required => Ok(()),
            _ => Err(ReconcileError::OutOfOrder {
                kind,
                tier,
                required,
                reached,
            }),
        }
    }

    /// Record that a step of `kind` completed
    pub fn record(&self, kind: ResourceKind) {
        let Some(tier) = kind.tier() else {
            return;
        };
        let mut reached = self.reached.lock().unwrap_or_else(|e| e.into_inner());
        if reached.map_or(true, |r| tier > r) {
            debug!(%kind, tier, "Tier reached");
            *reached = Some(tier);
        }
    }
}
