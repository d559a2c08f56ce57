use tracing::{debug, info};

use super::Reconciler;
use crate::error::ReconcileError;
use crate::platform::{ObjectRef, PlatformError, ResourceKind};
use crate::poll::{wait_for, Predicate, WaitCondition};

impl Reconciler {
    /// Delete the object named `name` if it exists.
    ///
    /// Returns whether a delete was issued. An object that vanishes between
    /// resolution and delete counts as removed. With `wait`, returns only
    /// once the platform stops reporting the object.
    pub async fn remove(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
        wait: bool,
    ) -> Result<bool, ReconcileError> {
        let Some(object) = self.resolve(kind, namespace, name).await? else {
            debug!(%kind, name, "Already absent");
            return Ok(false);
        };

        match self.platform.delete(kind, namespace, &object.id).await {
            Ok(()) => info!(%kind, name, id = %object.id, "Deleted"),
            Err(PlatformError::NotFound(_)) => {
                debug!(%kind, name, id = %object.id, "Gone before delete");
            }
            Err(e) => return Err(ReconcileError::platform(e, kind, name)),
        }

        if wait {
            let condition = WaitCondition::new(
                ObjectRef::new(kind, namespace, &object.id),
                Predicate::Absent,
                &self.defaults,
            );
            wait_for(self.platform.as_ref(), &condition).await?;
        }
        Ok(true)
    }
}
