//! Cross-API Identity Bridge
//!
//! Rancher exposes one cluster through two APIs: the provisioning object
//! (front, addressed by the name we chose) and the management object (back,
//! addressed by a generated id such as `c-m-4x7kq`). The back id shows up in
//! the front object's status some time after creation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::context::{PollingConfig, DEFAULT_BRIDGE_ATTEMPTS, DEFAULT_BRIDGE_DELAY_SECS};
use crate::error::ReconcileError;
use crate::platform::{Platform, PlatformError, RemoteObject, ResourceKind};
use crate::poll::{retry_fixed, PollDefaults, Predicate, WaitSpec};
use crate::reconcile::{Reconciler, ResourceDescriptor};

/// A cluster named through either API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum ClusterRef {
    /// Provisioning object name
    Front(String),
    /// Management object id
    Back(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Namespace of the provisioning objects
    pub front_namespace: String,
    /// Pointer to the back id in the front object
    pub back_pointer: String,
    pub attempts: u32,
    pub delay: Duration,
    /// Name of the registration token created per cluster
    pub token_name: String,
    /// Pointer that is populated once the token is usable
    pub token_ready_pointer: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            front_namespace: "fleet-default".to_string(),
            back_pointer: "/status/clusterName".to_string(),
            attempts: DEFAULT_BRIDGE_ATTEMPTS,
            delay: Duration::from_secs(DEFAULT_BRIDGE_DELAY_SECS),
            token_name: "default-token".to_string(),
            token_ready_pointer: "/nodeCommand".to_string(),
        }
    }
}

impl BridgeConfig {
    pub fn from_polling(polling: &PollingConfig) -> Self {
        Self {
            attempts: polling.bridge_attempts,
            delay: Duration::from_secs(polling.bridge_delay_secs),
            ..Self::default()
        }
    }

    pub fn with_front_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.front_namespace = namespace.into();
        self
    }
}

pub struct IdentityBridge {
    platform: Arc<dyn Platform>,
    config: BridgeConfig,
    defaults: PollDefaults,
}

impl IdentityBridge {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self {
            platform,
            config: BridgeConfig::default(),
            defaults: PollDefaults::default(),
        }
    }

    pub fn with_config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_poll_defaults(mut self, defaults: PollDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Read the back id from the front object, retrying while it is unset.
    ///
    /// A front object that is missing on every attempt is `NotFound`; one
    /// that exists but never reports a back id is `Pending`.
    pub async fn resolve_back_id(&self, front_name: &str) -> Result<String, ReconcileError> {
        let seen = AtomicBool::new(false);
        let namespace = self.config.front_namespace.as_str();
        let pointer = self.config.back_pointer.as_str();
        let platform = self.platform.as_ref();
        let seen_ref = &seen;

        let back = retry_fixed(self.config.attempts, self.config.delay, move |attempt| async move {
            match platform
                .get(ResourceKind::ProvisioningCluster, Some(namespace), front_name)
                .await
            {
                Ok(front) => {
                    seen_ref.store(true, Ordering::Relaxed);
                    let back = front
                        .field_str(pointer)
                        .filter(|id| !id.is_empty())
                        .map(String::from);
                    if back.is_none() {
                        debug!(front = front_name, attempt, "Back id not populated yet");
                    }
                    Ok(back)
                }
                Err(PlatformError::NotFound(_)) => {
                    debug!(front = front_name, attempt, "Front object not visible yet");
                    Ok(None)
                }
                Err(e) => Err(ReconcileError::platform(
                    e,
                    ResourceKind::ProvisioningCluster,
                    front_name,
                )),
            }
        })
        .await?;

        match back {
            Some(back) => {
                info!(front = front_name, back = %back, "Resolved back id");
                Ok(back)
            }
            None if !seen.load(Ordering::Relaxed) => Err(ReconcileError::NotFound {
                kind: ResourceKind::ProvisioningCluster,
                name: front_name.to_string(),
            }),
            None => Err(ReconcileError::Pending {
                front: front_name.to_string(),
                attempts: self.config.attempts,
            }),
        }
    }

    /// Back id of a cluster however it was named
    pub async fn back_id(&self, cluster: &ClusterRef) -> Result<String, ReconcileError> {
        match cluster {
            ClusterRef::Front(name) => self.resolve_back_id(name).await,
            ClusterRef::Back(id) => Ok(id.clone()),
        }
    }

    /// Make sure the cluster has a registration token and wait until its
    /// command is available
    pub async fn ensure_registration_token(
        &self,
        cluster: &ClusterRef,
    ) -> Result<RemoteObject, ReconcileError> {
        let back = self.back_id(cluster).await?;
        let desc = ResourceDescriptor::new(ResourceKind::RegistrationToken, &self.config.token_name)
            .with_namespace(&back)
            .with_spec(json!({
                "type": "clusterRegistrationToken",
                "clusterId": back,
            }))
            .with_wait(WaitSpec::new(Predicate::present(
                self.config.token_ready_pointer.as_str(),
            )));

        Reconciler::new(self.platform.clone())
            .with_poll_defaults(self.defaults)
            .ensure(&desc)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{MemoryPlatform, Operation};
    use serde_json::Value;
    use tokio::time::Instant;

    fn bridge(store: Arc<MemoryPlatform>) -> IdentityBridge {
        IdentityBridge::new(store).with_config(BridgeConfig {
            attempts: 3,
            delay: Duration::from_secs(5),
            ..BridgeConfig::default()
        })
    }

    fn front(name: &str) -> Value {
        json!({"metadata": {"name": name}, "spec": {"kubernetesVersion": "v1.28.9+rke2r1"}})
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_id_appears_after_retries() {
        let store = Arc::new(MemoryPlatform::new("rancher"));
        store.insert(ResourceKind::ProvisioningCluster, Some("fleet-default"), front("prod"));
        store.script_field(
            ResourceKind::ProvisioningCluster,
            "prod",
            "/status/clusterName",
            vec![Value::from(""), Value::from("c-m-4x7kq")],
        );

        let back = bridge(store.clone()).resolve_back_id("prod").await.unwrap();
        assert_eq!(back, "c-m-4x7kq");
        assert_eq!(store.calls(Operation::Get, ResourceKind::ProvisioningCluster), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_after_budget() {
        let store = Arc::new(MemoryPlatform::new("rancher"));
        store.insert(ResourceKind::ProvisioningCluster, Some("fleet-default"), front("prod"));

        let start = Instant::now();
        let err = bridge(store.clone()).resolve_back_id("prod").await.unwrap_err();

        assert_eq!(
            err,
            ReconcileError::Pending {
                front: "prod".into(),
                attempts: 3
            }
        );
        assert!(err.is_fatal());
        assert_eq!(store.calls(Operation::Get, ResourceKind::ProvisioningCluster), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_front_is_not_found() {
        let store = Arc::new(MemoryPlatform::new("rancher"));
        let err = bridge(store).resolve_back_id("ghost").await.unwrap_err();
        assert!(matches!(err, ReconcileError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_back_ref_needs_no_lookup() {
        let store = Arc::new(MemoryPlatform::new("rancher"));
        let id = bridge(store.clone())
            .back_id(&ClusterRef::Back("c-m-1".into()))
            .await
            .unwrap();
        assert_eq!(id, "c-m-1");
        assert_eq!(store.calls(Operation::Get, ResourceKind::ProvisioningCluster), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registration_token_created_once() {
        let store = Arc::new(MemoryPlatform::new("rancher"));
        store.script_field(
            ResourceKind::RegistrationToken,
            "default-token",
            "/nodeCommand",
            vec![Value::Null, Value::from("curl -fL https://rancher/system-agent-install.sh | sh")],
        );
        let bridge = bridge(store.clone()).with_poll_defaults(PollDefaults {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(60),
        });
        let cluster = ClusterRef::Back("c-m-1".into());

        let token = bridge.ensure_registration_token(&cluster).await.unwrap();
        assert!(token.field_str("/nodeCommand").is_some());
        assert_eq!(token.raw["clusterId"], "c-m-1");

        bridge.ensure_registration_token(&cluster).await.unwrap();
        assert_eq!(store.calls(Operation::Create, ResourceKind::RegistrationToken), 1);
    }

    #[test]
    fn test_cluster_ref_serde() {
        let r: ClusterRef = serde_json::from_value(json!({"type": "front", "value": "prod"})).unwrap();
        assert_eq!(r, ClusterRef::Front("prod".into()));
    }
}
