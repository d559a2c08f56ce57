//! Per-kind REST endpoint tables
//!
//! Each platform family exposes its kinds at different paths, wraps bodies
//! differently and carries version tokens differently. An [`EndpointTable`]
//! captures those differences as data so a single HTTP adapter serves all of
//! them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{FieldMap, PlatformFamily, ResourceKind};

/// Placeholder substituted with the request namespace in endpoint paths
pub const NAMESPACE_PLACEHOLDER: &str = "{namespace}";

/// How a version token travels on a replace request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum VersionPlacement {
    /// The token is written into the body (Kubernetes `metadata.resourceVersion`)
    Body { pointer: String },
    /// The token is sent as an `If-Match` precondition (Neutron `revision_number=N`)
    IfMatch { prefix: String },
    /// The API has no optimistic concurrency
    None,
}

/// REST description of one resource kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Service name used to pick the base URL (`network`, `compute`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,

    /// Collection path, may contain `{namespace}`
    pub path: String,

    /// Collection path for listing when it differs (`/servers/detail`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_path: Option<String>,

    /// Key holding the item array in list responses
    pub list_key: String,

    /// Key wrapping single-object bodies (`network`), absent when unwrapped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_key: Option<String>,

    pub fields: FieldMap,

    pub version: VersionPlacement,

    /// Whether `PUT {path}/{id}/tags/{tag}` is available
    #[serde(default)]
    pub taggable: bool,
}

impl Endpoint {
    fn neutron(path: &str, list_key: &str, item_key: &str) -> Self {
        Self {
            service: Some("network".to_string()),
            path: path.to_string(),
            list_path: None,
            list_key: list_key.to_string(),
            item_key: Some(item_key.to_string()),
            fields: FieldMap::openstack(),
            version: VersionPlacement::IfMatch {
                prefix: "revision_number=".to_string(),
            },
            taggable: true,
        }
    }

    fn octavia(path: &str, list_key: &str, item_key: &str) -> Self {
        Self {
            service: Some("load-balancer".to_string()),
            path: path.to_string(),
            list_path: None,
            list_key: list_key.to_string(),
            item_key: Some(item_key.to_string()),
            fields: FieldMap::openstack()
                .with_status("/provisioning_status")
                .without_version(),
            version: VersionPlacement::None,
            taggable: false,
        }
    }

    fn kubernetes(path: &str) -> Self {
        Self {
            service: None,
            path: path.to_string(),
            list_path: None,
            list_key: "items".to_string(),
            item_key: None,
            fields: FieldMap::kubernetes(),
            version: VersionPlacement::Body {
                pointer: "/metadata/resourceVersion".to_string(),
            },
            taggable: false,
        }
    }

    fn norman(path: &str) -> Self {
        Self {
            service: None,
            path: path.to_string(),
            list_path: None,
            list_key: "data".to_string(),
            item_key: None,
            fields: FieldMap::norman(),
            version: VersionPlacement::None,
            taggable: false,
        }
    }

    /// Resolve the collection path for a namespace, one entry per path
    /// segment. The namespace stays a single segment, unescaped; callers
    /// percent-encode when building the URL.
    pub fn collection_segments(
        &self,
        namespace: Option<&str>,
        for_list: bool,
    ) -> Option<Vec<String>> {
        let template = if for_list {
            self.list_path.as_deref().unwrap_or(&self.path)
        } else {
            &self.path
        };
        let namespace = match namespace {
            Some(ns) => ns,
            None if template.contains(NAMESPACE_PLACEHOLDER) => return None,
            None => "",
        };
        Some(
            template
                .split('/')
                .filter(|segment| !segment.is_empty())
                .map(|segment| segment.replace(NAMESPACE_PLACEHOLDER, namespace))
                .collect(),
        )
    }

    /// Wrap a request body in the item key, if the API expects one
    pub fn wrap_item(&self, body: &Value) -> Value {
        match &self.item_key {
            Some(key) => {
                let mut wrapped = serde_json::Map::new();
                wrapped.insert(key.clone(), body.clone());
                Value::Object(wrapped)
            }
            None => body.clone(),
        }
    }

    /// Strip the item key from a response body, if present
    pub fn unwrap_item(&self, body: Value) -> Value {
        match &self.item_key {
            Some(key) => match body {
                Value::Object(mut map) if map.contains_key(key) => {
                    map.remove(key).unwrap_or(Value::Null)
                }
                other => other,
            },
            None => body,
        }
    }
}

/// All endpoints a platform serves, keyed by kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointTable {
    #[serde(default)]
    pub endpoints: HashMap<ResourceKind, Endpoint>,
}

impl EndpointTable {
    pub fn for_family(family: PlatformFamily) -> Self {
        match family {
            PlatformFamily::OpenStack => Self::openstack(),
            PlatformFamily::Kubernetes => Self::kubernetes(),
            PlatformFamily::Rancher => Self::rancher(),
        }
    }

    /// Neutron, Nova, Cinder and Octavia
    pub fn openstack() -> Self {
        let mut endpoints = HashMap::new();
        endpoints.insert(
            ResourceKind::Network,
            Endpoint::neutron("/v2.0/networks", "networks", "network"),
        );
        endpoints.insert(
            ResourceKind::Subnet,
            Endpoint::neutron("/v2.0/subnets", "subnets", "subnet"),
        );
        endpoints.insert(
            ResourceKind::Router,
            Endpoint::neutron("/v2.0/routers", "routers", "router"),
        );
        endpoints.insert(
            ResourceKind::SecurityGroup,
            Endpoint::neutron("/v2.0/security-groups", "security_groups", "security_group"),
        );

        let mut rule = Endpoint::neutron(
            "/v2.0/security-group-rules",
            "security_group_rules",
            "security_group_rule",
        );
        rule.fields = rule.fields.without_name();
        endpoints.insert(ResourceKind::SecurityGroupRule, rule);

        endpoints.insert(
            ResourceKind::Port,
            Endpoint::neutron("/v2.0/ports", "ports", "port"),
        );

        let mut fip = Endpoint::neutron("/v2.0/floatingips", "floatingips", "floatingip");
        fip.fields = fip.fields.without_name();
        endpoints.insert(ResourceKind::FloatingIp, fip);

        endpoints.insert(
            ResourceKind::Server,
            Endpoint {
                service: Some("compute".to_string()),
                path: "/servers".to_string(),
                list_path: Some("/servers/detail".to_string()),
                list_key: "servers".to_string(),
                item_key: Some("server".to_string()),
                fields: FieldMap::openstack().without_version(),
                version: VersionPlacement::None,
                taggable: false,
            },
        );
        endpoints.insert(
            ResourceKind::Volume,
            Endpoint {
                service: Some("volumev3".to_string()),
                path: "/volumes".to_string(),
                list_path: Some("/volumes/detail".to_string()),
                list_key: "volumes".to_string(),
                item_key: Some("volume".to_string()),
                fields: FieldMap::openstack().without_version(),
                version: VersionPlacement::None,
                taggable: false,
            },
        );

        endpoints.insert(
            ResourceKind::LoadBalancer,
            Endpoint::octavia("/v2/lbaas/loadbalancers", "loadbalancers", "loadbalancer"),
        );
        endpoints.insert(
            ResourceKind::Listener,
            Endpoint::octavia("/v2/lbaas/listeners", "listeners", "listener"),
        );
        endpoints.insert(
            ResourceKind::Pool,
            Endpoint::octavia("/v2/lbaas/pools", "pools", "pool"),
        );
        // Members live under their pool; the pool id is the namespace
        endpoints.insert(
            ResourceKind::Member,
            Endpoint::octavia("/v2/lbaas/pools/{namespace}/members", "members", "member"),
        );

        Self { endpoints }
    }

    pub fn kubernetes() -> Self {
        let mut endpoints = HashMap::new();
        endpoints.insert(
            ResourceKind::Secret,
            Endpoint::kubernetes("/api/v1/namespaces/{namespace}/secrets"),
        );
        endpoints.insert(
            ResourceKind::Certificate,
            Endpoint::kubernetes("/apis/cert-manager.io/v1/namespaces/{namespace}/certificates"),
        );
        endpoints.insert(
            ResourceKind::Keycloak,
            Endpoint::kubernetes("/apis/k8s.keycloak.org/v2alpha1/namespaces/{namespace}/keycloaks"),
        );
        endpoints.insert(
            ResourceKind::Ingress,
            Endpoint::kubernetes("/apis/networking.k8s.io/v1/namespaces/{namespace}/ingresses"),
        );
        Self { endpoints }
    }

    /// Rancher: the declarative `/v1` (Steve) surface for provisioning
    /// clusters and the imperative `/v3` (Norman) surface for the rest
    pub fn rancher() -> Self {
        let mut endpoints = HashMap::new();

        let mut front = Endpoint::kubernetes("/v1/provisioning.cattle.io.clusters/{namespace}");
        front.list_key = "data".to_string();
        front.fields = front.fields.with_status("/metadata/state/name");
        endpoints.insert(ResourceKind::ProvisioningCluster, front);

        endpoints.insert(
            ResourceKind::ManagementCluster,
            Endpoint::norman("/v3/clusters"),
        );
        endpoints.insert(
            ResourceKind::RegistrationToken,
            Endpoint::norman("/v3/clusters/{namespace}/clusterregistrationtokens"),
        );
        Self { endpoints }
    }

    pub fn get(&self, kind: ResourceKind) -> Option<&Endpoint> {
        self.endpoints.get(&kind)
    }

    pub fn insert(&mut self, kind: ResourceKind, endpoint: Endpoint) {
        self.endpoints.insert(kind, endpoint);
    }
}

/// Detect "there is more" markers in a list response.
///
/// The core assumes complete listings; a paginated answer must fail loudly
/// instead of letting the resolver miss an existing object.
pub fn has_next_page(family: PlatformFamily, list_key: &str, body: &Value) -> bool {
    match family {
        PlatformFamily::OpenStack => body
            .get(format!("{}_links", list_key))
            .and_then(Value::as_array)
            .map(|links| {
                links
                    .iter()
                    .any(|l| l.get("rel").and_then(Value::as_str) == Some("next"))
            })
            .unwrap_or(false),
        PlatformFamily::Kubernetes => body
            .pointer("/metadata/continue")
            .and_then(Value::as_str)
            .map(|c| !c.is_empty())
            .unwrap_or(false),
        PlatformFamily::Rancher => {
            let norman = body
                .pointer("/pagination/next")
                .and_then(Value::as_str)
                .is_some();
            let steve = body
                .get("continue")
                .and_then(Value::as_str)
                .map(|c| !c.is_empty())
                .unwrap_or(false);
            norman || steve
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_every_kind_has_an_endpoint_in_its_family() {
        for kind in ResourceKind::ALL {
            let table = EndpointTable::for_family(kind.family());
            assert!(table.get(kind).is_some(), "missing endpoint for {}", kind);
        }
    }

    #[test]
    fn test_collection_segments_substitute_namespace() {
        let table = EndpointTable::kubernetes();
        let ep = table.get(ResourceKind::Secret).unwrap();
        assert_eq!(
            ep.collection_segments(Some("auth"), false).unwrap(),
            vec!["api", "v1", "namespaces", "auth", "secrets"]
        );
        assert_eq!(
            ep.collection_segments(Some("a/b"), false).unwrap()[3],
            "a/b"
        );
        assert_eq!(ep.collection_segments(None, false), None);
    }

    #[test]
    fn test_list_path_override() {
        let table = EndpointTable::openstack();
        let ep = table.get(ResourceKind::Server).unwrap();
        assert_eq!(ep.collection_segments(None, true).unwrap(), vec!["servers", "detail"]);
        assert_eq!(ep.collection_segments(None, false).unwrap(), vec!["servers"]);
    }

    #[test]
    fn test_wrap_and_unwrap() {
        let table = EndpointTable::openstack();
        let ep = table.get(ResourceKind::Network).unwrap();
        let wrapped = ep.wrap_item(&json!({"name": "net-a"}));
        assert_eq!(wrapped, json!({"network": {"name": "net-a"}}));
        assert_eq!(ep.unwrap_item(wrapped), json!({"name": "net-a"}));
    }

    #[test]
    fn test_detects_pagination_markers() {
        let neutron = json!({
            "networks": [],
            "networks_links": [{"rel": "next", "href": "http://x/v2.0/networks?marker=abc"}]
        });
        assert!(has_next_page(PlatformFamily::OpenStack, "networks", &neutron));
        assert!(!has_next_page(
            PlatformFamily::OpenStack,
            "networks",
            &json!({"networks": []})
        ));

        let k8s = json!({"items": [], "metadata": {"continue": "eyJ2Ijoi"}});
        assert!(has_next_page(PlatformFamily::Kubernetes, "items", &k8s));
        let k8s_done = json!({"items": [], "metadata": {"continue": ""}});
        assert!(!has_next_page(PlatformFamily::Kubernetes, "items", &k8s_done));

        let norman = json!({"data": [], "pagination": {"next": "http://r/v3/clusters?marker=m"}});
        assert!(has_next_page(PlatformFamily::Rancher, "data", &norman));
    }
}
