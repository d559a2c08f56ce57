//! Resource kinds known to the reconciliation core

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The control plane family a kind (or a context) belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformFamily {
    OpenStack,
    Kubernetes,
    Rancher,
}

impl fmt::Display for PlatformFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlatformFamily::OpenStack => "openstack",
            PlatformFamily::Kubernetes => "kubernetes",
            PlatformFamily::Rancher => "rancher",
        };
        f.write_str(s)
    }
}

impl FromStr for PlatformFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openstack" | "os" => Ok(PlatformFamily::OpenStack),
            "kubernetes" | "k8s" => Ok(PlatformFamily::Kubernetes),
            "rancher" => Ok(PlatformFamily::Rancher),
            other => Err(format!("unknown platform '{}'", other)),
        }
    }
}

/// How the Identity Resolver finds an existing object of a kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityMode {
    /// The API has a natural unique name field
    Name,
    /// No name field; a `name:<logical>` tag is attached instead
    Tag,
}

/// Every resource type the core can reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    // OpenStack
    Network,
    Subnet,
    Router,
    SecurityGroup,
    SecurityGroupRule,
    Port,
    Server,
    Volume,
    FloatingIp,
    LoadBalancer,
    Listener,
    Pool,
    Member,

    // Kubernetes
    Secret,
    Certificate,
    Keycloak,
    Ingress,

    // Rancher
    ProvisioningCluster,
    ManagementCluster,
    RegistrationToken,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 20] = [
        ResourceKind::Network,
        ResourceKind::Subnet,
        ResourceKind::Router,
        ResourceKind::SecurityGroup,
        ResourceKind::SecurityGroupRule,
        ResourceKind::Port,
        ResourceKind::Server,
        ResourceKind::Volume,
        ResourceKind::FloatingIp,
        ResourceKind::LoadBalancer,
        ResourceKind::Listener,
        ResourceKind::Pool,
        ResourceKind::Member,
        ResourceKind::Secret,
        ResourceKind::Certificate,
        ResourceKind::Keycloak,
        ResourceKind::Ingress,
        ResourceKind::ProvisioningCluster,
        ResourceKind::ManagementCluster,
        ResourceKind::RegistrationToken,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Network => "network",
            ResourceKind::Subnet => "subnet",
            ResourceKind::Router => "router",
            ResourceKind::SecurityGroup => "security-group",
            ResourceKind::SecurityGroupRule => "security-group-rule",
            ResourceKind::Port => "port",
            ResourceKind::Server => "server",
            ResourceKind::Volume => "volume",
            ResourceKind::FloatingIp => "floating-ip",
            ResourceKind::LoadBalancer => "load-balancer",
            ResourceKind::Listener => "listener",
            ResourceKind::Pool => "pool",
            ResourceKind::Member => "member",
            ResourceKind::Secret => "secret",
            ResourceKind::Certificate => "certificate",
            ResourceKind::Keycloak => "keycloak",
            ResourceKind::Ingress => "ingress",
            ResourceKind::ProvisioningCluster => "provisioning-cluster",
            ResourceKind::ManagementCluster => "management-cluster",
            ResourceKind::RegistrationToken => "registration-token",
        }
    }

    pub fn family(&self) -> PlatformFamily {
        match self {
            ResourceKind::Secret
            | ResourceKind::Certificate
            | ResourceKind::Keycloak
            | ResourceKind::Ingress => PlatformFamily::Kubernetes,
            ResourceKind::ProvisioningCluster
            | ResourceKind::ManagementCluster
            | ResourceKind::RegistrationToken => PlatformFamily::Rancher,
            _ => PlatformFamily::OpenStack,
        }
    }

    /// Floating IPs carry no name field, everything else does
    pub fn identity(&self) -> IdentityMode {
        match self {
            ResourceKind::FloatingIp => IdentityMode::Tag,
            _ => IdentityMode::Name,
        }
    }

    /// Position in the network → member creation chain.
    ///
    /// Kinds outside the OpenStack chain have no tier and are never
    /// constrained by the sequencer.
    pub fn tier(&self) -> Option<u8> {
        match self {
            ResourceKind::Network => Some(0),
            ResourceKind::Subnet => Some(1),
            ResourceKind::Router => Some(2),
            ResourceKind::SecurityGroup | ResourceKind::SecurityGroupRule => Some(3),
            ResourceKind::Server | ResourceKind::Volume | ResourceKind::Port => Some(4),
            ResourceKind::FloatingIp => Some(5),
            ResourceKind::LoadBalancer => Some(6),
            ResourceKind::Listener | ResourceKind::Pool => Some(7),
            ResourceKind::Member => Some(8),
            _ => None,
        }
    }

    /// Mutable-in-place objects that carry a version token
    pub fn is_versioned(&self) -> bool {
        matches!(
            self,
            ResourceKind::Secret
                | ResourceKind::Certificate
                | ResourceKind::Keycloak
                | ResourceKind::Ingress
                | ResourceKind::ProvisioningCluster
        )
    }

    pub fn is_namespaced(&self) -> bool {
        matches!(
            self,
            ResourceKind::Secret
                | ResourceKind::Certificate
                | ResourceKind::Keycloak
                | ResourceKind::Ingress
                | ResourceKind::ProvisioningCluster
                | ResourceKind::RegistrationToken
                | ResourceKind::Member
        )
    }

    /// JSON pointer of the native name field, if the API has one
    pub fn name_pointer(&self) -> Option<&'static str> {
        match self {
            ResourceKind::FloatingIp | ResourceKind::SecurityGroupRule => None,
            ResourceKind::Secret
            | ResourceKind::Certificate
            | ResourceKind::Keycloak
            | ResourceKind::Ingress
            | ResourceKind::ProvisioningCluster => Some("/metadata/name"),
            _ => Some("/name"),
        }
    }

    /// Kubernetes-style objects carry their namespace in the body
    pub fn namespace_pointer(&self) -> Option<&'static str> {
        match self.name_pointer() {
            Some("/metadata/name") => Some("/metadata/namespace"),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        let alias = match normalized.as_str() {
            "net" => "network",
            "sg" => "security-group",
            "sgr" => "security-group-rule",
            "vm" | "instance" => "server",
            "fip" | "floatingip" => "floating-ip",
            "lb" | "loadbalancer" => "load-balancer",
            other => other,
        };
        ResourceKind::ALL
            .iter()
            .find(|k| k.as_str() == alias)
            .copied()
            .ok_or_else(|| format!("unknown resource kind '{}'", s))
    }
}
