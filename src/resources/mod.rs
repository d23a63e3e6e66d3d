// Resource kinds known to the states core and their factories
use std::fmt;
use std::str::FromStr;

use kube::discovery::ApiResource;
use serde::{Deserialize, Serialize};

pub mod definitions;
pub mod factory;

pub use factory::{
    Access, CreateInformer, InformerTarget, IsActive, PermissionRequest, ResourceFactory,
    ResourceFactoryBuilder, ResourcePermissions,
};

/// Every resource kind the core knows how to watch.
///
/// Serialized as its plural name (`pods`, `cronjobs`, ...), which is also the
/// "resource name" used in permissions, counts and UI channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Pods,
    Deployments,
    Services,
    Nodes,
    PersistentVolumeClaims,
    Ingresses,
    Routes,
    ConfigMaps,
    Secrets,
    Jobs,
    CronJobs,
    Events,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 12] = [
        ResourceKind::Pods,
        ResourceKind::Deployments,
        ResourceKind::Services,
        ResourceKind::Nodes,
        ResourceKind::PersistentVolumeClaims,
        ResourceKind::Ingresses,
        ResourceKind::Routes,
        ResourceKind::ConfigMaps,
        ResourceKind::Secrets,
        ResourceKind::Jobs,
        ResourceKind::CronJobs,
        ResourceKind::Events,
    ];

    /// Plural resource name, as used in REST paths and RBAC rules.
    pub fn plural(self) -> &'static str {
        match self {
            ResourceKind::Pods => "pods",
            ResourceKind::Deployments => "deployments",
            ResourceKind::Services => "services",
            ResourceKind::Nodes => "nodes",
            ResourceKind::PersistentVolumeClaims => "persistentvolumeclaims",
            ResourceKind::Ingresses => "ingresses",
            ResourceKind::Routes => "routes",
            ResourceKind::ConfigMaps => "configmaps",
            ResourceKind::Secrets => "secrets",
            ResourceKind::Jobs => "jobs",
            ResourceKind::CronJobs => "cronjobs",
            ResourceKind::Events => "events",
        }
    }

    pub fn kind(self) -> &'static str {
        match self {
            ResourceKind::Pods => "Pod",
            ResourceKind::Deployments => "Deployment",
            ResourceKind::Services => "Service",
            ResourceKind::Nodes => "Node",
            ResourceKind::PersistentVolumeClaims => "PersistentVolumeClaim",
            ResourceKind::Ingresses => "Ingress",
            ResourceKind::Routes => "Route",
            ResourceKind::ConfigMaps => "ConfigMap",
            ResourceKind::Secrets => "Secret",
            ResourceKind::Jobs => "Job",
            ResourceKind::CronJobs => "CronJob",
            ResourceKind::Events => "Event",
        }
    }

    /// API group, empty for the core group.
    pub fn group(self) -> &'static str {
        match self {
            ResourceKind::Deployments => "apps",
            ResourceKind::Ingresses => "networking.k8s.io",
            ResourceKind::Routes => "route.openshift.io",
            ResourceKind::Jobs | ResourceKind::CronJobs => "batch",
            ResourceKind::Pods
            | ResourceKind::Services
            | ResourceKind::Nodes
            | ResourceKind::PersistentVolumeClaims
            | ResourceKind::ConfigMaps
            | ResourceKind::Secrets
            | ResourceKind::Events => "",
        }
    }

    pub fn version(self) -> &'static str {
        "v1"
    }

    pub fn is_namespaced(self) -> bool {
        !matches!(self, ResourceKind::Nodes)
    }

    /// Name of the UI channel signalling that this kind changed somewhere.
    pub fn update_channel(self) -> &'static str {
        match self {
            ResourceKind::Pods => "kubernetes-update-pods",
            ResourceKind::Deployments => "kubernetes-update-deployments",
            ResourceKind::Services => "kubernetes-update-services",
            ResourceKind::Nodes => "kubernetes-update-nodes",
            ResourceKind::PersistentVolumeClaims => "kubernetes-update-persistentvolumeclaims",
            ResourceKind::Ingresses => "kubernetes-update-ingresses",
            ResourceKind::Routes => "kubernetes-update-routes",
            ResourceKind::ConfigMaps => "kubernetes-update-configmaps",
            ResourceKind::Secrets => "kubernetes-update-secrets",
            ResourceKind::Jobs => "kubernetes-update-jobs",
            ResourceKind::CronJobs => "kubernetes-update-cronjobs",
            ResourceKind::Events => "kubernetes-update-events",
        }
    }

    pub fn api_resource(self) -> ApiResource {
        let group = self.group();
        let api_version = if group.is_empty() {
            self.version().to_string()
        } else {
            format!("{group}/{}", self.version())
        };
        ApiResource {
            group: group.to_string(),
            version: self.version().to_string(),
            api_version,
            kind: self.kind().to_string(),
            plural: self.plural().to_string(),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.plural())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown resource kind: {0}")]
pub struct UnknownResourceKind(pub String);

impl FromStr for ResourceKind {
    type Err = UnknownResourceKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.plural() == s)
            .ok_or_else(|| UnknownResourceKind(s.to_string()))
    }
}
