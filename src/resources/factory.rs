use std::fmt;
use std::sync::Arc;

use kube::api::DynamicObject;
use serde::{Deserialize, Serialize};

use super::ResourceKind;
use crate::client::KubeApi;
use crate::error::{Error, Result};
use crate::informer::{BackoffSettings, ResourceInformer};
use crate::models::k8s::KubeContext;

/// One RBAC check, the equivalent of a SelfSubjectAccessReview's resource attributes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    pub group: String,
    pub resource: String,
    pub verb: String,
}

impl PermissionRequest {
    pub fn new(group: impl Into<String>, resource: impl Into<String>, verb: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            resource: resource.into(),
            verb: verb.into(),
        }
    }

    /// The optimistic `watch *.*` check tried first for every kind.
    pub fn watch_all() -> Self {
        Self::new("*", "*", "watch")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePermissions {
    pub is_namespaced: bool,
    pub permissions_requests: Vec<PermissionRequest>,
}

/// Whether informers of a factory are gated by RBAC checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    Unrestricted,
    Permissions(ResourcePermissions),
}

/// Everything a factory needs to bind an informer to one context.
#[derive(Clone)]
pub struct InformerTarget {
    pub context: KubeContext,
    pub client: Arc<dyn KubeApi>,
    pub backoff: BackoffSettings,
}

impl InformerTarget {
    /// Namespace to watch for `kind`: the context namespace (or `default`)
    /// for namespaced kinds, cluster scope otherwise.
    pub fn namespace_for(&self, kind: ResourceKind) -> Option<String> {
        kind.is_namespaced().then(|| {
            self.context
                .namespace
                .clone()
                .unwrap_or_else(|| "default".to_string())
        })
    }
}

pub type CreateInformer = Arc<dyn Fn(InformerTarget) -> ResourceInformer + Send + Sync>;
pub type IsActive = Arc<dyn Fn(&DynamicObject) -> bool + Send + Sync>;

/// Frozen descriptor of how to watch one resource kind.
#[derive(Clone)]
pub struct ResourceFactory {
    resource: ResourceKind,
    access: Access,
    informer: Option<CreateInformer>,
    is_active: Option<IsActive>,
}

impl ResourceFactory {
    pub fn builder(resource: ResourceKind) -> ResourceFactoryBuilder {
        ResourceFactoryBuilder::new(resource)
    }

    pub fn resource(&self) -> ResourceKind {
        self.resource
    }

    pub fn access(&self) -> &Access {
        &self.access
    }

    pub fn permissions(&self) -> Option<&ResourcePermissions> {
        match &self.access {
            Access::Unrestricted => None,
            Access::Permissions(permissions) => Some(permissions),
        }
    }

    pub fn has_informer(&self) -> bool {
        self.informer.is_some()
    }

    pub fn create_informer(&self, target: InformerTarget) -> Option<ResourceInformer> {
        self.informer.as_ref().map(|create| create(target))
    }

    pub fn has_is_active(&self) -> bool {
        self.is_active.is_some()
    }

    /// `None` when the kind has no notion of being active.
    pub fn is_active(&self, object: &DynamicObject) -> Option<bool> {
        self.is_active.as_ref().map(|predicate| predicate(object))
    }

    /// Same factory without its first permission request, used to retry
    /// permission probing with the next, finer grained, requests.
    pub fn copy_with_sliced_permissions(&self) -> Result<ResourceFactory> {
        let Access::Permissions(permissions) = &self.access else {
            return Err(Error::MissingPermissions {
                resource: self.resource,
            });
        };
        Ok(ResourceFactory {
            resource: self.resource,
            access: Access::Permissions(ResourcePermissions {
                is_namespaced: permissions.is_namespaced,
                permissions_requests: permissions
                    .permissions_requests
                    .iter()
                    .skip(1)
                    .cloned()
                    .collect(),
            }),
            informer: self.informer.clone(),
            is_active: self.is_active.clone(),
        })
    }
}

impl fmt::Debug for ResourceFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceFactory")
            .field("resource", &self.resource)
            .field("access", &self.access)
            .field("informer", &self.informer.is_some())
            .field("is_active", &self.is_active.is_some())
            .finish()
    }
}

pub struct ResourceFactoryBuilder {
    resource: ResourceKind,
    access: Access,
    informer: Option<CreateInformer>,
    is_active: Option<IsActive>,
}

impl ResourceFactoryBuilder {
    pub fn new(resource: ResourceKind) -> Self {
        Self {
            resource,
            access: Access::Unrestricted,
            informer: None,
            is_active: None,
        }
    }

    pub fn permissions(mut self, permissions_requests: Vec<PermissionRequest>, is_namespaced: bool) -> Self {
        self.access = Access::Permissions(ResourcePermissions {
            is_namespaced,
            permissions_requests,
        });
        self
    }

    pub fn informer<F>(mut self, create: F) -> Self
    where
        F: Fn(InformerTarget) -> ResourceInformer + Send + Sync + 'static,
    {
        self.informer = Some(Arc::new(create));
        self
    }

    pub fn is_active<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&DynamicObject) -> bool + Send + Sync + 'static,
    {
        self.is_active = Some(Arc::new(predicate));
        self
    }

    pub fn build(self) -> ResourceFactory {
        ResourceFactory {
            resource: self.resource,
            access: self.access,
            informer: self.informer,
            is_active: self.is_active,
        }
    }
}
