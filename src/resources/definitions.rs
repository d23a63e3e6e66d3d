use kube::api::DynamicObject;
use serde_json::Value;

use super::factory::{InformerTarget, PermissionRequest, ResourceFactory};
use super::ResourceKind;
use crate::informer::ResourceInformer;

/// Factories for every built-in kind, in `ResourceKind::ALL` order.
pub fn default_factories() -> Vec<ResourceFactory> {
    ResourceKind::ALL.into_iter().map(factory_for).collect()
}

pub fn factory_for(kind: ResourceKind) -> ResourceFactory {
    let builder = ResourceFactory::builder(kind)
        .permissions(permission_requests(kind), kind.is_namespaced())
        .informer(move |target: InformerTarget| {
            let namespace = target.namespace_for(kind);
            ResourceInformer::new(target.context.name, kind, namespace, target.client, target.backoff)
        });

    match kind {
        ResourceKind::Pods => builder.is_active(pod_is_running).build(),
        ResourceKind::Deployments => builder.is_active(deployment_is_available).build(),
        ResourceKind::Nodes => builder.is_active(node_is_ready).build(),
        ResourceKind::PersistentVolumeClaims => builder.is_active(claim_is_bound).build(),
        ResourceKind::Jobs | ResourceKind::CronJobs => builder.is_active(has_active_jobs).build(),
        ResourceKind::Services
        | ResourceKind::Ingresses
        | ResourceKind::Routes
        | ResourceKind::ConfigMaps
        | ResourceKind::Secrets
        | ResourceKind::Events => builder.build(),
    }
}

/// Wildcard watch first, then the kind's own watch and list.
fn permission_requests(kind: ResourceKind) -> Vec<PermissionRequest> {
    vec![
        PermissionRequest::watch_all(),
        PermissionRequest::new(kind.group(), kind.plural(), "watch"),
        PermissionRequest::new(kind.group(), kind.plural(), "list"),
    ]
}

fn status(object: &DynamicObject) -> &Value {
    &object.data["status"]
}

fn pod_is_running(object: &DynamicObject) -> bool {
    status(object)["phase"].as_str() == Some("Running")
}

fn deployment_is_available(object: &DynamicObject) -> bool {
    status(object)["availableReplicas"].as_u64().unwrap_or(0) > 0
}

/// A node is active when its `Ready` condition is `True`.
fn node_is_ready(object: &DynamicObject) -> bool {
    status(object)["conditions"]
        .as_array()
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c["type"].as_str() == Some("Ready") && c["status"].as_str() == Some("True"))
        })
        .unwrap_or(false)
}

fn claim_is_bound(object: &DynamicObject) -> bool {
    status(object)["phase"].as_str() == Some("Bound")
}

// Job status.active is a count, CronJob status.active a list of references.
fn has_active_jobs(object: &DynamicObject) -> bool {
    match &status(object)["active"] {
        Value::Number(count) => count.as_u64().unwrap_or(0) > 0,
        Value::Array(refs) => !refs.is_empty(),
        _ => false,
    }
}
