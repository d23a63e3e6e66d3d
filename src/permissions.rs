use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::client::KubeApi;
use crate::informer::next_id;
use crate::models::k8s::ContextPermission;
use crate::resources::{PermissionRequest, ResourceFactory, ResourceKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionsSignal {
    pub id: u64,
    pub context_name: String,
    pub permissions: Vec<ContextPermission>,
    pub checked_at: DateTime<Utc>,
}

/// One-shot permission probing of a context, run in the background.
pub struct ContextPermissionsChecker {
    id: u64,
    token: CancellationToken,
}

impl ContextPermissionsChecker {
    pub fn new() -> Self {
        Self {
            id: next_id(),
            token: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn start(
        &self,
        client: Arc<dyn KubeApi>,
        context_name: String,
        namespace: Option<String>,
        factories: Arc<[ResourceFactory]>,
        signals: mpsc::UnboundedSender<PermissionsSignal>,
    ) {
        let id = self.id;
        let token = self.token.clone();
        tokio::spawn(async move {
            let check = check_permissions(client.as_ref(), &context_name, namespace.as_deref(), &factories);
            let permissions = tokio::select! {
                _ = token.cancelled() => return,
                permissions = check => permissions,
            };
            if token.is_cancelled() {
                return;
            }
            let _ = signals.send(PermissionsSignal {
                id,
                context_name: context_name.clone(),
                permissions,
                checked_at: Utc::now(),
            });
        });
    }

    pub fn dispose(&self) {
        self.token.cancel();
    }
}

impl Default for ContextPermissionsChecker {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves the permission of every factory that declares permission requests.
///
/// Factories are grouped by their first request, which is reviewed once per
/// group. When it is denied, each factory of the group falls back to its
/// remaining requests, all of which must be allowed.
pub async fn check_permissions(
    client: &dyn KubeApi,
    context_name: &str,
    namespace: Option<&str>,
    factories: &[ResourceFactory],
) -> Vec<ContextPermission> {
    let mut groups: IndexMap<PermissionRequest, Vec<&ResourceFactory>> = IndexMap::new();
    let mut results = Vec::new();

    for factory in factories {
        let Some(permissions) = factory.permissions() else {
            continue;
        };
        match permissions.permissions_requests.first() {
            Some(first) => groups.entry(first.clone()).or_default().push(factory),
            None => results.push(denied(context_name, factory.resource(), "no permission requests")),
        }
    }

    for (first, group) in groups {
        let all_namespaced = group
            .iter()
            .all(|f| f.permissions().is_some_and(|p| p.is_namespaced));
        let scope = if all_namespaced { namespace } else { None };
        let (allowed, reason) = review(client, &first, scope).await;
        if allowed {
            log::debug!("permissions: {context_name} allows {} {}", first.verb, first.resource);
            for factory in group {
                results.push(ContextPermission {
                    context_name: context_name.to_string(),
                    resource_name: factory.resource(),
                    permitted: true,
                    reason: reason.clone(),
                });
            }
            continue;
        }

        for factory in group {
            let permission = match factory.copy_with_sliced_permissions() {
                Ok(sliced) => check_remaining(client, context_name, namespace, &sliced).await,
                Err(e) => denied(context_name, factory.resource(), &e.to_string()),
            };
            results.push(permission);
        }
    }

    log::info!(
        "permissions: {context_name} permits {}/{} resource(s)",
        results.iter().filter(|p| p.permitted).count(),
        results.len()
    );
    results
}

async fn check_remaining(
    client: &dyn KubeApi,
    context_name: &str,
    namespace: Option<&str>,
    factory: &ResourceFactory,
) -> ContextPermission {
    let resource = factory.resource();
    let Some(permissions) = factory.permissions() else {
        return denied(context_name, resource, "no permission requests");
    };
    if permissions.permissions_requests.is_empty() {
        return denied(context_name, resource, "no permission granted");
    }
    let scope = if permissions.is_namespaced { namespace } else { None };
    for request in &permissions.permissions_requests {
        let (allowed, reason) = review(client, request, scope).await;
        if !allowed {
            let reason = reason.unwrap_or_else(|| format!("cannot {} {}", request.verb, request.resource));
            return denied(context_name, resource, &reason);
        }
    }
    ContextPermission {
        context_name: context_name.to_string(),
        resource_name: resource,
        permitted: true,
        reason: None,
    }
}

/// A failed review counts as a denial, the error becoming the reason.
async fn review(
    client: &dyn KubeApi,
    request: &PermissionRequest,
    namespace: Option<&str>,
) -> (bool, Option<String>) {
    match client.review_access(request, namespace).await {
        Ok(review) => (review.allowed, review.reason.filter(|r| !r.is_empty())),
        Err(e) => {
            log::warn!(
                "permissions: review of {} {} failed: {e}",
                request.verb,
                request.resource
            );
            (false, Some(e.to_string()))
        }
    }
}

fn denied(context_name: &str, resource: ResourceKind, reason: &str) -> ContextPermission {
    ContextPermission {
        context_name: context_name.to_string(),
        resource_name: resource,
        permitted: false,
        reason: Some(reason.to_string()),
    }
}
