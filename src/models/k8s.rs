// Records shared with the UI layer; camelCase on the wire like the front-end types
use chrono::{DateTime, Utc};
use kube::api::DynamicObject;
use serde::{Deserialize, Serialize};

use crate::resources::ResourceKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeContext {
    pub name: String,
    pub cluster: String,
    pub user: String,
    pub namespace: Option<String>,
    pub is_active: bool,
    /// API server URL of the context's cluster
    pub server_url: Option<String>,
}

impl KubeContext {
    /// Two contexts target the same API server identity when everything but
    /// the current-context marker matches.
    pub fn same_target(&self, other: &KubeContext) -> bool {
        self.name == other.name
            && self.cluster == other.cluster
            && self.user == other.user
            && self.namespace == other.namespace
            && self.server_url == other.server_url
    }
}

/// Reachability of one context.
///
/// `checking` stays true while a probe is in flight; `reachable` keeps the
/// previous outcome until the probe settles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextHealth {
    pub context_name: String,
    pub checking: bool,
    pub reachable: bool,
    pub offline: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ContextHealth {
    pub fn new(context_name: impl Into<String>) -> Self {
        Self {
            context_name: context_name.into(),
            checking: false,
            reachable: false,
            offline: false,
            error_message: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextPermission {
    pub context_name: String,
    pub resource_name: ResourceKind,
    pub permitted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceCount {
    pub context_name: String,
    pub resource_name: ResourceKind,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextResources {
    pub context_name: String,
    pub items: Vec<DynamicObject>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckerInfo {
    pub context_name: String,
    pub checking: bool,
    pub reachable: bool,
    pub offline: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionCheckerInfo {
    pub context_name: String,
    pub checking: bool,
    pub checked_at: Option<DateTime<Utc>>,
    pub permissions: Vec<ContextPermission>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InformerInfo {
    pub context_name: String,
    pub resource_name: ResourceKind,
    pub namespace: Option<String>,
    pub objects_count: usize,
    pub offline: bool,
    pub relists: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub last_update_at: Option<DateTime<Utc>>,
}

/// Diagnostics snapshot, assembled on demand.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TroubleshootingInformation {
    pub health_checkers: Vec<HealthCheckerInfo>,
    pub permission_checkers: Vec<PermissionCheckerInfo>,
    pub informers: Vec<InformerInfo>,
}
