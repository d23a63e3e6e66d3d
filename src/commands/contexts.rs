use tauri::State;

use crate::dispatcher::ContextsStatesDispatcher;
use crate::kubeconfig::{self, KubeconfigSource};
use crate::manager::ContextsManager;
use crate::models::k8s::{
    ContextHealth, ContextPermission, ContextResources, KubeContext, ResourceCount,
    TroubleshootingInformation,
};
use crate::resources::ResourceKind;

#[tauri::command]
pub fn get_kubeconfig_contexts(manager: State<'_, ContextsManager>) -> Vec<KubeContext> {
    manager.contexts()
}

/// Writes the new current-context into the primary kubeconfig file; the
/// file watcher picks the change up from there.
#[tauri::command]
pub fn set_active_context(context_name: String) -> Result<(), String> {
    let path = KubeconfigSource::from_env()
        .and_then(|source| source.primary_path())
        .ok_or_else(|| "Cannot determine kubeconfig path".to_string())?;
    kubeconfig::set_current_context(&path, &context_name)
        .map_err(|e| format!("Failed to set current context: {e}"))
}

#[tauri::command]
pub fn get_contexts_healths(dispatcher: State<'_, ContextsStatesDispatcher>) -> Vec<ContextHealth> {
    dispatcher.get_contexts_healths()
}

#[tauri::command]
pub fn get_contexts_permissions(dispatcher: State<'_, ContextsStatesDispatcher>) -> Vec<ContextPermission> {
    dispatcher.get_contexts_permissions()
}

#[tauri::command]
pub fn get_resources_count(dispatcher: State<'_, ContextsStatesDispatcher>) -> Vec<ResourceCount> {
    dispatcher.get_resources_count()
}

#[tauri::command]
pub fn get_active_resources_count(dispatcher: State<'_, ContextsStatesDispatcher>) -> Vec<ResourceCount> {
    dispatcher.get_active_resources_count()
}

/// `resource_name` is the plural of a known kind, e.g. `pods`.
#[tauri::command]
pub fn get_resources(
    dispatcher: State<'_, ContextsStatesDispatcher>,
    context_names: Vec<String>,
    resource_name: String,
) -> Result<Vec<ContextResources>, String> {
    let resource: ResourceKind = resource_name.parse().map_err(|e| format!("{e}"))?;
    Ok(dispatcher.get_resources(&context_names, resource))
}

#[tauri::command]
pub fn get_troubleshooting_information(
    dispatcher: State<'_, ContextsStatesDispatcher>,
) -> TroubleshootingInformation {
    dispatcher.get_troubleshooting_information()
}

#[tauri::command]
pub fn is_resource_permitted(
    manager: State<'_, ContextsManager>,
    context_name: String,
    resource_name: String,
) -> Result<bool, String> {
    let resource: ResourceKind = resource_name.parse().map_err(|e| format!("{e}"))?;
    Ok(manager.is_resource_permitted(&context_name, resource))
}

#[tauri::command]
pub fn set_states_experimental(manager: State<'_, ContextsManager>, enabled: bool) {
    manager.settings().set_states_experimental(enabled);
}
