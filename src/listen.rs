use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::manager::{ContextsEvent, ContextsManager};
use crate::models::k8s::ContextPermission;
use crate::resources::ResourceKind;

/// Missing entries are permitted, and so is everything when permission
/// filtering is disabled.
pub(crate) fn is_permitted(permission: Option<&ContextPermission>, states_experimental: bool) -> bool {
    !states_experimental || permission.map_or(true, |p| p.permitted)
}

pub fn is_resource_permitted(
    permissions: &[ContextPermission],
    states_experimental: bool,
    context_name: &str,
    resource: ResourceKind,
) -> bool {
    let permission = permissions
        .iter()
        .find(|p| p.context_name == context_name && p.resource_name == resource);
    is_permitted(permission, states_experimental)
}

/// Handle returned by [`listen_resource_permitted`]; dropping it stops the
/// notifications.
#[derive(Debug)]
pub struct PermissionListener {
    token: CancellationToken,
}

impl PermissionListener {
    pub fn dispose(&self) {
        self.token.cancel();
    }
}

impl Drop for PermissionListener {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Calls `callback` with whether `resource` is permitted in `context_name`,
/// right away and then each time the answer changes.
pub fn listen_resource_permitted<F>(
    manager: &ContextsManager,
    context_name: &str,
    resource: ResourceKind,
    callback: F,
) -> PermissionListener
where
    F: Fn(bool) + Send + 'static,
{
    let token = CancellationToken::new();
    let mut events = manager.subscribe();
    let mut settings = manager.settings().subscribe();
    let manager = manager.clone();
    let context_name = context_name.to_string();

    let mut current = manager.is_resource_permitted(&context_name, resource);
    callback(current);

    let cancelled = token.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancelled.cancelled() => return,
                event = events.recv() => match event {
                    Ok(ContextsEvent::PermissionsChanged | ContextsEvent::ContextDeleted(_)) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        log::debug!("listen: missed {skipped} event(s), re-evaluating {resource} in {context_name}");
                    }
                    Ok(_) => continue,
                    Err(RecvError::Closed) => return,
                },
                changed = settings.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
            let permitted = manager.is_resource_permitted(&context_name, resource);
            if permitted != current {
                current = permitted;
                callback(permitted);
            }
        }
    });

    PermissionListener { token }
}
