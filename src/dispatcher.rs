use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::manager::{ContextsEvent, ContextsManager};
use crate::models::k8s::{
    ContextHealth, ContextPermission, ContextResources, ResourceCount, TroubleshootingInformation,
};
use crate::resources::ResourceKind;

/// Named signals pushed to the UI. They carry no payload; receivers
/// re-query the getters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UiChannel {
    ContextsHealths,
    ContextsPermissions,
    ResourcesCount,
    ActiveResourcesCount,
    ResourceUpdate(ResourceKind),
}

impl UiChannel {
    pub fn name(&self) -> &'static str {
        match self {
            UiChannel::ContextsHealths => "kubernetes-contexts-healths",
            UiChannel::ContextsPermissions => "kubernetes-contexts-permissions",
            UiChannel::ResourcesCount => "kubernetes-resources-count",
            UiChannel::ActiveResourcesCount => "kubernetes-active-resources-count",
            UiChannel::ResourceUpdate(resource) => resource.update_channel(),
        }
    }
}

pub trait EventSender: Send + Sync {
    fn send(&self, channel: UiChannel);
}

/// Relays manager events to an [`EventSender`] and exposes the manager
/// getters to the UI boundary.
#[derive(Clone)]
pub struct ContextsStatesDispatcher {
    manager: ContextsManager,
    sender: Arc<dyn EventSender>,
    relay: Arc<Mutex<Option<CancellationToken>>>,
}

impl ContextsStatesDispatcher {
    pub fn new(manager: ContextsManager, sender: Arc<dyn EventSender>) -> Self {
        Self {
            manager,
            sender,
            relay: Arc::new(Mutex::new(None)),
        }
    }

    /// Starts relaying. Events emitted after this returns are never missed;
    /// calling it again is a no-op.
    pub fn init(&self) {
        let mut relay = self.relay.lock().unwrap_or_else(PoisonError::into_inner);
        if relay.is_some() {
            return;
        }
        let token = CancellationToken::new();
        let mut events = self.manager.subscribe();
        let dispatcher = self.clone();
        let cancelled = token.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancelled.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(event) => dispatcher.dispatch(event),
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("dispatcher: lagged by {skipped} event(s), refreshing every channel");
                        dispatcher.update_all();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            log::debug!("dispatcher: relay stopped");
        });
        *relay = Some(token);
    }

    fn dispatch(&self, event: ContextsEvent) {
        match event {
            ContextsEvent::HealthChanged | ContextsEvent::OfflineChanged => self.update_health_states(),
            ContextsEvent::PermissionsChanged => self.update_permissions(),
            ContextsEvent::ContextDeleted(_) => {
                self.update_health_states();
                self.update_permissions();
            }
            ContextsEvent::ResourcesCountUpdated => self.update_resources_count(),
            ContextsEvent::ActiveResourcesCountUpdated => self.update_active_resources_count(),
            ContextsEvent::ResourceUpdated { resource, .. } => self.update_resource(resource),
        }
    }

    fn update_all(&self) {
        self.update_health_states();
        self.update_permissions();
        self.update_resources_count();
        self.update_active_resources_count();
        for resource in self.manager.factories().iter().map(|f| f.resource()) {
            self.update_resource(resource);
        }
    }

    pub fn update_health_states(&self) {
        self.sender.send(UiChannel::ContextsHealths);
    }

    pub fn update_permissions(&self) {
        self.sender.send(UiChannel::ContextsPermissions);
    }

    pub fn update_resources_count(&self) {
        self.sender.send(UiChannel::ResourcesCount);
    }

    pub fn update_active_resources_count(&self) {
        self.sender.send(UiChannel::ActiveResourcesCount);
    }

    pub fn update_resource(&self, resource: ResourceKind) {
        self.sender.send(UiChannel::ResourceUpdate(resource));
    }

    pub fn get_contexts_healths(&self) -> Vec<ContextHealth> {
        self.manager.get_contexts_healths()
    }

    pub fn get_contexts_permissions(&self) -> Vec<ContextPermission> {
        self.manager.get_contexts_permissions()
    }

    pub fn get_resources_count(&self) -> Vec<ResourceCount> {
        self.manager.get_resources_count()
    }

    pub fn get_active_resources_count(&self) -> Vec<ResourceCount> {
        self.manager.get_active_resources_count()
    }

    pub fn get_resources(&self, context_names: &[String], resource: ResourceKind) -> Vec<ContextResources> {
        self.manager.get_resources(context_names, resource)
    }

    pub fn get_troubleshooting_information(&self) -> TroubleshootingInformation {
        self.manager.get_troubleshooting_information()
    }

    pub fn dispose(&self) {
        if let Some(token) = self.relay.lock().unwrap_or_else(PoisonError::into_inner).take() {
            token.cancel();
        }
    }
}
