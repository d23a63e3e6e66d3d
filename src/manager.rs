//! Aggregated health, permission and resource state of every kubeconfig context.
//!
//! The manager owns one health checker per context, runs a permissions check
//! whenever a context becomes reachable, and keeps one informer per permitted
//! (context, kind). Background tasks report through internal channels that a
//! single loop drains, so state changes are applied one at a time. Outward
//! changes are published as [`ContextsEvent`]s; payloads are never attached,
//! subscribers re-query the getters.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use kube::config::Kubeconfig;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::client::{ClientProvider, KubeApi};
use crate::config::SettingsStore;
use crate::health::{ContextHealthChecker, HealthSignal};
use crate::informer::{InformerSignal, ResourceInformer};
use crate::kubeconfig;
use crate::listen::is_permitted;
use crate::models::k8s::{
    ContextHealth, ContextPermission, ContextResources, HealthCheckerInfo, KubeContext,
    PermissionCheckerInfo, ResourceCount, TroubleshootingInformation,
};
use crate::permissions::{ContextPermissionsChecker, PermissionsSignal};
use crate::registry::ContextResourceRegistry;
use crate::resources::{InformerTarget, ResourceFactory, ResourceKind};

const EVENTS_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextsEvent {
    HealthChanged,
    OfflineChanged,
    PermissionsChanged,
    ContextDeleted(String),
    ResourcesCountUpdated,
    ActiveResourcesCountUpdated,
    ResourceUpdated {
        context_name: String,
        resource: ResourceKind,
    },
}

struct ContextState {
    context: KubeContext,
    client: Option<Arc<dyn KubeApi>>,
    health: ContextHealth,
    last_check: Option<DateTime<Utc>>,
    settled_reachable: bool,
    health_checker: Option<ContextHealthChecker>,
    permissions_checker: Option<ContextPermissionsChecker>,
    permissions_checking: bool,
    permissions_checked_at: Option<DateTime<Utc>>,
}

impl ContextState {
    fn dispose(&self) {
        if let Some(checker) = &self.health_checker {
            checker.dispose();
        }
        if let Some(checker) = &self.permissions_checker {
            checker.dispose();
        }
    }
}

struct State {
    states_experimental: bool,
    contexts: IndexMap<String, ContextState>,
    permissions: ContextResourceRegistry<ContextPermission>,
    informers: ContextResourceRegistry<Arc<ResourceInformer>>,
    counts: ContextResourceRegistry<usize>,
    active_counts: ContextResourceRegistry<usize>,
}

struct Signals {
    health: mpsc::UnboundedSender<HealthSignal>,
    permissions: mpsc::UnboundedSender<PermissionsSignal>,
    informers: mpsc::UnboundedSender<InformerSignal>,
}

struct Inner {
    state: RwLock<State>,
    factories: Arc<[ResourceFactory]>,
    provider: Arc<dyn ClientProvider>,
    settings: SettingsStore,
    events: broadcast::Sender<ContextsEvent>,
    signals: Signals,
    token: CancellationToken,
}

#[derive(Clone)]
pub struct ContextsManager {
    inner: Arc<Inner>,
}

impl ContextsManager {
    /// Creates the manager and spawns its signal loop on the current runtime.
    pub fn new(
        settings: SettingsStore,
        provider: Arc<dyn ClientProvider>,
        factories: Vec<ResourceFactory>,
    ) -> Self {
        let (health_tx, health_rx) = mpsc::unbounded_channel();
        let (permissions_tx, permissions_rx) = mpsc::unbounded_channel();
        let (informers_tx, informers_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENTS_CAPACITY);

        let inner = Arc::new(Inner {
            state: RwLock::new(State {
                states_experimental: settings.states_experimental(),
                contexts: IndexMap::new(),
                permissions: ContextResourceRegistry::new(),
                informers: ContextResourceRegistry::new(),
                counts: ContextResourceRegistry::new(),
                active_counts: ContextResourceRegistry::new(),
            }),
            factories: factories.into(),
            provider,
            settings,
            events,
            signals: Signals {
                health: health_tx,
                permissions: permissions_tx,
                informers: informers_tx,
            },
            token: CancellationToken::new(),
        });

        tokio::spawn(run(Arc::clone(&inner), health_rx, permissions_rx, informers_rx));
        Self { inner }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ContextsEvent> {
        self.inner.events.subscribe()
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.inner.settings
    }

    pub fn factories(&self) -> &[ResourceFactory] {
        &self.inner.factories
    }

    /// Reconciles the tracked contexts with a freshly loaded kubeconfig.
    pub async fn update(&self, kubeconfig: &Kubeconfig) {
        let contexts = kubeconfig::contexts(kubeconfig);

        let (removed, added) = {
            let mut state = self.inner.write();
            let removed: Vec<String> = state
                .contexts
                .values()
                .filter(|tracked| {
                    !contexts
                        .iter()
                        .any(|context| context.same_target(&tracked.context))
                })
                .map(|tracked| tracked.context.name.clone())
                .collect();
            for context in &contexts {
                if let Some(tracked) = state.contexts.get_mut(&context.name) {
                    tracked.context.is_active = context.is_active;
                }
            }
            let added: Vec<KubeContext> = contexts
                .into_iter()
                .filter(|context| {
                    removed.contains(&context.name) || !state.contexts.contains_key(&context.name)
                })
                .collect();
            (removed, added)
        };

        for name in &removed {
            self.remove_context(name);
        }
        for context in added {
            let client = match self.inner.provider.client(kubeconfig, &context.name).await {
                Ok(client) => Some(client),
                Err(e) => {
                    log::warn!("manager: cannot create client for context {}: {e}", context.name);
                    None
                }
            };
            self.add_context(context, client);
        }
    }

    fn add_context(&self, context: KubeContext, client: Option<Arc<dyn KubeApi>>) {
        let name = context.name.clone();
        let mut health = ContextHealth::new(&name);
        let health_checker = client.as_ref().map(|client| {
            let settings = self.inner.settings.get();
            ContextHealthChecker::new(
                &name,
                Arc::clone(client),
                settings.health_check_timeout(),
                settings.health_check_interval(),
            )
        });
        if client.is_none() {
            health.error_message = Some("no client for this context".to_string());
        }

        {
            let mut state = self.inner.write();
            if state.contexts.contains_key(&name) {
                return;
            }
            if let Some(checker) = &health_checker {
                checker.start(self.inner.signals.health.clone());
            }
            state.contexts.insert(
                name.clone(),
                ContextState {
                    context,
                    client,
                    health,
                    last_check: None,
                    settled_reachable: false,
                    health_checker,
                    permissions_checker: None,
                    permissions_checking: false,
                    permissions_checked_at: None,
                },
            );
        }
        log::info!("manager: tracking context {name}");
        self.inner.emit(ContextsEvent::HealthChanged);
    }

    /// Stops everything running for a context and forgets its state.
    pub fn remove_context(&self, name: &str) {
        let events = {
            let mut state = self.inner.write();
            let Some(context) = state.contexts.shift_remove(name) else {
                return;
            };
            context.dispose();
            for informer in state.informers.remove_context(name) {
                informer.dispose();
            }
            state.permissions.remove_context(name);

            let mut events = Vec::new();
            if !state.counts.remove_context(name).is_empty() {
                events.push(ContextsEvent::ResourcesCountUpdated);
            }
            if !state.active_counts.remove_context(name).is_empty() {
                events.push(ContextsEvent::ActiveResourcesCountUpdated);
            }
            events.push(ContextsEvent::ContextDeleted(name.to_string()));
            events
        };
        log::info!("manager: context {name} removed");
        self.inner.emit_all(events);
    }

    pub fn contexts(&self) -> Vec<KubeContext> {
        self.inner
            .read()
            .contexts
            .values()
            .map(|tracked| tracked.context.clone())
            .collect()
    }

    pub fn get_contexts_healths(&self) -> Vec<ContextHealth> {
        self.inner
            .read()
            .contexts
            .values()
            .map(|tracked| tracked.health.clone())
            .collect()
    }

    pub fn get_contexts_permissions(&self) -> Vec<ContextPermission> {
        self.inner
            .read()
            .permissions
            .iter()
            .map(|(_, _, permission)| permission.clone())
            .collect()
    }

    pub fn is_resource_permitted(&self, context_name: &str, resource: ResourceKind) -> bool {
        let state = self.inner.read();
        is_permitted(
            state.permissions.get(context_name, resource),
            self.inner.settings.states_experimental(),
        )
    }

    pub fn get_resources_count(&self) -> Vec<ResourceCount> {
        counts_of(&self.inner.read().counts)
    }

    pub fn get_active_resources_count(&self) -> Vec<ResourceCount> {
        counts_of(&self.inner.read().active_counts)
    }

    /// Items of `resource` for each listed context that has a running informer.
    pub fn get_resources(&self, context_names: &[String], resource: ResourceKind) -> Vec<ContextResources> {
        let state = self.inner.read();
        context_names
            .iter()
            .filter_map(|name| {
                state.informers.get(name, resource).map(|informer| ContextResources {
                    context_name: name.clone(),
                    items: informer.objects(),
                })
            })
            .collect()
    }

    pub fn get_troubleshooting_information(&self) -> TroubleshootingInformation {
        let state = self.inner.read();
        let health_checkers = state
            .contexts
            .values()
            .map(|tracked| HealthCheckerInfo {
                context_name: tracked.context.name.clone(),
                checking: tracked.health.checking,
                reachable: tracked.health.reachable,
                offline: tracked.health.offline,
                last_check: tracked.last_check,
                error_message: tracked.health.error_message.clone(),
            })
            .collect();
        let permission_checkers = state
            .contexts
            .values()
            .filter(|tracked| tracked.permissions_checker.is_some())
            .map(|tracked| PermissionCheckerInfo {
                context_name: tracked.context.name.clone(),
                checking: tracked.permissions_checking,
                checked_at: tracked.permissions_checked_at,
                permissions: state
                    .permissions
                    .iter()
                    .filter(|(context, _, _)| *context == tracked.context.name)
                    .map(|(_, _, permission)| permission.clone())
                    .collect(),
            })
            .collect();
        let informers = state
            .informers
            .iter()
            .map(|(_, _, informer)| informer.info())
            .collect();
        TroubleshootingInformation {
            health_checkers,
            permission_checkers,
            informers,
        }
    }

    /// Stops every checker and informer; the manager is unusable afterwards.
    pub fn dispose(&self) {
        self.inner.token.cancel();
        let mut state = self.inner.write();
        for (_, context) in state.contexts.drain(..) {
            context.dispose();
        }
        let names: Vec<String> = state
            .informers
            .iter()
            .map(|(context, _, _)| context.to_string())
            .collect();
        for name in names {
            for informer in state.informers.remove_context(&name) {
                informer.dispose();
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn notify(&self, event: ContextsEvent) {
        self.inner.emit(event);
    }
}

async fn run(
    inner: Arc<Inner>,
    mut health_rx: mpsc::UnboundedReceiver<HealthSignal>,
    mut permissions_rx: mpsc::UnboundedReceiver<PermissionsSignal>,
    mut informers_rx: mpsc::UnboundedReceiver<InformerSignal>,
) {
    let mut settings_rx = inner.settings.subscribe();
    loop {
        tokio::select! {
            _ = inner.token.cancelled() => break,
            Some(signal) = health_rx.recv() => inner.on_health(signal),
            Some(signal) = permissions_rx.recv() => inner.on_permissions(signal),
            Some(signal) = informers_rx.recv() => inner.on_informer(signal),
            Ok(()) = settings_rx.changed() => inner.on_settings_changed(),
        }
    }
    log::debug!("manager: signal loop stopped");
}

impl Inner {
    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ContextsEvent) {
        // no subscriber is fine
        let _ = self.events.send(event);
    }

    fn emit_all(&self, events: Vec<ContextsEvent>) {
        for event in events {
            self.emit(event);
        }
    }

    fn factory(&self, resource: ResourceKind) -> Option<&ResourceFactory> {
        self.factories.iter().find(|f| f.resource() == resource)
    }

    fn on_health(&self, signal: HealthSignal) {
        let events = {
            let mut state = self.write();
            let state = &mut *state;
            let Some(tracked) = state.contexts.get_mut(&signal.context_name) else {
                return;
            };
            if tracked.health_checker.as_ref().map(ContextHealthChecker::id) != Some(signal.id) {
                return;
            }

            let mut events = Vec::new();
            let mut health = tracked.health.clone();
            health.checking = signal.checking;
            if !signal.checking {
                health.reachable = signal.reachable;
                health.error_message = signal.error_message.clone();
                tracked.last_check = Some(signal.checked_at);
            }

            let became_reachable = !signal.checking && signal.reachable && !tracked.settled_reachable;
            let became_unreachable = !signal.checking && !signal.reachable && tracked.settled_reachable;
            if became_unreachable {
                health.offline = false;
            }
            if health != tracked.health {
                tracked.health = health;
                events.push(ContextsEvent::HealthChanged);
            }

            if became_reachable {
                tracked.settled_reachable = true;
                log::info!("manager: context {} is reachable", signal.context_name);
                self.start_permissions_check(tracked);
                events.extend(self.reconcile(state, &signal.context_name));
            } else if became_unreachable {
                tracked.settled_reachable = false;
                log::info!("manager: context {} is unreachable", signal.context_name);
                events.extend(self.reconcile(state, &signal.context_name));
            }
            events
        };
        self.emit_all(events);
    }

    fn start_permissions_check(&self, tracked: &mut ContextState) {
        let Some(client) = &tracked.client else {
            return;
        };
        if let Some(previous) = &tracked.permissions_checker {
            previous.dispose();
        }
        let checker = ContextPermissionsChecker::new();
        checker.start(
            Arc::clone(client),
            tracked.context.name.clone(),
            tracked.context.namespace.clone(),
            Arc::clone(&self.factories),
            self.signals.permissions.clone(),
        );
        tracked.permissions_checker = Some(checker);
        tracked.permissions_checking = true;
    }

    fn on_permissions(&self, signal: PermissionsSignal) {
        let events = {
            let mut state = self.write();
            let state = &mut *state;
            let Some(tracked) = state.contexts.get_mut(&signal.context_name) else {
                return;
            };
            if tracked.permissions_checker.as_ref().map(ContextPermissionsChecker::id) != Some(signal.id) {
                return;
            }
            tracked.permissions_checking = false;
            tracked.permissions_checked_at = Some(signal.checked_at);

            for permission in signal.permissions {
                let resource = permission.resource_name;
                state
                    .permissions
                    .set(&signal.context_name, resource, permission);
            }
            let mut events = vec![ContextsEvent::PermissionsChanged];
            events.extend(self.reconcile(state, &signal.context_name));
            events
        };
        self.emit_all(events);
    }

    fn on_informer(&self, signal: InformerSignal) {
        let events = {
            let mut state = self.write();
            let state = &mut *state;
            match signal {
                InformerSignal::Updated {
                    id,
                    context_name,
                    resource,
                } => self.on_informer_updated(state, id, context_name, resource),
                InformerSignal::Offline {
                    id,
                    context_name,
                    resource,
                    reason,
                } => {
                    if !is_current(state, id, &context_name, resource) {
                        return;
                    }
                    log::warn!("manager: {resource} informer offline in context {context_name}: {reason}");
                    set_offline(state, &context_name, true)
                }
                InformerSignal::Online {
                    id,
                    context_name,
                    resource,
                } => {
                    if !is_current(state, id, &context_name, resource) {
                        return;
                    }
                    let still_offline = state
                        .informers
                        .iter()
                        .any(|(context, _, informer)| context == context_name && informer.is_offline());
                    if still_offline {
                        return;
                    }
                    set_offline(state, &context_name, false)
                }
            }
        };
        self.emit_all(events);
    }

    fn on_informer_updated(
        &self,
        state: &mut State,
        id: u64,
        context_name: String,
        resource: ResourceKind,
    ) -> Vec<ContextsEvent> {
        let Some(informer) = state
            .informers
            .get(&context_name, resource)
            .filter(|informer| informer.id() == id)
            .cloned()
        else {
            return Vec::new();
        };

        let mut events = Vec::new();
        let count = informer.len();
        if state.counts.get(&context_name, resource) != Some(&count) {
            state.counts.set(&context_name, resource, count);
            events.push(ContextsEvent::ResourcesCountUpdated);
        }
        if let Some(factory) = self.factory(resource).filter(|f| f.has_is_active()) {
            let active = informer.count_matching(|object| factory.is_active(object) == Some(true));
            if state.active_counts.get(&context_name, resource) != Some(&active) {
                state.active_counts.set(&context_name, resource, active);
                events.push(ContextsEvent::ActiveResourcesCountUpdated);
            }
        }
        events.push(ContextsEvent::ResourceUpdated {
            context_name,
            resource,
        });
        events
    }

    fn on_settings_changed(&self) {
        let experimental = self.settings.states_experimental();
        let events = {
            let mut state = self.write();
            if state.states_experimental == experimental {
                return;
            }
            state.states_experimental = experimental;
            log::info!("manager: permission filtering {}", if experimental { "enabled" } else { "disabled" });

            let names: Vec<String> = state.contexts.keys().cloned().collect();
            let mut events = vec![ContextsEvent::PermissionsChanged];
            for name in names {
                events.extend(self.reconcile(&mut state, &name));
            }
            events
        };
        self.emit_all(events);
    }

    /// Starts or stops the informers of a context so that exactly the
    /// eligible kinds are watched.
    fn reconcile(&self, state: &mut State, context_name: &str) -> Vec<ContextsEvent> {
        let experimental = state.states_experimental;
        let Some(tracked) = state.contexts.get(context_name) else {
            return Vec::new();
        };
        let eligible = tracked.settled_reachable
            && (!experimental || tracked.permissions_checked_at.is_some());
        let target = tracked.client.as_ref().map(|client| InformerTarget {
            context: tracked.context.clone(),
            client: Arc::clone(client),
            backoff: self.settings.get().watch_backoff(),
        });

        let mut events = Vec::new();
        for factory in self.factories.iter().filter(|f| f.has_informer()) {
            let resource = factory.resource();
            let should_run = eligible
                && is_permitted(state.permissions.get(context_name, resource), experimental);
            let running = state.informers.get(context_name, resource).is_some();

            match (&target, should_run, running) {
                (Some(target), true, false) => {
                    if let Some(informer) = factory.create_informer(target.clone()) {
                        let informer = Arc::new(informer);
                        informer.start(self.signals.informers.clone());
                        state.informers.set(context_name, resource, informer);
                    }
                }
                (_, false, true) => {
                    events.extend(stop_informer(state, context_name, resource));
                }
                _ => {}
            }
        }
        events
    }
}

fn stop_informer(state: &mut State, context_name: &str, resource: ResourceKind) -> Vec<ContextsEvent> {
    let mut events = Vec::new();
    if let Some(informer) = state.informers.remove(context_name, resource) {
        informer.dispose();
        log::info!("manager: stopped {resource} informer in context {context_name}");
        events.push(ContextsEvent::ResourceUpdated {
            context_name: context_name.to_string(),
            resource,
        });
    }
    if state.counts.remove(context_name, resource).is_some() {
        events.push(ContextsEvent::ResourcesCountUpdated);
    }
    if state.active_counts.remove(context_name, resource).is_some() {
        events.push(ContextsEvent::ActiveResourcesCountUpdated);
    }
    events
}

fn is_current(state: &State, id: u64, context_name: &str, resource: ResourceKind) -> bool {
    state
        .informers
        .get(context_name, resource)
        .is_some_and(|informer| informer.id() == id)
}

fn set_offline(state: &mut State, context_name: &str, offline: bool) -> Vec<ContextsEvent> {
    match state.contexts.get_mut(context_name) {
        Some(tracked) if tracked.health.offline != offline => {
            tracked.health.offline = offline;
            vec![ContextsEvent::OfflineChanged]
        }
        _ => Vec::new(),
    }
}

fn counts_of(registry: &ContextResourceRegistry<usize>) -> Vec<ResourceCount> {
    registry
        .iter()
        .map(|(context_name, resource_name, count)| ResourceCount {
            context_name: context_name.to_string(),
            resource_name,
            count: *count,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use kube::api::WatchEvent;
    use serde_json::json;

    use super::*;
    use crate::client::ResourceList;
    use crate::config::Settings;
    use crate::resources::definitions::factory_for;
    use crate::resources::PermissionRequest;
    use crate::testing::{kubeconfig, object, wait_until, FakeProvider};

    fn settings(states_experimental: bool) -> SettingsStore {
        SettingsStore::new(Settings {
            states_experimental,
            health_check_timeout_ms: 200,
            health_check_interval_ms: 50,
            watch_backoff_initial_ms: 10,
            watch_backoff_max_ms: 40,
            ..Settings::default()
        })
    }

    fn manager(provider: &Arc<FakeProvider>, settings: SettingsStore) -> ContextsManager {
        ContextsManager::new(
            settings,
            provider.clone(),
            vec![factory_for(ResourceKind::Pods), factory_for(ResourceKind::Nodes)],
        )
    }

    /// Next event that is not a periodic health refresh.
    fn try_next_non_health(events: &mut broadcast::Receiver<ContextsEvent>) -> Option<ContextsEvent> {
        while let Ok(event) = events.try_recv() {
            if event != ContextsEvent::HealthChanged {
                return Some(event);
            }
        }
        None
    }

    async fn next_non_health(events: &mut broadcast::Receiver<ContextsEvent>) -> ContextsEvent {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
                .await
                .unwrap()
                .unwrap();
            if event != ContextsEvent::HealthChanged {
                return event;
            }
        }
    }

    fn running_informers(manager: &ContextsManager) -> Vec<(String, ResourceKind)> {
        manager
            .get_troubleshooting_information()
            .informers
            .into_iter()
            .map(|info| (info.context_name, info.resource_name))
            .collect()
    }

    #[tokio::test]
    async fn reachable_context_gets_permissions_then_informers() {
        let provider = FakeProvider::new();
        let api = provider.api("kind");
        api.push_list(
            ResourceKind::Pods,
            Ok(ResourceList {
                resource_version: Some("1".to_string()),
                items: vec![object(ResourceKind::Pods, "web", "1")],
            }),
        );
        let manager = manager(&provider, settings(true));
        let mut events = manager.subscribe();

        manager.update(&kubeconfig(&["kind"])).await;

        wait_until(|| running_informers(&manager).len() == 2).await;
        wait_until(|| {
            manager
                .get_resources_count()
                .iter()
                .any(|c| c.resource_name == ResourceKind::Pods && c.count == 1)
        })
        .await;

        // health is re-checked periodically, so wait for a settled moment
        wait_until(|| !manager.get_contexts_healths()[0].checking).await;
        assert!(manager.get_contexts_healths()[0].reachable);
        assert_eq!(manager.get_contexts_permissions().len(), 2);
        assert!(manager.is_resource_permitted("kind", ResourceKind::Pods));
        assert!(manager.contexts()[0].is_active);

        let resources = manager.get_resources(&["kind".to_string(), "other".to_string()], ResourceKind::Pods);
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].items[0].metadata.name.as_deref(), Some("web"));

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(seen.contains(&ContextsEvent::HealthChanged));
        assert!(seen.contains(&ContextsEvent::PermissionsChanged));
        assert!(seen.contains(&ContextsEvent::ResourcesCountUpdated));
        assert!(seen.contains(&ContextsEvent::ResourceUpdated {
            context_name: "kind".to_string(),
            resource: ResourceKind::Pods,
        }));
        manager.dispose();
    }

    #[tokio::test]
    async fn active_count_follows_the_factory_predicate() {
        let provider = FakeProvider::new();
        let api = provider.api("kind");
        let ready = object(ResourceKind::Nodes, "node-1", "1")
            .data(json!({"status": {"conditions": [{"type": "Ready", "status": "True"}]}}));
        let not_ready = object(ResourceKind::Nodes, "node-2", "1");
        api.push_list(
            ResourceKind::Nodes,
            Ok(ResourceList {
                resource_version: Some("1".to_string()),
                items: vec![ready, not_ready],
            }),
        );
        let manager = manager(&provider, settings(true));

        manager.update(&kubeconfig(&["kind"])).await;

        wait_until(|| {
            manager.get_active_resources_count().iter().any(|c| {
                c.resource_name == ResourceKind::Nodes && c.count == 1
            })
        })
        .await;
        assert!(manager
            .get_resources_count()
            .iter()
            .any(|c| c.resource_name == ResourceKind::Nodes && c.count == 2));
        manager.dispose();
    }

    #[tokio::test]
    async fn denied_kind_gets_no_informer() {
        let provider = FakeProvider::new();
        let api = provider.api("kind");
        api.deny(PermissionRequest::watch_all());
        api.deny(PermissionRequest::new("", "nodes", "watch"));
        let manager = manager(&provider, settings(true));

        manager.update(&kubeconfig(&["kind"])).await;

        wait_until(|| running_informers(&manager) == vec![("kind".to_string(), ResourceKind::Pods)]).await;
        assert!(!manager.is_resource_permitted("kind", ResourceKind::Nodes));
        let info = manager.get_troubleshooting_information();
        assert_eq!(info.permission_checkers.len(), 1);
        assert!(!info.permission_checkers[0].checking);
        manager.dispose();
    }

    #[tokio::test]
    async fn disabling_experimental_mode_starts_denied_informers() {
        let provider = FakeProvider::new();
        let api = provider.api("kind");
        api.deny(PermissionRequest::watch_all());
        api.deny(PermissionRequest::new("", "nodes", "watch"));
        let settings = settings(true);
        let manager = manager(&provider, settings.clone());
        manager.update(&kubeconfig(&["kind"])).await;
        wait_until(|| running_informers(&manager).len() == 1).await;

        settings.set_states_experimental(false);

        wait_until(|| running_informers(&manager).len() == 2).await;
        assert!(manager.is_resource_permitted("kind", ResourceKind::Nodes));

        settings.set_states_experimental(true);
        wait_until(|| running_informers(&manager).len() == 1).await;
        manager.dispose();
    }

    #[tokio::test]
    async fn removed_context_is_pruned_and_announced() {
        let provider = FakeProvider::new();
        let manager = manager(&provider, settings(true));
        manager.update(&kubeconfig(&["one", "two"])).await;
        wait_until(|| running_informers(&manager).len() == 4).await;
        wait_until(|| manager.get_resources_count().len() == 4).await;
        let mut events = manager.subscribe();

        manager.update(&kubeconfig(&["two"])).await;

        assert_eq!(
            manager.contexts().iter().map(|c| c.name.clone()).collect::<Vec<_>>(),
            vec!["two".to_string()]
        );
        assert!(manager.get_contexts_healths().iter().all(|h| h.context_name == "two"));
        assert!(manager.get_contexts_permissions().iter().all(|p| p.context_name == "two"));
        assert!(manager.get_resources_count().iter().all(|c| c.context_name == "two"));
        assert!(running_informers(&manager).iter().all(|(context, _)| context == "two"));

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(seen.contains(&ContextsEvent::ContextDeleted("one".to_string())));
        assert!(seen.contains(&ContextsEvent::ResourcesCountUpdated));
        manager.dispose();
    }

    #[tokio::test]
    async fn unreachable_context_has_no_informers() {
        let provider = FakeProvider::new();
        provider.api("down").set_ready(false);
        let manager = manager(&provider, settings(true));

        manager.update(&kubeconfig(&["down"])).await;

        wait_until(|| {
            manager
                .get_troubleshooting_information()
                .health_checkers
                .iter()
                .any(|h| h.last_check.is_some())
        })
        .await;
        let health = &manager.get_contexts_healths()[0];
        assert!(!health.reachable);
        assert!(health.error_message.is_some());
        assert!(running_informers(&manager).is_empty());
        assert!(manager.get_contexts_permissions().is_empty());
        manager.dispose();
    }

    #[tokio::test]
    async fn informer_failure_marks_context_offline_until_relisted() {
        let provider = FakeProvider::new();
        let api = provider.api("kind");
        let manager = manager(&provider, settings(true));
        manager.update(&kubeconfig(&["kind"])).await;
        wait_until(|| api.watch_count(ResourceKind::Pods) == 1).await;
        // keep the relist failing long enough to observe the offline flag
        for _ in 0..5 {
            api.push_list(ResourceKind::Pods, Err(crate::Error::Watch("reset".to_string())));
        }

        api.send(ResourceKind::Pods, Err(crate::Error::Watch("reset".to_string())));

        wait_until(|| manager.get_contexts_healths()[0].offline).await;
        wait_until(|| api.watch_count(ResourceKind::Pods) == 2).await;
        wait_until(|| !manager.get_contexts_healths()[0].offline).await;
        manager.dispose();
    }

    #[tokio::test]
    async fn updates_from_replaced_informers_are_ignored() {
        let provider = FakeProvider::new();
        let api = provider.api("kind");
        let manager = manager(&provider, settings(true));
        manager.update(&kubeconfig(&["kind"])).await;
        wait_until(|| api.watch_count(ResourceKind::Pods) == 1).await;
        wait_until(|| manager.get_resources_count().len() == 2).await;
        let mut events = manager.subscribe();

        manager.inner.on_informer(InformerSignal::Updated {
            id: u64::MAX,
            context_name: "kind".to_string(),
            resource: ResourceKind::Pods,
        });
        assert_eq!(try_next_non_health(&mut events), None);

        api.send(ResourceKind::Pods, Ok(WatchEvent::Added(object(ResourceKind::Pods, "a", "2"))));
        assert_eq!(next_non_health(&mut events).await, ContextsEvent::ResourcesCountUpdated);
        manager.dispose();
    }

    #[tokio::test]
    async fn retargeted_context_is_recreated() {
        let provider = FakeProvider::new();
        let manager = manager(&provider, settings(true));
        manager.update(&kubeconfig(&["kind"])).await;
        wait_until(|| running_informers(&manager).len() == 2).await;
        let mut events = manager.subscribe();

        let mut retargeted = kubeconfig(&["kind"]);
        if let Some(context) = retargeted.contexts[0].context.as_mut() {
            context.namespace = Some("team".to_string());
        }
        manager.update(&retargeted).await;

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(seen.contains(&ContextsEvent::ContextDeleted("kind".to_string())));
        assert_eq!(manager.contexts().len(), 1);
        assert_eq!(manager.contexts()[0].namespace.as_deref(), Some("team"));

        wait_until(|| {
            manager
                .get_troubleshooting_information()
                .informers
                .iter()
                .any(|info| info.resource_name == ResourceKind::Pods && info.namespace.as_deref() == Some("team"))
        })
        .await;
        assert_eq!(running_informers(&manager).len(), 2);
        manager.dispose();
    }

    #[tokio::test]
    async fn context_going_unreachable_stops_its_informers() {
        let provider = FakeProvider::new();
        let api = provider.api("kind");
        let manager = manager(&provider, settings(true));
        manager.update(&kubeconfig(&["kind"])).await;
        wait_until(|| running_informers(&manager).len() == 2).await;
        wait_until(|| manager.get_resources_count().len() == 2).await;
        let mut events = manager.subscribe();

        api.set_ready(false);

        wait_until(|| running_informers(&manager).is_empty()).await;
        assert!(manager.get_resources_count().is_empty());
        assert!(manager.get_active_resources_count().is_empty());
        assert!(!manager.get_contexts_healths()[0].reachable);

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(seen.contains(&ContextsEvent::ResourcesCountUpdated));
        assert!(seen.contains(&ContextsEvent::ResourceUpdated {
            context_name: "kind".to_string(),
            resource: ResourceKind::Pods,
        }));
        manager.dispose();
    }
}
