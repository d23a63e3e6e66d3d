//! List-then-watch mirror of one resource kind in one context.
//!
//! An informer lists the collection once, publishes it as its baseline, then
//! follows the watch stream from the list's resource version. When the stream
//! ends it relists, right away when the stream was healthy and after a delay
//! when it closed before delivering anything. When it fails it reports itself
//! offline and retries with a bounded exponential backoff until disposed.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use indexmap::IndexMap;
use kube::api::{DynamicObject, WatchEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::client::KubeApi;
use crate::error::{Error, Result};
use crate::models::k8s::InformerInfo;
use crate::resources::ResourceKind;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Unique id for informers and checkers, used to drop signals of disposed ones.
pub(crate) fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffSettings {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
        }
    }
}

/// Doubling delay capped at `max`.
struct Backoff {
    settings: BackoffSettings,
    current: Duration,
}

impl Backoff {
    fn new(settings: BackoffSettings) -> Self {
        Self {
            settings,
            current: settings.initial,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.settings.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.settings.initial;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InformerSignal {
    Updated {
        id: u64,
        context_name: String,
        resource: ResourceKind,
    },
    Offline {
        id: u64,
        context_name: String,
        resource: ResourceKind,
        reason: String,
    },
    Online {
        id: u64,
        context_name: String,
        resource: ResourceKind,
    },
}

/// A watch open at least this long is healthy even if it saw no event.
const HEALTHY_WATCH: Duration = Duration::from_secs(5);

/// Why a list-and-watch round ended without error.
#[derive(Debug, PartialEq, Eq)]
enum WatchEnd {
    /// Healthy stream closed or resource version expired: relist right away.
    Closed,
    /// Stream ended early without delivering anything: relist after a delay.
    Idle,
    /// The API server does not serve this kind.
    Unsupported,
}

#[derive(Debug, Default)]
struct InformerStatus {
    offline: bool,
    relists: u32,
    started_at: Option<DateTime<Utc>>,
    last_update_at: Option<DateTime<Utc>>,
}

pub struct ResourceInformer {
    id: u64,
    context_name: String,
    resource: ResourceKind,
    namespace: Option<String>,
    client: Arc<dyn KubeApi>,
    backoff: BackoffSettings,
    objects: RwLock<IndexMap<String, DynamicObject>>,
    status: Mutex<InformerStatus>,
    started: AtomicBool,
    token: CancellationToken,
}

impl ResourceInformer {
    pub fn new(
        context_name: impl Into<String>,
        resource: ResourceKind,
        namespace: Option<String>,
        client: Arc<dyn KubeApi>,
        backoff: BackoffSettings,
    ) -> Self {
        Self {
            id: next_id(),
            context_name: context_name.into(),
            resource,
            namespace,
            client,
            backoff,
            objects: RwLock::new(IndexMap::new()),
            status: Mutex::new(InformerStatus::default()),
            started: AtomicBool::new(false),
            token: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn context_name(&self) -> &str {
        &self.context_name
    }

    pub fn resource(&self) -> ResourceKind {
        self.resource
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Spawns the list-and-watch task. Starting twice, or after dispose, is a no-op.
    pub fn start(self: &Arc<Self>, signals: mpsc::UnboundedSender<InformerSignal>) {
        if self.is_disposed() || self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.status().started_at = Some(Utc::now());
        log::info!(
            "informer: starting {} in context {} (namespace {:?})",
            self.resource,
            self.context_name,
            self.namespace
        );
        tokio::spawn(Arc::clone(self).run(signals));
    }

    /// Stops the watch; no cache write or signal happens afterwards.
    pub fn dispose(&self) {
        if !self.token.is_cancelled() {
            log::debug!("informer: disposing {} in context {}", self.resource, self.context_name);
        }
        self.token.cancel();
    }

    pub fn is_disposed(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_offline(&self) -> bool {
        self.status().offline
    }

    pub fn objects(&self) -> Vec<DynamicObject> {
        self.read_objects().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read_objects().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count_matching(&self, predicate: impl Fn(&DynamicObject) -> bool) -> usize {
        self.read_objects().values().filter(|o| predicate(o)).count()
    }

    pub fn info(&self) -> InformerInfo {
        let status = self.status();
        InformerInfo {
            context_name: self.context_name.clone(),
            resource_name: self.resource,
            namespace: self.namespace.clone(),
            objects_count: self.len(),
            offline: status.offline,
            relists: status.relists,
            started_at: status.started_at,
            last_update_at: status.last_update_at,
        }
    }

    async fn run(self: Arc<Self>, signals: mpsc::UnboundedSender<InformerSignal>) {
        let mut backoff = Backoff::new(self.backoff);
        loop {
            let outcome = tokio::select! {
                _ = self.token.cancelled() => return,
                outcome = self.list_and_watch(&signals, &mut backoff) => outcome,
            };
            if self.is_disposed() {
                return;
            }
            match outcome {
                Ok(WatchEnd::Closed) => {
                    log::debug!(
                        "informer: {} watch closed in context {}, relisting",
                        self.resource,
                        self.context_name
                    );
                }
                Ok(WatchEnd::Idle) => {
                    let delay = backoff.next_delay();
                    log::debug!(
                        "informer: {} watch in context {} ended early, relisting in {delay:?}",
                        self.resource,
                        self.context_name
                    );
                    tokio::select! {
                        _ = self.token.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Ok(WatchEnd::Unsupported) => {
                    log::info!(
                        "informer: {} not served in context {}, stopping",
                        self.resource,
                        self.context_name
                    );
                    return;
                }
                Err(e) => {
                    self.mark_offline(&signals, e.to_string());
                    let delay = backoff.next_delay();
                    log::warn!(
                        "informer: {} in context {} failed: {e}, retrying in {delay:?}",
                        self.resource,
                        self.context_name
                    );
                    tokio::select! {
                        _ = self.token.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn list_and_watch(
        &self,
        signals: &mpsc::UnboundedSender<InformerSignal>,
        backoff: &mut Backoff,
    ) -> Result<WatchEnd> {
        let api_resource = self.resource.api_resource();
        let namespace = self.namespace.as_deref();

        let list = match self.client.list(&api_resource, namespace).await {
            Ok(list) => list,
            Err(e) if e.is_not_found() => return Ok(WatchEnd::Unsupported),
            Err(e) => return Err(e),
        };
        if self.is_disposed() {
            return Ok(WatchEnd::Closed);
        }
        self.replace_all(list.items);
        self.mark_online(signals);
        self.emit_updated(signals);

        let resource_version = list.resource_version.unwrap_or_else(|| "0".to_string());
        let mut stream = self
            .client
            .watch(&api_resource, namespace, &resource_version)
            .await?;
        let opened = tokio::time::Instant::now();
        let mut delivered = false;
        // the backoff only resets once the watch proves alive
        let end = |delivered: bool, backoff: &mut Backoff| {
            if delivered || opened.elapsed() >= HEALTHY_WATCH {
                backoff.reset();
                WatchEnd::Closed
            } else {
                WatchEnd::Idle
            }
        };

        while let Some(event) = stream.next().await {
            if self.is_disposed() {
                return Ok(WatchEnd::Closed);
            }
            let event = event?;
            if !matches!(event, WatchEvent::Error(_)) {
                delivered = true;
            }
            let changed = match event {
                WatchEvent::Added(object) | WatchEvent::Modified(object) => self.apply(object),
                WatchEvent::Deleted(object) => self.delete(&object),
                WatchEvent::Bookmark(_) => false,
                WatchEvent::Error(response) if response.code == 410 => {
                    log::debug!(
                        "informer: {} resource version expired in context {}",
                        self.resource,
                        self.context_name
                    );
                    return Ok(end(delivered, backoff));
                }
                WatchEvent::Error(response) => return Err(Error::Watch(response.message)),
            };
            if changed {
                self.emit_updated(signals);
            }
        }
        Ok(end(delivered, backoff))
    }

    fn replace_all(&self, items: Vec<DynamicObject>) {
        let objects = items
            .into_iter()
            .map(|object| (object_key(&object), object))
            .collect();
        *self.write_objects() = objects;
        let mut status = self.status();
        if status.last_update_at.is_some() {
            status.relists += 1;
        }
        status.last_update_at = Some(Utc::now());
    }

    /// Inserts or replaces; returns false for a duplicate resource version.
    fn apply(&self, object: DynamicObject) -> bool {
        let key = object_key(&object);
        let mut objects = self.write_objects();
        if let Some(existing) = objects.get(&key) {
            if existing.metadata.resource_version.is_some()
                && existing.metadata.resource_version == object.metadata.resource_version
            {
                return false;
            }
        }
        objects.insert(key, object);
        drop(objects);
        self.status().last_update_at = Some(Utc::now());
        true
    }

    fn delete(&self, object: &DynamicObject) -> bool {
        let removed = self
            .write_objects()
            .shift_remove(&object_key(object))
            .is_some();
        if removed {
            self.status().last_update_at = Some(Utc::now());
        }
        removed
    }

    fn mark_offline(&self, signals: &mpsc::UnboundedSender<InformerSignal>, reason: String) {
        let was_offline = std::mem::replace(&mut self.status().offline, true);
        if !was_offline {
            let _ = signals.send(InformerSignal::Offline {
                id: self.id,
                context_name: self.context_name.clone(),
                resource: self.resource,
                reason,
            });
        }
    }

    fn mark_online(&self, signals: &mpsc::UnboundedSender<InformerSignal>) {
        let was_offline = std::mem::replace(&mut self.status().offline, false);
        if was_offline {
            let _ = signals.send(InformerSignal::Online {
                id: self.id,
                context_name: self.context_name.clone(),
                resource: self.resource,
            });
        }
    }

    fn emit_updated(&self, signals: &mpsc::UnboundedSender<InformerSignal>) {
        let _ = signals.send(InformerSignal::Updated {
            id: self.id,
            context_name: self.context_name.clone(),
            resource: self.resource,
        });
    }

    fn read_objects(&self) -> std::sync::RwLockReadGuard<'_, IndexMap<String, DynamicObject>> {
        self.objects.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_objects(&self) -> std::sync::RwLockWriteGuard<'_, IndexMap<String, DynamicObject>> {
        self.objects.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn status(&self) -> std::sync::MutexGuard<'_, InformerStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn object_key(object: &DynamicObject) -> String {
    format!(
        "{}/{}",
        object.metadata.namespace.as_deref().unwrap_or_default(),
        object.metadata.name.as_deref().unwrap_or_default()
    )
}
