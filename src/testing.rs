// Scripted Kubernetes API used by unit tests
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::StreamExt;
use kube::api::{DynamicObject, WatchEvent};
use kube::config::Kubeconfig;
use kube::core::ErrorResponse;
use kube::discovery::ApiResource;

use crate::client::{AccessReview, ClientProvider, KubeApi, ResourceList, WatchStream};
use crate::error::{Error, Result};
use crate::resources::{PermissionRequest, ResourceKind};

type WatchSender = UnboundedSender<Result<WatchEvent<DynamicObject>>>;

#[derive(Default)]
pub(crate) struct FakeApi {
    lists: Mutex<HashMap<String, VecDeque<Result<ResourceList>>>>,
    list_calls: Mutex<HashMap<String, usize>>,
    watches: Mutex<HashMap<String, Vec<WatchSender>>>,
    watch_versions: Mutex<HashMap<String, String>>,
    denied: Mutex<HashSet<PermissionRequest>>,
    reviews: Mutex<Vec<PermissionRequest>>,
    unready: AtomicBool,
    closing_watches: AtomicBool,
}

impl FakeApi {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn not_found() -> Error {
        Error::Kube(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "the server could not find the requested resource".to_string(),
            reason: "NotFound".to_string(),
            code: 404,
        }))
    }

    /// Queues the result of the next list call; once drained, lists are empty.
    pub(crate) fn push_list(&self, kind: ResourceKind, result: Result<ResourceList>) {
        self.lists
            .lock()
            .unwrap()
            .entry(kind.plural().to_string())
            .or_default()
            .push_back(result);
    }

    /// Sends an event on the most recent watch stream of `kind`.
    pub(crate) fn send(&self, kind: ResourceKind, event: Result<WatchEvent<DynamicObject>>) {
        let watches = self.watches.lock().unwrap();
        let sender = watches
            .get(kind.plural())
            .and_then(|senders| senders.last())
            .expect("no watch opened");
        sender.unbounded_send(event).unwrap();
    }

    pub(crate) fn deny(&self, request: PermissionRequest) {
        self.denied.lock().unwrap().insert(request);
    }

    pub(crate) fn set_ready(&self, ready: bool) {
        self.unready.store(!ready, Ordering::SeqCst);
    }

    /// Makes every later watch stream end right after it opens.
    pub(crate) fn close_watches(&self) {
        self.closing_watches.store(true, Ordering::SeqCst);
    }

    pub(crate) fn list_count(&self, kind: ResourceKind) -> usize {
        self.list_calls
            .lock()
            .unwrap()
            .get(kind.plural())
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn watch_count(&self, kind: ResourceKind) -> usize {
        self.watches
            .lock()
            .unwrap()
            .get(kind.plural())
            .map_or(0, Vec::len)
    }

    pub(crate) fn last_watch_version(&self, kind: ResourceKind) -> Option<String> {
        self.watch_versions.lock().unwrap().get(kind.plural()).cloned()
    }

    pub(crate) fn reviews(&self) -> Vec<PermissionRequest> {
        self.reviews.lock().unwrap().clone()
    }
}

#[async_trait]
impl KubeApi for FakeApi {
    async fn list(&self, resource: &ApiResource, _namespace: Option<&str>) -> Result<ResourceList> {
        *self
            .list_calls
            .lock()
            .unwrap()
            .entry(resource.plural.clone())
            .or_default() += 1;
        self.lists
            .lock()
            .unwrap()
            .get_mut(&resource.plural)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(ResourceList::default()))
    }

    async fn watch(
        &self,
        resource: &ApiResource,
        _namespace: Option<&str>,
        resource_version: &str,
    ) -> Result<WatchStream> {
        let (sender, receiver) = unbounded();
        self.watches
            .lock()
            .unwrap()
            .entry(resource.plural.clone())
            .or_default()
            .push(sender);
        self.watch_versions
            .lock()
            .unwrap()
            .insert(resource.plural.clone(), resource_version.to_string());
        if self.closing_watches.load(Ordering::SeqCst) {
            return Ok(futures::stream::empty().boxed());
        }
        Ok(receiver.boxed())
    }

    async fn review_access(
        &self,
        request: &PermissionRequest,
        _namespace: Option<&str>,
    ) -> Result<AccessReview> {
        self.reviews.lock().unwrap().push(request.clone());
        let denied = self.denied.lock().unwrap().contains(request);
        Ok(AccessReview {
            allowed: !denied,
            reason: denied.then(|| format!("cannot {} {}", request.verb, request.resource)),
        })
    }

    async fn readyz(&self) -> Result<()> {
        if self.unready.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }
        Ok(())
    }
}

/// Hands out one [`FakeApi`] per context name, created on first use.
#[derive(Default)]
pub(crate) struct FakeProvider {
    apis: Mutex<HashMap<String, Arc<FakeApi>>>,
}

impl FakeProvider {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn api(&self, context_name: &str) -> Arc<FakeApi> {
        self.apis
            .lock()
            .unwrap()
            .entry(context_name.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl ClientProvider for FakeProvider {
    async fn client(&self, _kubeconfig: &Kubeconfig, context_name: &str) -> Result<Arc<dyn KubeApi>> {
        Ok(self.api(context_name))
    }
}

pub(crate) fn object(kind: ResourceKind, name: &str, resource_version: &str) -> DynamicObject {
    let mut object = DynamicObject::new(name, &kind.api_resource()).within("default");
    object.metadata.resource_version = Some(resource_version.to_string());
    object
}

pub(crate) fn kubeconfig(contexts: &[&str]) -> Kubeconfig {
    let mut yaml = String::from("apiVersion: v1\nkind: Config\nclusters:\n");
    for name in contexts {
        yaml.push_str(&format!(
            "- name: {name}\n  cluster:\n    server: https://{name}.example:6443\n"
        ));
    }
    yaml.push_str("users:\n- name: admin\n  user:\n    token: secret\ncontexts:\n");
    for name in contexts {
        yaml.push_str(&format!(
            "- name: {name}\n  context:\n    cluster: {name}\n    user: admin\n"
        ));
    }
    if let Some(first) = contexts.first() {
        yaml.push_str(&format!("current-context: {first}\n"));
    }
    Kubeconfig::from_yaml(&yaml).unwrap()
}

/// Polls `condition` until it holds, failing the test after a few seconds.
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
