// Per-context access to the Kubernetes API
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec,
};
use kube::api::{Api, DynamicObject, ListParams, PostParams, WatchEvent, WatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::Client;

use crate::error::{Error, Result};
use crate::resources::PermissionRequest;

/// Server side watch timeout; the stream ends after it and the informer relists.
const WATCH_TIMEOUT_SECS: u32 = 290;

pub type WatchStream = BoxStream<'static, Result<WatchEvent<DynamicObject>>>;

/// Result of a list call: the items and the collection's resource version.
#[derive(Debug, Clone, Default)]
pub struct ResourceList {
    pub resource_version: Option<String>,
    pub items: Vec<DynamicObject>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessReview {
    pub allowed: bool,
    pub reason: Option<String>,
}

/// What the states core needs from one context's API server.
#[async_trait]
pub trait KubeApi: Send + Sync {
    async fn list(&self, resource: &ApiResource, namespace: Option<&str>) -> Result<ResourceList>;

    async fn watch(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        resource_version: &str,
    ) -> Result<WatchStream>;

    async fn review_access(
        &self,
        request: &PermissionRequest,
        namespace: Option<&str>,
    ) -> Result<AccessReview>;

    async fn readyz(&self) -> Result<()>;
}

/// Builds one [`KubeApi`] per kubeconfig context.
#[async_trait]
pub trait ClientProvider: Send + Sync {
    async fn client(&self, kubeconfig: &Kubeconfig, context_name: &str) -> Result<Arc<dyn KubeApi>>;
}

/// [`KubeApi`] backed by a kube-rs client.
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
}

impl KubeClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(namespace) => Api::namespaced_with(self.client.clone(), namespace, resource),
            None => Api::all_with(self.client.clone(), resource),
        }
    }
}

#[async_trait]
impl KubeApi for KubeClient {
    async fn list(&self, resource: &ApiResource, namespace: Option<&str>) -> Result<ResourceList> {
        let list = self
            .api(resource, namespace)
            .list(&ListParams::default())
            .await?;
        Ok(ResourceList {
            resource_version: list.metadata.resource_version,
            items: list.items,
        })
    }

    async fn watch(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        resource_version: &str,
    ) -> Result<WatchStream> {
        let params = WatchParams::default().timeout(WATCH_TIMEOUT_SECS);
        let stream = self
            .api(resource, namespace)
            .watch(&params, resource_version)
            .await?;
        Ok(stream.map_err(Error::from).boxed())
    }

    async fn review_access(
        &self,
        request: &PermissionRequest,
        namespace: Option<&str>,
    ) -> Result<AccessReview> {
        let review = SelfSubjectAccessReview {
            spec: SelfSubjectAccessReviewSpec {
                resource_attributes: Some(ResourceAttributes {
                    group: Some(request.group.clone()),
                    resource: Some(request.resource.clone()),
                    verb: Some(request.verb.clone()),
                    namespace: namespace.map(str::to_string),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        };

        let api: Api<SelfSubjectAccessReview> = Api::all(self.client.clone());
        let created = api.create(&PostParams::default(), &review).await?;
        let status = created.status.unwrap_or_default();
        Ok(AccessReview {
            allowed: status.allowed,
            reason: status.reason,
        })
    }

    async fn readyz(&self) -> Result<()> {
        let request = http::Request::get("/readyz").body(Vec::new())?;
        self.client.request_text(request).await?;
        Ok(())
    }
}

/// Creates kube-rs clients from the merged kubeconfig.
#[derive(Debug, Clone, Copy, Default)]
pub struct KubeconfigClientProvider;

#[async_trait]
impl ClientProvider for KubeconfigClientProvider {
    async fn client(&self, kubeconfig: &Kubeconfig, context_name: &str) -> Result<Arc<dyn KubeApi>> {
        let options = KubeConfigOptions {
            context: Some(context_name.to_string()),
            ..Default::default()
        };
        let config = kube::Config::from_custom_kubeconfig(kubeconfig.clone(), &options).await?;
        let client = Client::try_from(config)?;
        Ok(Arc::new(KubeClient::new(client)))
    }
}
