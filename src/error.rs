use std::time::Duration;

use crate::resources::ResourceKind;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("invalid kubeconfig: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    #[error("failed to build request: {0}")]
    Http(#[from] http::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid settings: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("file watch failed: {0}")]
    Notify(#[from] notify::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("watch failed: {0}")]
    Watch(String),

    /// Raised when permission probing is attempted on a factory that was built
    /// without permission requests. This is a setup bug, never retried.
    #[error("resource factory for {resource} has no permissions")]
    MissingPermissions { resource: ResourceKind },
}

impl Error {
    /// True when the API server answered 404, i.e. the kind is not served.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(response)) if response.code == 404)
    }
}
