//! Multi-context Kubernetes state aggregation.
//!
//! A [`ContextsManager`] follows every context of the kubeconfig: it probes
//! reachability, reviews which resource kinds the user may watch, and keeps
//! informers with per-kind counts. A [`ContextsStatesDispatcher`] turns its
//! events into payload-free UI signals. With the `tauri` feature,
//! [`commands::init`] wires both into a Tauri application.

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod informer;
pub mod kubeconfig;
pub mod listen;
pub mod manager;
pub mod models;
pub mod permissions;
pub mod registry;
pub mod resources;

#[cfg(feature = "tauri")]
pub mod commands;

#[cfg(test)]
mod testing;

pub use client::{ClientProvider, KubeApi, KubeClient, KubeconfigClientProvider};
pub use config::{Settings, SettingsStore};
pub use dispatcher::{ContextsStatesDispatcher, EventSender, UiChannel};
pub use error::{Error, Result};
pub use kubeconfig::{KubeconfigSource, KubeconfigWatcher};
pub use listen::{is_resource_permitted, listen_resource_permitted, PermissionListener};
pub use manager::{ContextsEvent, ContextsManager};
pub use registry::ContextResourceRegistry;
pub use resources::{ResourceFactory, ResourceKind};
