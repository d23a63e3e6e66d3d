use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::Result;
use crate::informer::BackoffSettings;

/// User settings read by the states core.
///
/// Keys are the dotted names used in the desktop settings file; durations are
/// in milliseconds. Unknown keys are ignored so the core can read a settings
/// file shared with the rest of the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Gates permission based filtering. When off, every resource is
    /// reported as permitted.
    #[serde(rename = "kubernetes.statesExperimental")]
    pub states_experimental: bool,

    #[serde(rename = "kubernetes.healthCheckTimeout")]
    pub health_check_timeout_ms: u64,

    #[serde(rename = "kubernetes.healthCheckInterval")]
    pub health_check_interval_ms: u64,

    #[serde(rename = "kubernetes.watchBackoffInitial")]
    pub watch_backoff_initial_ms: u64,

    #[serde(rename = "kubernetes.watchBackoffMax")]
    pub watch_backoff_max_ms: u64,

    #[serde(rename = "kubernetes.kubeconfigDebounce")]
    pub kubeconfig_debounce_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            states_experimental: true,
            health_check_timeout_ms: 5_000,
            health_check_interval_ms: 30_000,
            watch_backoff_initial_ms: 1_000,
            watch_backoff_max_ms: 60_000,
            kubeconfig_debounce_ms: 500,
        }
    }
}

impl Settings {
    /// Default settings file: `<config dir>/kube-contexts-states/settings.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("kube-contexts-states").join("settings.json"))
    }

    /// Reads settings from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Settings> {
        if !path.exists() {
            log::info!("settings: {} not found, using defaults", path.display());
            return Ok(Settings::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let settings = serde_json::from_str(&raw)?;
        log::info!("settings: loaded {}", path.display());
        Ok(settings)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn kubeconfig_debounce(&self) -> Duration {
        Duration::from_millis(self.kubeconfig_debounce_ms)
    }

    pub fn watch_backoff(&self) -> BackoffSettings {
        BackoffSettings {
            initial: Duration::from_millis(self.watch_backoff_initial_ms),
            max: Duration::from_millis(self.watch_backoff_max_ms.max(self.watch_backoff_initial_ms)),
        }
    }
}

/// Shared, observable settings value.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    sender: watch::Sender<Settings>,
}

impl SettingsStore {
    pub fn new(settings: Settings) -> Self {
        let (sender, _) = watch::channel(settings);
        Self { sender }
    }

    pub fn get(&self) -> Settings {
        self.sender.borrow().clone()
    }

    pub fn states_experimental(&self) -> bool {
        self.sender.borrow().states_experimental
    }

    pub fn set_states_experimental(&self, enabled: bool) {
        self.update(|settings| settings.states_experimental = enabled);
    }

    /// Applies `change` and notifies subscribers when the value changed.
    pub fn update(&self, change: impl FnOnce(&mut Settings)) {
        self.sender.send_if_modified(|settings| {
            let before = settings.clone();
            change(settings);
            *settings != before
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.sender.subscribe()
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}
