//! Tauri glue: the commands the UI invokes and the plugin wiring the states
//! core into an application.

use std::sync::{Arc, Mutex};

use tauri::plugin::{Builder, TauriPlugin};
use tauri::{AppHandle, Emitter, Manager, Runtime};

use crate::client::KubeconfigClientProvider;
use crate::config::{Settings, SettingsStore};
use crate::dispatcher::{ContextsStatesDispatcher, EventSender, UiChannel};
use crate::kubeconfig::{KubeconfigSource, KubeconfigWatcher};
use crate::manager::ContextsManager;
use crate::resources::definitions::default_factories;

pub mod contexts;

impl<R: Runtime> EventSender for AppHandle<R> {
    fn send(&self, channel: UiChannel) {
        if let Err(e) = self.emit(channel.name(), ()) {
            log::warn!("dispatcher: cannot emit {}: {e}", channel.name());
        }
    }
}

/// Plugin managing a [`ContextsManager`] and its dispatcher, fed from the
/// environment's kubeconfig. Debug builds also get the log plugin.
pub fn init<R: Runtime>() -> TauriPlugin<R> {
    Builder::new("kube-contexts-states")
        .invoke_handler(tauri::generate_handler![
            contexts::get_kubeconfig_contexts,
            contexts::set_active_context,
            contexts::get_contexts_healths,
            contexts::get_contexts_permissions,
            contexts::get_resources_count,
            contexts::get_active_resources_count,
            contexts::get_resources,
            contexts::get_troubleshooting_information,
            contexts::is_resource_permitted,
            contexts::set_states_experimental,
        ])
        .setup(|app, _api| {
            if cfg!(debug_assertions) {
                app.plugin(
                    tauri_plugin_log::Builder::default()
                        .level(log::LevelFilter::Info)
                        .build(),
                )?;
            }

            let settings = match Settings::default_path() {
                Some(path) => Settings::load(&path)?,
                None => Settings::default(),
            };

            let handle = app.clone();
            let (manager, dispatcher, watcher) = tauri::async_runtime::block_on(async move {
                let manager = ContextsManager::new(
                    SettingsStore::new(settings),
                    Arc::new(KubeconfigClientProvider),
                    default_factories(),
                );
                let dispatcher = ContextsStatesDispatcher::new(manager.clone(), Arc::new(handle));
                dispatcher.init();

                let source = KubeconfigSource::from_env();
                if let Some(kubeconfig) = source.as_ref().and_then(KubeconfigSource::load) {
                    manager.update(&kubeconfig).await;
                }
                let watcher = match source {
                    Some(source) => match KubeconfigWatcher::start(manager.clone(), source) {
                        Ok(watcher) => Some(watcher),
                        Err(e) => {
                            log::warn!("kubeconfig: cannot watch for changes: {e}");
                            None
                        }
                    },
                    None => None,
                };
                (manager, dispatcher, watcher)
            });

            app.manage(manager);
            app.manage(dispatcher);
            // the watcher lives as long as the app
            app.manage(Mutex::new(watcher));
            Ok(())
        })
        .build()
}
