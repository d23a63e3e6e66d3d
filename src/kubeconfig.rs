use std::collections::HashMap;
use std::path::{Path, PathBuf};

use kube::config::Kubeconfig;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::manager::ContextsManager;
use crate::models::k8s::KubeContext;

/// Where kubeconfig files come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KubeconfigSource {
    /// Files listed in `KUBECONFIG`, merged in order.
    Files(Vec<PathBuf>),
    /// Every regular, non-hidden file of a directory, usually `~/.kube`.
    Directory(PathBuf),
}

impl KubeconfigSource {
    /// `KUBECONFIG` when set (`:` separated on Unix, `;` on Windows),
    /// otherwise `~/.kube`.
    pub fn from_env() -> Option<Self> {
        let sep = if cfg!(windows) { ';' } else { ':' };
        let env = std::env::var("KUBECONFIG").unwrap_or_default();
        log::info!("kubeconfig: KUBECONFIG env = {env:?}");

        let files: Vec<PathBuf> = env
            .split(sep)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect();
        if !files.is_empty() {
            return Some(KubeconfigSource::from_files(files));
        }
        match dirs::home_dir() {
            Some(home) => Some(KubeconfigSource::Directory(resolve(home.join(".kube")))),
            None => {
                log::warn!("kubeconfig: cannot determine home directory");
                None
            }
        }
    }

    /// File list with every entry resolved to the absolute, symlink-free
    /// path the file watcher reports.
    pub fn from_files(files: impl IntoIterator<Item = PathBuf>) -> Self {
        KubeconfigSource::Files(files.into_iter().map(resolve).collect())
    }

    pub fn load(&self) -> Option<Kubeconfig> {
        let merged = match self {
            KubeconfigSource::Files(files) => load_from_paths(files),
            KubeconfigSource::Directory(dir) => {
                let candidates = scan_kube_dir(dir);
                log::info!(
                    "kubeconfig: {} candidate file(s) in {}",
                    candidates.len(),
                    dir.display()
                );
                load_from_paths(&candidates)
            }
        };
        match &merged {
            Some(cfg) => log::info!("kubeconfig: {} total context(s) after merge", cfg.contexts.len()),
            None => log::warn!("kubeconfig: no valid kubeconfig found in {self:?}"),
        }
        merged
    }

    /// File written by [`set_current_context`]: the first listed file, or
    /// `config` in the directory.
    pub fn primary_path(&self) -> Option<PathBuf> {
        match self {
            KubeconfigSource::Files(files) => files.first().cloned(),
            KubeconfigSource::Directory(dir) => Some(dir.join("config")),
        }
    }

    /// Directories handed to the file watcher. Editors often replace files
    /// instead of writing them, so parents are watched rather than files.
    fn watch_targets(&self) -> Vec<PathBuf> {
        let mut targets: Vec<PathBuf> = match self {
            KubeconfigSource::Files(files) => files
                .iter()
                .filter_map(|file| file.parent().map(Path::to_path_buf))
                .collect(),
            KubeconfigSource::Directory(dir) => vec![dir.clone()],
        };
        targets.sort();
        targets.dedup();
        targets
    }

    fn is_relevant(&self, path: &Path) -> bool {
        match self {
            KubeconfigSource::Files(files) => files.iter().any(|file| file == path),
            KubeconfigSource::Directory(dir) => {
                path.parent() == Some(dir.as_path())
                    && !path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or(".")
                        .starts_with('.')
            }
        }
    }
}

/// Canonical form of `path`. A missing file resolves through its directory
/// so it still matches once created.
fn resolve(path: PathBuf) -> PathBuf {
    if let Ok(real) = std::fs::canonicalize(&path) {
        return real;
    }
    let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
        return path;
    };
    let parent = if parent.as_os_str().is_empty() { Path::new(".") } else { parent };
    match std::fs::canonicalize(parent) {
        Ok(dir) => dir.join(name),
        Err(_) => path,
    }
}

/// Loads the merged kubeconfig of the environment, `None` when nothing valid
/// is found.
pub fn load_kubeconfig() -> Option<Kubeconfig> {
    KubeconfigSource::from_env()?.load()
}

/// Merges `extra` into `base`. `base.current_context` wins; `extra`'s is
/// used only if base has none.
fn merge_kubeconfig(mut base: Kubeconfig, extra: Kubeconfig) -> Kubeconfig {
    base.clusters.extend(extra.clusters);
    base.auth_infos.extend(extra.auth_infos);
    base.contexts.extend(extra.contexts);
    if base.current_context.is_none() {
        base.current_context = extra.current_context;
    }
    base
}

/// Regular, non-hidden files in `dir`, sorted.
fn scan_kube_dir(dir: &Path) -> Vec<PathBuf> {
    let mut paths = Vec::new();

    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            log::warn!("kubeconfig: cannot read directory {}: {e}", dir.display());
            return paths;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();

        // cache/, http-cache/
        if path.is_dir() {
            continue;
        }

        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if name.starts_with('.') {
            continue;
        }

        paths.push(path);
    }

    paths.sort();
    paths
}

/// Parses every path that exists and merges the ones that are kubeconfigs.
fn load_from_paths(paths: &[PathBuf]) -> Option<Kubeconfig> {
    let mut merged: Option<Kubeconfig> = None;

    for path in paths {
        if !path.exists() {
            log::info!("kubeconfig: skip (not found) {}", path.display());
            continue;
        }

        match Kubeconfig::read_from(path) {
            Ok(cfg) => {
                log::info!(
                    "kubeconfig: ok ({} context(s)) {}",
                    cfg.contexts.len(),
                    path.display()
                );
                merged = Some(match merged.take() {
                    None => cfg,
                    Some(base) => merge_kubeconfig(base, cfg),
                });
            }
            Err(e) => {
                // expected when scanning every file of ~/.kube
                log::info!("kubeconfig: skip (parse error: {e}) {}", path.display());
            }
        }
    }

    merged
}

/// Contexts of `kubeconfig`, with the server URL of their cluster resolved.
pub fn contexts(kubeconfig: &Kubeconfig) -> Vec<KubeContext> {
    let current = kubeconfig.current_context.clone().unwrap_or_default();

    let cluster_servers: HashMap<&str, &str> = kubeconfig
        .clusters
        .iter()
        .filter_map(|nc| {
            let server = nc.cluster.as_ref()?.server.as_deref()?;
            Some((nc.name.as_str(), server))
        })
        .collect();

    kubeconfig
        .contexts
        .iter()
        .filter_map(|named| {
            let ctx = named.context.as_ref()?;
            Some(KubeContext {
                name: named.name.clone(),
                cluster: ctx.cluster.clone(),
                user: ctx.user.clone().unwrap_or_default(),
                namespace: ctx.namespace.clone(),
                is_active: named.name == current,
                server_url: cluster_servers.get(ctx.cluster.as_str()).map(|s| s.to_string()),
            })
        })
        .collect()
}

/// Rewrites `current-context` of the kubeconfig at `path`, keeping every
/// other field as it is.
pub fn set_current_context(path: &Path, context_name: &str) -> Result<()> {
    let raw = std::fs::read_to_string(path)?;
    let mut doc: serde_yaml::Value = serde_yaml::from_str(&raw)?;
    doc["current-context"] = serde_yaml::Value::String(context_name.to_string());
    std::fs::write(path, serde_yaml::to_string(&doc)?)?;
    log::info!("kubeconfig: current context set to {context_name} in {}", path.display());
    Ok(())
}

/// Reloads the kubeconfig into a [`ContextsManager`] whenever its files
/// change. Bursts of file events are coalesced over the configured debounce.
pub struct KubeconfigWatcher {
    _watcher: RecommendedWatcher,
    token: CancellationToken,
}

impl KubeconfigWatcher {
    pub fn start(manager: ContextsManager, source: KubeconfigSource) -> Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            let _ = tx.send(event);
        })?;
        for target in source.watch_targets() {
            if target.is_dir() {
                watcher.watch(&target, RecursiveMode::NonRecursive)?;
                log::info!("kubeconfig: watching {}", target.display());
            } else {
                log::warn!("kubeconfig: cannot watch missing directory {}", target.display());
            }
        }

        let debounce = manager.settings().get().kubeconfig_debounce();
        let token = CancellationToken::new();
        let cancelled = token.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancelled.cancelled() => return,
                    event = rx.recv() => event,
                };
                match event {
                    Some(Ok(event)) if is_change(&event) && event.paths.iter().any(|p| source.is_relevant(p)) => {}
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        log::warn!("kubeconfig: watch error: {e}");
                        continue;
                    }
                    None => return,
                }

                let quiet = tokio::time::sleep(debounce);
                tokio::pin!(quiet);
                loop {
                    tokio::select! {
                        _ = cancelled.cancelled() => return,
                        _ = &mut quiet => break,
                        Some(_) = rx.recv() => {}
                    }
                }
                if cancelled.is_cancelled() {
                    return;
                }

                log::info!("kubeconfig: change detected, reloading");
                let kubeconfig = source.load().unwrap_or_default();
                manager.update(&kubeconfig).await;
            }
        });

        Ok(Self {
            _watcher: watcher,
            token,
        })
    }

    pub fn dispose(&self) {
        self.token.cancel();
    }
}

impl Drop for KubeconfigWatcher {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

fn is_change(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}
