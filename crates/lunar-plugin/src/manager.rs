//! Plugin provider: scans the plugin directories and owns the loaders.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use indexmap::IndexMap;
use lunar_core::Settings;

use crate::config::BridgeConfig;
use crate::environment::RuntimeEnvironment;
use crate::loader::PluginLoader;
use crate::types::{PluginError, PluginResult};

/// Discovers Lua plugins and manages their loaders.
pub struct PluginManager {
    env: Arc<RuntimeEnvironment>,
    loaders: IndexMap<PathBuf, PluginLoader>,
}

impl PluginManager {
    /// Start the runtime environment and scan the plugin directories.
    pub async fn initialize(config: BridgeConfig, settings: Arc<dyn Settings>) -> PluginResult<Self> {
        let env = tokio::task::spawn_blocking(move || RuntimeEnvironment::new(config, settings))
            .await
            .map_err(|e| PluginError::ConfigError {
                message: format!("runtime setup task failed: {e}"),
            })??;

        let mut manager = Self {
            env: Arc::new(env),
            loaders: IndexMap::new(),
        };
        manager.rescan().await?;
        Ok(manager)
    }

    pub fn environment(&self) -> &Arc<RuntimeEnvironment> {
        &self.env
    }

    /// Rediscover all candidates. Previous loaders are dropped, which
    /// unloads them.
    ///
    /// Directory reads and manifest parsing run on the blocking pool.
    pub async fn rescan(&mut self) -> PluginResult<()> {
        let start = Instant::now();
        let env = Arc::clone(&self.env);
        let loaders = tokio::task::spawn_blocking(move || scan(&env))
            .await
            .map_err(|e| PluginError::ConfigError {
                message: format!("plugin scan task failed: {e}"),
            })?;

        self.loaders = loaders;
        tracing::info!(
            "Scanning plugins: {} ms, {} found",
            start.elapsed().as_millis(),
            self.loaders.len()
        );
        Ok(())
    }

    /// All known loaders in discovery order.
    pub fn plugins(&self) -> impl Iterator<Item = &PluginLoader> {
        self.loaders.values()
    }

    pub fn get(&self, id: &str) -> Option<&PluginLoader> {
        self.loaders.values().find(|l| l.id() == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut PluginLoader> {
        self.loaders.values_mut().find(|l| l.id() == id)
    }

    /// Load every validated, enabled plugin that is not loaded yet,
    /// concurrently.
    ///
    /// Failures are logged and leave the affected loader in
    /// [`LoadFailed`](crate::LoaderState::LoadFailed). Returns the number of
    /// loaded plugins.
    pub async fn load_all(&mut self) -> usize {
        let config = self.env.config().clone();
        let pending = self
            .loaders
            .values_mut()
            .filter(|l| l.state().is_loadable() && !l.is_loaded() && !config.is_disabled(l.id()))
            .map(|l| l.load());

        join_all(pending).await.iter().filter(|r| r.is_ok()).count()
    }

    pub fn unload_all(&mut self) {
        for loader in self.loaders.values_mut() {
            loader.unload();
        }
    }
}

impl Drop for PluginManager {
    fn drop(&mut self) {
        self.unload_all();
    }
}

fn scan(env: &Arc<RuntimeEnvironment>) -> IndexMap<PathBuf, PluginLoader> {
    let mut loaders = IndexMap::new();
    for dir in env.config().plugin_dirs() {
        for path in candidates(&dir) {
            if loaders.contains_key(&path) {
                continue;
            }
            match PluginLoader::discover(&path, Arc::clone(env)) {
                Ok(loader) => insert(&mut loaders, path, loader),
                Err(e) if e.is_soft_skip() => {
                    tracing::debug!("Skipping {}: {e}", path.display());
                }
                Err(e) => tracing::warn!("Failed to read {}: {e}", path.display()),
            }
        }
    }
    loaders
}

fn insert(loaders: &mut IndexMap<PathBuf, PluginLoader>, path: PathBuf, loader: PluginLoader) {
    if let Some(existing) = loaders.values().find(|l| l.id() == loader.id()) {
        tracing::warn!(
            "Duplicate plugin id '{}' at {}, already provided by {}",
            loader.id(),
            path.display(),
            existing.path().display()
        );
        return;
    }
    loaders.insert(path, loader);
}

/// Directory entries of `dir`, sorted by name. A missing directory yields
/// nothing.
fn candidates(dir: &Path) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!("Plugin directory {} not readable: {e}", dir.display());
            return Vec::new();
        }
    };
    let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
    paths.sort();
    paths
}
