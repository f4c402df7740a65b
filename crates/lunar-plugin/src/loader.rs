//! Per-candidate loader state machine.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lunar_core::PluginInstance;
use mlua::Table;
use tokio::sync::watch;

use crate::environment::RuntimeEnvironment;
use crate::gate;
use crate::lua::{Foreign, PluginContext, PluginInstanceTrampoline};
use crate::manifest::Manifest;
use crate::types::{PluginError, PluginResult};

/// Scheme prefix of plugin ids.
pub const ID_SCHEME: &str = "lua";

/// Source file marking a directory as a package plugin.
pub const PACKAGE_INIT: &str = "init.lua";

/// Lifecycle state of a [`PluginLoader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderState {
    Discovered,
    Validated,
    /// Terminal: the manifest failed the interface version gate.
    Rejected { reasons: String },
    Loading,
    Loaded,
    LoadFailed { message: String },
    Unloaded,
}

impl LoaderState {
    pub fn is_loadable(&self) -> bool {
        !matches!(self, Self::Discovered | Self::Rejected { .. })
    }
}

/// Resolve `path` to `(id, source file)` if it is a plugin candidate: a
/// `.lua` file, or a directory containing `init.lua`.
pub fn resolve_candidate(path: &Path) -> PluginResult<(String, PathBuf)> {
    let not_a_plugin = || PluginError::NotAPlugin {
        path: path.to_path_buf(),
    };

    let (module, source) = if path.is_dir() {
        let init = path.join(PACKAGE_INIT);
        if !init.is_file() {
            return Err(not_a_plugin());
        }
        (path.file_name(), init)
    } else if path.extension().is_some_and(|ext| ext == "lua") {
        (path.file_stem(), path.to_path_buf())
    } else {
        return Err(not_a_plugin());
    };

    let module = module
        .and_then(|m| m.to_str())
        .filter(|m| !m.is_empty() && !m.starts_with('.'))
        .ok_or_else(not_a_plugin)?;

    Ok((format!("{ID_SCHEME}.{module}"), source))
}

/// The Lua handles of a loaded plugin.
struct Loaded {
    module: Foreign<Table>,
    instance: Foreign<Table>,
}

/// Loader of one discovered plugin candidate.
pub struct PluginLoader {
    path: PathBuf,
    source: PathBuf,
    manifest: Manifest,
    env: Arc<RuntimeEnvironment>,
    state: watch::Sender<LoaderState>,
    loaded: Option<Loaded>,
}

impl PluginLoader {
    /// Discover and validate the candidate at `path`. Nothing is executed.
    ///
    /// A rejected manifest still yields a loader, in state
    /// [`LoaderState::Rejected`].
    pub fn discover(path: &Path, env: Arc<RuntimeEnvironment>) -> PluginResult<Self> {
        let (id, source) = resolve_candidate(path)?;
        let text = std::fs::read_to_string(&source)?;
        let manifest = Manifest::extract(&id, &text, &source)?;
        let (state, _) = watch::channel(LoaderState::Discovered);

        let loader = Self {
            path: path.to_path_buf(),
            source,
            manifest,
            env,
            state,
            loaded: None,
        };

        match gate::validate(&loader.manifest) {
            Ok(()) => loader.set_state(LoaderState::Validated),
            Err(PluginError::InvalidManifest { reasons, .. }) => {
                tracing::warn!(plugin = %id, "Rejected: {reasons}");
                loader.set_state(LoaderState::Rejected { reasons });
            }
            Err(e) => return Err(e),
        }

        Ok(loader)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn state(&self) -> LoaderState {
        self.state.borrow().clone()
    }

    /// Observe state changes, e.g. to learn when a load completes.
    pub fn subscribe(&self) -> watch::Receiver<LoaderState> {
        self.state.subscribe()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    fn set_state(&self, state: LoaderState) {
        self.state.send_replace(state);
    }

    /// Load the plugin: check dependencies, execute the module and
    /// instantiate its entry class. Returns the time it took.
    ///
    /// Any failure leaves the loader fully unloaded.
    pub async fn load(&mut self) -> PluginResult<Duration> {
        if self.loaded.is_some() {
            return Ok(Duration::ZERO);
        }
        if let LoaderState::Rejected { reasons } = self.state() {
            return Err(PluginError::InvalidManifest {
                id: self.id().to_string(),
                reasons,
            });
        }

        self.set_state(LoaderState::Loading);
        let start = Instant::now();

        match self.try_load().await {
            Ok(loaded) => {
                self.loaded = Some(loaded);
                self.set_state(LoaderState::Loaded);
                let elapsed = start.elapsed();
                tracing::info!(plugin = %self.id(), "Loading: {} ms", elapsed.as_millis());
                Ok(elapsed)
            }
            Err(e) => {
                tracing::warn!(plugin = %self.id(), "Load failed: {e}");
                if let Err(e) = self.env.interpreter().collect_garbage() {
                    tracing::warn!(
                        plugin = %self.id(),
                        "Garbage collection after failed load failed: {e}"
                    );
                }
                self.set_state(LoaderState::LoadFailed {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn try_load(&self) -> PluginResult<Loaded> {
        for binary in &self.manifest.bin_dependencies {
            which::which(binary).map_err(|_| PluginError::MissingBinaryDependency {
                binary: binary.clone(),
            })?;
        }

        let packages = &self.manifest.lib_dependencies;
        if !packages.is_empty() {
            let present = self.env.check_packages(packages).await.map_err(|e| {
                PluginError::DependencyInstall {
                    packages: packages.clone(),
                    message: e.to_string(),
                }
            })?;
            if !present {
                self.env.install_packages(packages).await?;
            }
        }

        let env = Arc::clone(&self.env);
        let id = self.id().to_string();
        let source = self.source.clone();
        let config = env.config();
        let context = PluginContext {
            id: id.clone(),
            name: self.manifest.name.clone(),
            description: self.manifest.description.clone(),
            cache_dir: config.plugin_cache_dir(&id),
            config_dir: config.plugin_config_dir(&id),
            data_dir: config.plugin_data_dir(&id),
            settings: env.settings(),
        };

        tokio::task::spawn_blocking(move || {
            let interpreter = env.interpreter();
            let module = interpreter.load_module(&id, &source)?;
            match interpreter.instantiate(&id, &module, context) {
                Ok(instance) => Ok(Loaded { module, instance }),
                Err(e) => {
                    interpreter.unload_module(&id, module, None);
                    Err(e)
                }
            }
        })
        .await
        .map_err(|e| PluginError::ExecutionError {
            id: self.id().to_string(),
            message: format!("loader task failed: {e}"),
        })?
    }

    /// Release the instance and the module. Idempotent.
    pub fn unload(&mut self) {
        if let Some(Loaded { module, instance }) = self.loaded.take() {
            self.env
                .interpreter()
                .unload_module(self.id(), module, Some(instance));
            self.set_state(LoaderState::Unloaded);
            tracing::debug!(plugin = %self.id(), "Unloaded");
        }
    }

    /// The host adapter of the loaded plugin instance.
    pub fn instance(&self) -> PluginResult<Arc<dyn PluginInstance>> {
        let loaded = self.loaded.as_ref().ok_or_else(|| PluginError::NotLoaded {
            id: self.id().to_string(),
        })?;
        let interpreter = self.env.interpreter();
        let _guard = interpreter.lock();
        let trampoline = PluginInstanceTrampoline::new(interpreter, self.id(), &loaded.instance)
            .map_err(|e| PluginError::execution(self.id(), e))?;
        Ok(Arc::new(trampoline))
    }
}

impl Drop for PluginLoader {
    fn drop(&mut self) {
        self.unload();
    }
}

impl std::fmt::Debug for PluginLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginLoader")
            .field("path", &self.path)
            .field("id", &self.manifest.id)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_candidate() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("clock.lua");
        std::fs::write(&file, "").unwrap();
        let package = dir.path().join("units");
        std::fs::create_dir(&package).unwrap();
        std::fs::write(package.join(PACKAGE_INIT), "").unwrap();
        let empty = dir.path().join("empty");
        std::fs::create_dir(&empty).unwrap();
        let readme = dir.path().join("README.md");
        std::fs::write(&readme, "").unwrap();

        assert_eq!(resolve_candidate(&file).unwrap(), ("lua.clock".to_string(), file));
        assert_eq!(
            resolve_candidate(&package).unwrap(),
            ("lua.units".to_string(), package.join(PACKAGE_INIT))
        );
        assert!(resolve_candidate(&empty).unwrap_err().is_soft_skip());
        assert!(resolve_candidate(&readme).unwrap_err().is_soft_skip());
    }

    #[test]
    fn test_state_loadability() {
        assert!(LoaderState::Validated.is_loadable());
        assert!(LoaderState::Unloaded.is_loadable());
        assert!(
            !LoaderState::Rejected {
                reasons: "x".into()
            }
            .is_loadable()
        );
    }
}
