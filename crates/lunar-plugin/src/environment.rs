//! The runtime environment: interpreter, private package tree and the
//! editor stub file.

use std::ffi::OsString;
use std::path::Path;
use std::sync::Arc;

use lunar_core::Settings;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::config::{BridgeConfig, BridgeState};
use crate::gate;
use crate::lua::Interpreter;
use crate::types::{PluginError, PluginResult};

const STUB: &str = include_str!("../stubs/lunar.d.lua");

/// Owns the interpreter and the package tree shared by all plugins.
pub struct RuntimeEnvironment {
    config: BridgeConfig,
    interpreter: Interpreter,
    settings: Arc<dyn Settings>,
    /// Serializes installer invocations.
    installer: Mutex<()>,
}

impl RuntimeEnvironment {
    /// Create the interpreter and prepare the data directory.
    ///
    /// Blocking; run it off the UI thread.
    pub fn new(config: BridgeConfig, settings: Arc<dyn Settings>) -> PluginResult<Self> {
        let interpreter = Interpreter::new(&config)?;
        let env = Self {
            config,
            interpreter,
            settings,
            installer: Mutex::new(()),
        };
        env.prepare()?;
        Ok(env)
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }

    pub fn settings(&self) -> Arc<dyn Settings> {
        Arc::clone(&self.settings)
    }

    fn prepare(&self) -> PluginResult<()> {
        std::fs::create_dir_all(&self.config.data_dir)?;

        let state_file = self.config.state_file();
        let mut state = BridgeState::load(&state_file)?;
        let runtime_version = self.interpreter.version()?;

        let tree = self.config.rocks_tree();
        if state
            .runtime_version
            .as_ref()
            .is_some_and(|recorded| *recorded != runtime_version)
            && tree.exists()
        {
            tracing::info!(
                "Runtime changed from {:?} to {runtime_version}, discarding {}",
                state.runtime_version,
                tree.display()
            );
            discard(&tree, self.config.use_trash)?;
        }
        state.runtime_version = Some(runtime_version);

        let stub_file = self.config.stub_file();
        let interface_version = gate::interface_version();
        if state.stub_version.as_deref() != Some(interface_version.as_str()) || !stub_file.exists() {
            if let Some(parent) = stub_file.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&stub_file, STUB)?;
            tracing::debug!("Wrote interface stub {}", stub_file.display());
            state.stub_version = Some(interface_version);
        }

        state.save(&state_file)
    }

    /// Whether every named package is installed in the package tree.
    /// Names compare case-insensitively.
    pub async fn check_packages(&self, names: &[String]) -> PluginResult<bool> {
        if names.is_empty() {
            return Ok(true);
        }

        let _installer = self.installer.lock().await;
        let listing = self.run_installer(["list".into(), "--porcelain".into()]).await?;
        let installed: Vec<String> = listing
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .map(str::to_lowercase)
            .collect();

        Ok(names
            .iter()
            .all(|name| installed.contains(&name.to_lowercase())))
    }

    /// Install the named packages into the package tree, one at a time.
    pub async fn install_packages(&self, names: &[String]) -> PluginResult<()> {
        let _installer = self.installer.lock().await;
        for name in names {
            tracing::info!("Installing package {name}");
            self.run_installer(["install".into(), name.into()])
                .await
                .map_err(|e| PluginError::DependencyInstall {
                    packages: names.to_vec(),
                    message: e.to_string(),
                })?;
        }
        Ok(())
    }

    async fn run_installer<const N: usize>(&self, args: [OsString; N]) -> PluginResult<String> {
        let program = self.config.installer.clone();
        let timeout = self.config.installer_timeout();

        let mut command = Command::new(&program);
        command
            .arg("--tree")
            .arg(self.config.rocks_tree())
            .args(args)
            .kill_on_drop(true);

        let output = tokio::time::timeout(timeout, command.output())
            .await
            .map_err(|_| PluginError::Process {
                program: program.clone(),
                message: format!("timed out after {} ms", timeout.as_millis()),
            })?
            .map_err(|e| PluginError::Process {
                program: program.clone(),
                message: format!("failed to start: {e}"),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        match output.status.code() {
            Some(0) => Ok(stdout),
            Some(code) => Err(PluginError::Process {
                program,
                message: format!("exited with code {code}\n{stdout}\n{stderr}"),
            }),
            None => Err(PluginError::Process {
                program,
                message: format!("crashed\n{stdout}\n{stderr}"),
            }),
        }
    }
}

/// Move a directory to the trash, deleting it if there is no trash or
/// `use_trash` is off.
fn discard(path: &Path, use_trash: bool) -> PluginResult<()> {
    if use_trash {
        match trash::delete(path) {
            Ok(()) => return Ok(()),
            Err(e) => tracing::debug!("Trash unavailable ({e}), removing {}", path.display()),
        }
    }
    std::fs::remove_dir_all(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lunar_core::MemorySettings;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> BridgeConfig {
        BridgeConfig::builder()
            .data_dir(dir.path().to_path_buf())
            .use_trash(false)
            .build()
            .unwrap()
    }

    #[test]
    fn test_prepare_writes_stub_and_state() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let env = RuntimeEnvironment::new(config.clone(), Arc::new(MemorySettings::new())).unwrap();

        assert!(config.stub_file().exists());
        let state = BridgeState::load(&config.state_file()).unwrap();
        assert_eq!(state.stub_version.as_deref(), Some("1.1"));
        assert_eq!(state.runtime_version, Some(env.interpreter().version().unwrap()));
    }

    #[test]
    fn test_runtime_change_discards_package_tree() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        std::fs::create_dir_all(config.rocks_tree().join("lib")).unwrap();
        BridgeState {
            runtime_version: Some("Lua 5.1".into()),
            stub_version: None,
        }
        .save(&config.state_file())
        .unwrap();

        RuntimeEnvironment::new(config.clone(), Arc::new(MemorySettings::new())).unwrap();
        assert!(!config.rocks_tree().exists());
    }

    #[test]
    fn test_discard_without_trash_removes_tree() {
        let dir = TempDir::new().unwrap();
        let tree = dir.path().join("rocks");
        std::fs::create_dir_all(tree.join("lib").join("lua")).unwrap();
        std::fs::write(tree.join("manifest"), "").unwrap();

        discard(&tree, false).unwrap();
        assert!(!tree.exists());
        assert!(discard(&tree, false).is_err());
    }

    #[test]
    fn test_same_runtime_keeps_package_tree() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        RuntimeEnvironment::new(config.clone(), Arc::new(MemorySettings::new())).unwrap();
        std::fs::create_dir_all(config.rocks_tree()).unwrap();

        RuntimeEnvironment::new(config.clone(), Arc::new(MemorySettings::new())).unwrap();
        assert!(config.rocks_tree().exists());
    }

    #[tokio::test]
    async fn test_no_packages_needs_no_installer() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.installer = "/nonexistent/installer".into();
        let env = RuntimeEnvironment::new(config, Arc::new(MemorySettings::new())).unwrap();

        assert!(env.check_packages(&[]).await.unwrap());
        let err = env.check_packages(&["penlight".into()]).await.unwrap_err();
        assert!(matches!(err, PluginError::Process { .. }));
    }
}
