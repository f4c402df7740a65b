//! Bridge configuration and persistent bridge state.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::types::{PluginError, PluginResult};

const APP_NAME: &str = "lunar";

/// Global plugin bridge configuration.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), default)]
#[serde(default)]
pub struct BridgeConfig {
    /// Root of the bridge's own data (package tree, stubs, state).
    pub data_dir: PathBuf,

    /// Root of per-plugin configuration directories.
    pub config_dir: PathBuf,

    /// Root of per-plugin cache directories.
    pub cache_dir: PathBuf,

    /// Directories scanned for plugins. Empty means `data_dir/plugins`.
    pub plugin_dirs: Vec<PathBuf>,

    /// Package installer executable.
    pub installer: String,

    /// Timeout for a single installer invocation in milliseconds.
    pub installer_timeout_ms: u64,

    /// Batch size of the default ranked `items`.
    pub batch_size: usize,

    /// Ids of plugins that are discovered but never loaded by `load_all`.
    pub disabled_plugins: HashSet<String>,

    /// Move a discarded package tree to the trash instead of deleting it.
    pub use_trash: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        let base = |dir: Option<PathBuf>| dir.unwrap_or_else(|| PathBuf::from(".")).join(APP_NAME);

        Self {
            data_dir: base(dirs::data_dir()),
            config_dir: base(dirs::config_dir()),
            cache_dir: base(dirs::cache_dir()),
            plugin_dirs: Vec::new(),
            installer: "luarocks".to_string(),
            installer_timeout_ms: 300_000,
            batch_size: lunar_core::DEFAULT_BATCH_SIZE,
            disabled_plugins: HashSet::new(),
            use_trash: true,
        }
    }
}

impl BridgeConfig {
    pub fn builder() -> BridgeConfigBuilder {
        BridgeConfigBuilder::default()
    }

    /// Parse a TOML configuration file.
    pub fn from_file(path: &Path) -> PluginResult<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| PluginError::ConfigError {
            message: format!("{}: {}", path.display(), e),
        })
    }

    /// Load `<config dir>/lunar/config.toml`, falling back to defaults when absent.
    pub fn load_default() -> PluginResult<Self> {
        let path = Self::default().config_dir.join("config.toml");
        if path.exists() {
            Self::from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn plugin_dirs(&self) -> Vec<PathBuf> {
        if self.plugin_dirs.is_empty() {
            vec![self.data_dir.join("plugins")]
        } else {
            self.plugin_dirs.clone()
        }
    }

    pub fn installer_timeout(&self) -> Duration {
        Duration::from_millis(self.installer_timeout_ms)
    }

    pub fn is_disabled(&self, id: &str) -> bool {
        self.disabled_plugins.contains(id)
    }

    /// Private package tree.
    pub fn rocks_tree(&self) -> PathBuf {
        self.data_dir.join("rocks")
    }

    pub fn state_file(&self) -> PathBuf {
        self.data_dir.join("state.toml")
    }

    /// Editor annotation file describing the `lunar` module.
    pub fn stub_file(&self) -> PathBuf {
        self.data_dir.join("stubs").join("lunar.d.lua")
    }

    pub fn plugin_cache_dir(&self, id: &str) -> PathBuf {
        self.cache_dir.join(id)
    }

    pub fn plugin_config_dir(&self, id: &str) -> PathBuf {
        self.config_dir.join(id)
    }

    pub fn plugin_data_dir(&self, id: &str) -> PathBuf {
        self.data_dir.join("plugins-data").join(id)
    }
}

/// State recorded between runs in `state.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeState {
    /// Lua version the package tree was created for.
    pub runtime_version: Option<String>,

    /// Interface version of the written stub file.
    pub stub_version: Option<String>,
}

impl BridgeState {
    /// Read the state file. A missing file yields the empty state.
    pub fn load(path: &Path) -> PluginResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| PluginError::ConfigError {
                message: format!("{}: {}", path.display(), e),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: &Path) -> PluginResult<()> {
        let content = toml::to_string(self).map_err(|e| PluginError::ConfigError {
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builder_defaults_and_derived_paths() {
        let config = BridgeConfig::builder()
            .data_dir("/tmp/lunar-data")
            .build()
            .unwrap();

        assert_eq!(config.installer, "luarocks");
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.plugin_dirs(), vec![PathBuf::from("/tmp/lunar-data/plugins")]);
        assert_eq!(config.rocks_tree(), PathBuf::from("/tmp/lunar-data/rocks"));
        assert!(config.stub_file().ends_with("stubs/lunar.d.lua"));
    }

    #[test]
    fn test_from_file_partial() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "installer = \"/opt/luarocks\"\ndisabled_plugins = [\"lua.noisy\"]\n",
        )
        .unwrap();

        let config = BridgeConfig::from_file(&path).unwrap();
        assert_eq!(config.installer, "/opt/luarocks");
        assert!(config.is_disabled("lua.noisy"));
        assert_eq!(config.installer_timeout_ms, 300_000);
    }

    #[test]
    fn test_state_roundtrip_and_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.toml");
        assert_eq!(BridgeState::load(&path).unwrap(), BridgeState::default());

        let state = BridgeState {
            runtime_version: Some("Lua 5.4".into()),
            stub_version: Some("1.1".into()),
        };
        state.save(&path).unwrap();
        assert_eq!(BridgeState::load(&path).unwrap(), state);
    }
}
