//! Error types for the plugin bridge.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;

/// Errors that can occur while discovering, validating or loading plugins.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The path is not a plugin candidate at all.
    #[error("Not a plugin: {path}")]
    NotAPlugin { path: PathBuf },

    /// The candidate source is not valid Lua.
    #[error("Failed to parse '{path}': {message}")]
    Parse { path: PathBuf, message: String },

    /// The manifest failed the interface version gate.
    #[error("Invalid manifest of '{id}': {reasons}")]
    InvalidManifest { id: String, reasons: String },

    /// A declared executable is not on the search path.
    #[error("No '{binary}' in $PATH")]
    MissingBinaryDependency { binary: String },

    /// Installing declared packages failed.
    #[error("Failed installing dependencies {packages:?}: {message}")]
    DependencyInstall {
        packages: Vec<String>,
        message: String,
    },

    /// The entry class does not produce a plugin instance.
    #[error("Plugin '{id}': entry class is not a PluginInstance ({found})")]
    EntryClassType { id: String, found: String },

    /// Lua raised an error while executing plugin code.
    #[error("Plugin '{id}' execution error: {message}")]
    ExecutionError { id: String, message: String },

    /// An external process failed.
    #[error("'{program}' {message}")]
    Process { program: String, message: String },

    /// Invalid bridge configuration or state file.
    #[error("Invalid configuration: {message}")]
    ConfigError { message: String },

    /// The plugin is not loaded.
    #[error("Plugin '{id}' is not loaded")]
    NotLoaded { id: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PluginError {
    /// Whether this error only means "skip this path".
    pub fn is_soft_skip(&self) -> bool {
        matches!(self, Self::NotAPlugin { .. })
    }

    pub(crate) fn execution(id: &str, err: impl std::fmt::Display) -> Self {
        Self::ExecutionError {
            id: id.to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soft_skip_classification() {
        let skip = PluginError::NotAPlugin {
            path: PathBuf::from("README.md"),
        };
        assert!(skip.is_soft_skip());

        let missing = PluginError::MissingBinaryDependency {
            binary: "fd".into(),
        };
        assert!(!missing.is_soft_skip());
        assert_eq!(missing.to_string(), "No 'fd' in $PATH");
    }
}
