//! Lua extension bridge for lunar.
//!
//! Plugins are Lua 5.4 source files (or package directories with an
//! `init.lua`) found in the configured plugin directories. Each candidate
//! goes through the same lifecycle:
//!
//! 1. **Discovery**: the manifest (`md_iid`, `md_name`, ...) is extracted by
//!    parsing the source, without executing it.
//! 2. **Validation**: the interface version and platform are checked.
//! 3. **Loading**: binary and package dependencies are resolved, the module
//!    runs in the shared interpreter and its `Plugin` class is instantiated.
//! 4. **Dispatch**: the host talks to the instance through the
//!    [`lunar_core`] traits, implemented by the trampolines in [`lua`].
//!
//! All Lua execution is serialized by one reentrant [`lua::ExecutionLock`].
//!
//! # Example
//!
//! ```ignore
//! use lunar_plugin::{BridgeConfig, PluginManager};
//!
//! let settings = Arc::new(MemorySettings::default());
//! let mut manager = PluginManager::initialize(BridgeConfig::load_default()?, settings).await?;
//! manager.load_all().await;
//!
//! for loader in manager.plugins().filter(|l| l.is_loaded()) {
//!     let instance = loader.instance()?;
//!     for extension in instance.extensions()? {
//!         println!("{}", extension.id());
//!     }
//! }
//! ```

mod config;
mod environment;
mod gate;
mod loader;
pub mod lua;
mod manager;
mod manifest;
mod types;

pub use config::{BridgeConfig, BridgeConfigBuilder, BridgeState};
pub use environment::RuntimeEnvironment;
pub use gate::{
    INTERFACE_VERSION_MAJOR, INTERFACE_VERSION_MINOR, current_platform, interface_version,
    rejection_reasons, validate,
};
pub use loader::{ID_SCHEME, LoaderState, PACKAGE_INIT, PluginLoader, resolve_candidate};
pub use manager::PluginManager;
pub use manifest::Manifest;
pub use types::{PluginError, PluginResult};
