//! The embedded Lua interpreter and module execution.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};

use mlua::{Function, Lua, Table, Value as LuaValue};
use parking_lot::ReentrantMutexGuard;

use crate::config::BridgeConfig;
use crate::types::{PluginError, PluginResult};

use super::bindings::{self, PluginContext};
use super::guard::{self, ExecutionLock, Foreign};

/// Lua ABI version of the vendored interpreter.
pub const LUA_ABI: &str = "5.4";

/// Name of the entry class a plugin module must define.
pub const ENTRY_CLASS: &str = "Plugin";

pub(crate) const LUNAR_MODULE_KEY: &str = "lunar.module";
const SETMETATABLE_KEY: &str = "lunar.setmetatable";

/// Severities of the logging functions injected into plugin modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogLevel {
    Debug,
    Info,
    Warning,
    Critical,
}

impl LogLevel {
    const ALL: [LogLevel; 4] = [Self::Debug, Self::Info, Self::Warning, Self::Critical];

    fn function_name(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }

    fn log(self, id: &str, message: &str) {
        match self {
            Self::Debug => tracing::debug!(target: "lunar::plugin", plugin = %id, "{message}"),
            Self::Info => tracing::info!(target: "lunar::plugin", plugin = %id, "{message}"),
            Self::Warning => tracing::warn!(target: "lunar::plugin", plugin = %id, "{message}"),
            Self::Critical => tracing::error!(target: "lunar::plugin", plugin = %id, "{message}"),
        }
    }
}

struct Inner {
    lua: Lua,
    lock: ExecutionLock,
    next_slot: AtomicI64,
    batch_size: usize,
}

/// Handle to the embedded Lua runtime.
///
/// Every touch of a Lua value must happen while [`Interpreter::lock`] is
/// held. Cloning the handle is cheap and shares the runtime.
#[derive(Clone)]
pub struct Interpreter {
    inner: Arc<Inner>,
}

/// Non-owning interpreter handle, held by adapters handed to the host.
#[derive(Clone)]
pub(crate) struct WeakInterpreter {
    inner: Weak<Inner>,
}

impl WeakInterpreter {
    pub(crate) fn upgrade(&self) -> Option<Interpreter> {
        self.inner.upgrade().map(|inner| Interpreter { inner })
    }
}

impl Interpreter {
    /// Create the runtime with an isolated module search path and the
    /// `lunar` host module installed.
    pub fn new(config: &BridgeConfig) -> PluginResult<Self> {
        let lua = Lua::new();
        let lock = ExecutionLock::default();

        let setup = || -> mlua::Result<()> {
            let setmetatable: Function = lua.globals().get("setmetatable")?;
            lua.set_named_registry_value(SETMETATABLE_KEY, setmetatable)?;

            let package: Table = lua.globals().get("package")?;
            package.set("path", join_search_path(&lua_path(config)))?;
            package.set("cpath", join_search_path(&lua_cpath(config)))?;

            guard::install(&lua)?;
            let module = bindings::install(&lua)?;
            lua.set_named_registry_value(LUNAR_MODULE_KEY, module.clone())?;
            package.get::<Table>("loaded")?.set("lunar", module.clone())?;
            lua.globals().set("lunar", module)?;
            Ok(())
        };
        setup().map_err(|e| PluginError::ExecutionError {
            id: "lunar".into(),
            message: format!("Failed to initialize interpreter: {e}"),
        })?;

        let inner = Arc::new(Inner {
            lua,
            lock,
            next_slot: AtomicI64::new(1),
            batch_size: config.batch_size,
        });
        inner.lua.set_app_data(WeakInterpreter {
            inner: Arc::downgrade(&inner),
        });

        Ok(Self { inner })
    }

    /// Acquire the exclusive execution lock.
    pub fn lock(&self) -> ReentrantMutexGuard<'_, ()> {
        self.inner.lock.acquire()
    }

    pub fn execution_lock(&self) -> &ExecutionLock {
        &self.inner.lock
    }

    pub(crate) fn lua(&self) -> &Lua {
        &self.inner.lua
    }

    pub(crate) fn batch_size(&self) -> usize {
        self.inner.batch_size
    }

    pub(crate) fn downgrade(&self) -> WeakInterpreter {
        WeakInterpreter {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub(crate) fn next_slot(&self) -> i64 {
        self.inner.next_slot.fetch_add(1, Ordering::Relaxed)
    }

    /// The interpreter owning `lua`, for use inside native callbacks.
    pub(crate) fn from_lua(lua: &Lua) -> mlua::Result<Self> {
        lua.app_data_ref::<WeakInterpreter>()
            .and_then(|weak| weak.upgrade())
            .ok_or_else(|| mlua::Error::runtime("interpreter is shutting down"))
    }

    /// Version string of the runtime, e.g. `Lua 5.4`.
    pub fn version(&self) -> PluginResult<String> {
        let _guard = self.lock();
        self.lua()
            .globals()
            .get::<String>("_VERSION")
            .map_err(|e| PluginError::execution("lunar", e))
    }

    /// Run a full collection cycle, including pending finalizers.
    pub fn collect_garbage(&self) -> PluginResult<()> {
        let _guard = self.lock();
        // The second pass frees what finalizers of the first one released.
        for _ in 0..2 {
            self.lua()
                .gc_collect()
                .map_err(|e| PluginError::execution("lunar", e))?;
        }
        Ok(())
    }

    /// Execute a plugin source file as module `lunar.<id>`.
    ///
    /// The module gets its own environment falling back to the globals, with
    /// the logging functions and `_NAME` injected before the body runs.
    pub(crate) fn load_module(&self, id: &str, path: &Path) -> PluginResult<Foreign<Table>> {
        let source = std::fs::read(path)?;
        let _guard = self.lock();
        let lua = self.lua();
        let name = module_name(id);

        let execute = || -> mlua::Result<Table> {
            let env = lua.create_table()?;
            let meta = lua.create_table()?;
            meta.set("__index", lua.globals())?;
            set_metatable(lua, &env, &meta)?;

            for level in LogLevel::ALL {
                let id = id.to_string();
                let log = lua.create_function(move |_, message: String| {
                    level.log(&id, &message);
                    Ok(())
                })?;
                env.set(level.function_name(), log)?;
            }
            env.set("_NAME", name.as_str())?;
            loaded_modules(lua)?.set(name.as_str(), env.clone())?;

            lua.load(&source[..])
                .set_name(format!("@{}", path.display()))
                .set_environment(env.clone())
                .exec()?;
            Ok(env)
        };

        match execute() {
            Ok(env) => Ok(Foreign::new(env, self.execution_lock().clone())),
            Err(e) => {
                self.forget_module(id);
                if let Err(e) = self.collect_garbage() {
                    tracing::warn!(
                        plugin = %id,
                        "Garbage collection after failed load failed: {e}"
                    );
                }
                Err(PluginError::execution(id, e))
            }
        }
    }

    /// Instantiate the module's entry class with no arguments.
    pub(crate) fn instantiate(
        &self,
        id: &str,
        module: &Table,
        context: PluginContext,
    ) -> PluginResult<Foreign<Table>> {
        let _guard = self.lock();
        let lua = self.lua();

        let class = match module.get::<LuaValue>(ENTRY_CLASS) {
            Ok(LuaValue::Table(class)) => class,
            Ok(other) => {
                return Err(PluginError::EntryClassType {
                    id: id.to_string(),
                    found: format!("'{ENTRY_CLASS}' is a {}", other.type_name()),
                });
            }
            Err(e) => return Err(PluginError::execution(id, e)),
        };

        let construct = || -> mlua::Result<Table> {
            let instance = lua.create_table()?;
            set_metatable(lua, &instance, &class)?;
            instance.raw_set(bindings::PLUGIN_KEY, lua.create_userdata(context)?)?;
            if let Some(init) = class.get::<Option<Function>>("__init")? {
                init.call::<()>(instance.clone())?;
            }
            Ok(instance)
        };
        let instance = construct().map_err(|e| PluginError::execution(id, e))?;

        let is_plugin = self
            .is_instance(&instance, "PluginInstance")
            .map_err(|e| PluginError::execution(id, e))?;
        if !is_plugin {
            return Err(PluginError::EntryClassType {
                id: id.to_string(),
                found: format!("'{ENTRY_CLASS}' does not derive from lunar.PluginInstance"),
            });
        }

        Ok(Foreign::new(instance, self.execution_lock().clone()))
    }

    /// Release a module and its instance, then collect so finalizers run
    /// before this returns.
    pub(crate) fn unload_module(
        &self,
        id: &str,
        module: Foreign<Table>,
        instance: Option<Foreign<Table>>,
    ) {
        let _guard = self.lock();
        drop(instance);
        drop(module);
        self.forget_module(id);
        if let Err(e) = self.collect_garbage() {
            tracing::warn!(plugin = %id, "Garbage collection after unload failed: {e}");
        }
    }

    fn forget_module(&self, id: &str) {
        let _guard = self.lock();
        if let Ok(loaded) = loaded_modules(self.lua()) {
            let _ = loaded.set(module_name(id), LuaValue::Nil);
        }
    }

    /// Whether `object` is an instance of the `lunar` base class `class`.
    /// Must be called under the execution lock.
    pub(crate) fn is_instance(&self, object: &Table, class: &str) -> mlua::Result<bool> {
        is_instance(self.lua(), object, class)
    }
}

pub(crate) fn is_instance(lua: &Lua, object: &Table, class: &str) -> mlua::Result<bool> {
    let module: Table = lua.named_registry_value(LUNAR_MODULE_KEY)?;
    let isinstance: Function = module.get("isinstance")?;
    let class: Table = module.get(class)?;
    isinstance.call((object.clone(), class))
}

/// Set a metatable through the saved global `setmetatable`, so the `__gc`
/// metamethod is registered for finalization.
pub(crate) fn set_metatable(lua: &Lua, table: &Table, meta: &Table) -> mlua::Result<()> {
    let setmetatable: Function = lua.named_registry_value(SETMETATABLE_KEY)?;
    setmetatable.call::<LuaValue>((table.clone(), meta.clone()))?;
    Ok(())
}

fn module_name(id: &str) -> String {
    format!("lunar.{id}")
}

fn loaded_modules(lua: &Lua) -> mlua::Result<Table> {
    lua.globals().get::<Table>("package")?.get("loaded")
}

fn lua_path(config: &BridgeConfig) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for dir in config.plugin_dirs() {
        paths.push(dir.join("?.lua"));
        paths.push(dir.join("?").join("init.lua"));
    }
    let share = config.rocks_tree().join("share").join("lua").join(LUA_ABI);
    paths.push(share.join("?.lua"));
    paths.push(share.join("?").join("init.lua"));
    paths
}

fn lua_cpath(config: &BridgeConfig) -> Vec<PathBuf> {
    let extension = if cfg!(windows) { "dll" } else { "so" };
    let lib = config.rocks_tree().join("lib").join("lua").join(LUA_ABI);
    vec![lib.join(format!("?.{extension}"))]
}

fn join_search_path(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(";")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn interpreter(dir: &TempDir) -> Interpreter {
        let config = BridgeConfig::builder()
            .data_dir(dir.path().join("data"))
            .build()
            .unwrap();
        Interpreter::new(&config).unwrap()
    }

    #[test]
    fn test_search_path_is_isolated() {
        let dir = TempDir::new().unwrap();
        let interp = interpreter(&dir);
        let _guard = interp.lock();

        let path: String = interp.lua().load("return package.path").eval().unwrap();
        assert!(path.contains("rocks"));
        assert!(path.contains(LUA_ABI));
        assert!(!path.contains("/usr/"));
    }

    #[test]
    fn test_version_and_lunar_module() {
        let dir = TempDir::new().unwrap();
        let interp = interpreter(&dir);
        assert_eq!(interp.version().unwrap(), "Lua 5.4");

        let _guard = interp.lock();
        let same: bool = interp
            .lua()
            .load("return require('lunar') == lunar")
            .eval()
            .unwrap();
        assert!(same);
    }

    #[test]
    fn test_module_environment_and_logging() {
        let dir = TempDir::new().unwrap();
        let interp = interpreter(&dir);
        let path = dir.path().join("mod.lua");
        std::fs::write(&path, "info('hello from ' .. _NAME)\nanswer = 42\n").unwrap();

        let module = interp.load_module("lua.mod", &path).unwrap();
        let _guard = interp.lock();
        assert_eq!(module.get::<i64>("answer").unwrap(), 42);
        assert!(interp.lua().globals().get::<LuaValue>("answer").unwrap().is_nil());

        let loaded: bool = interp
            .lua()
            .load("return package.loaded['lunar.lua.mod'] ~= nil")
            .eval()
            .unwrap();
        assert!(loaded);
    }

    #[test]
    fn test_failed_module_is_forgotten() {
        let dir = TempDir::new().unwrap();
        let interp = interpreter(&dir);
        let path = dir.path().join("broken.lua");
        std::fs::write(&path, "error('boom')\n").unwrap();

        let err = interp.load_module("lua.broken", &path).err().unwrap();
        assert!(err.to_string().contains("boom"));

        let _guard = interp.lock();
        let loaded: bool = interp
            .lua()
            .load("return package.loaded['lunar.lua.broken'] ~= nil")
            .eval()
            .unwrap();
        assert!(!loaded);
    }
}
