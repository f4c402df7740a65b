//! Lua runtime: interpreter, host module bindings and dispatch adapters.

mod bindings;
mod guard;
mod interpreter;
mod stream;
mod trampoline;

pub(crate) use bindings::PluginContext;
pub use guard::{ExecutionLock, Foreign};
pub use interpreter::{ENTRY_CLASS, Interpreter, LUA_ABI};
pub use stream::ForeignBatchStream;
pub use trampoline::{ExtensionTrampoline, PluginInstanceTrampoline};
