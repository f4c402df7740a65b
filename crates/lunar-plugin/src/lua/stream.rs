//! Streaming of item batches produced by a Lua coroutine.

use std::sync::Arc;

use lunar_core::{Batch, ExtensionError, ExtensionResult, QueryContext};
use mlua::{Function, IntoLuaMulti, MultiValue, Table, Thread, ThreadStatus, Value as LuaValue};

use super::bindings::{self, ContextHandle};
use super::guard::Foreign;
use super::interpreter::{Interpreter, WeakInterpreter};

enum State {
    /// The `items` override has not been called yet.
    NotStarted {
        function: Foreign<Function>,
        object: Foreign<Table>,
        context: Arc<dyn QueryContext>,
    },
    /// Suspended after yielding a batch.
    Active(Foreign<Thread>),
    Exhausted,
}

/// Pull-based batch sequence over an `items(self, ctx)` override.
///
/// The override runs as a coroutine: every `coroutine.yield(batch)` hands
/// one batch to the host, and returning ends the sequence. Nothing runs
/// until the first pull, and every pull resumes the coroutine exactly once.
pub struct ForeignBatchStream {
    interp: WeakInterpreter,
    plugin: String,
    state: State,
}

impl ForeignBatchStream {
    /// Must be called under the execution lock.
    pub(crate) fn new(
        interp: &Interpreter,
        plugin: &str,
        object: &Table,
        function: Function,
        context: Arc<dyn QueryContext>,
    ) -> Self {
        let lock = interp.execution_lock();
        Self {
            interp: interp.downgrade(),
            plugin: plugin.to_string(),
            state: State::NotStarted {
                function: Foreign::new(function, lock.clone()),
                object: Foreign::new(object.clone(), lock.clone()),
                context,
            },
        }
    }

    /// Resume once. Must be called under the execution lock.
    fn pull(&mut self, interp: &Interpreter) -> mlua::Result<Option<Batch>> {
        let lua = interp.lua();
        let (thread, args) = match std::mem::replace(&mut self.state, State::Exhausted) {
            State::Exhausted => return Ok(None),
            State::NotStarted {
                function,
                object,
                context,
            } => {
                let thread = lua.create_thread((*function).clone())?;
                let args = ((*object).clone(), lua.create_userdata(ContextHandle(context))?)
                    .into_lua_multi(lua)?;
                (Foreign::new(thread, interp.execution_lock().clone()), args)
            }
            State::Active(thread) => (thread, MultiValue::new()),
        };

        let yielded: LuaValue = thread.resume(args)?;
        if !matches!(thread.status(), ThreadStatus::Resumable) {
            // Returned: the sequence is over, whatever the return value.
            return Ok(None);
        }

        let batch = match yielded {
            LuaValue::Table(list) => bindings::items_from_lua(lua, list)?,
            other => {
                return Err(mlua::Error::runtime(format!(
                    "items() must yield a list of items, got {}",
                    other.type_name()
                )));
            }
        };
        self.state = State::Active(thread);
        Ok(Some(batch))
    }
}

impl Iterator for ForeignBatchStream {
    type Item = ExtensionResult<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if matches!(self.state, State::Exhausted) {
            return None;
        }

        let Some(interp) = self.interp.upgrade() else {
            self.state = State::Exhausted;
            return Some(Err(ExtensionError::Unavailable));
        };
        let _guard = interp.lock();

        match self.pull(&interp) {
            Ok(Some(batch)) => Some(Ok(batch)),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(target: "lunar::plugin", plugin = %self.plugin, "items: {e}");
                Some(Err(ExtensionError::failed(e.to_string())))
            }
        }
    }
}
