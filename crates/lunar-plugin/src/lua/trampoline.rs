//! Adapters dispatching host interface calls into Lua objects.
//!
//! Each call takes the execution lock, resolves the object, and looks the
//! method up by name. An override is called with converted arguments; a
//! missing override falls back to the host default, or fails with
//! [`ExtensionError::NotImplemented`] where there is none.

use std::sync::Arc;

use lunar_core::{
    Action, Extension, ExtensionError, ExtensionResult, FallbackHandler, GeneratorQueryHandler,
    GlobalQueryHandler, Icon, IndexItem, IndexQueryHandler, Item, ItemGenerator, PluginInstance,
    QueryContext, QueryHandler, RankItem, RankedQueryHandler, ranked_items,
};
use mlua::{FromLuaMulti, Function, IntoLuaMulti, Lua, Table, Value as LuaValue};

use super::bindings::{
    self, ContextHandle, EXTENSIONS_KEY, IndexItemHandle, NativeState, PluginContext,
};
use super::guard::{Foreign, WeakObject};
use super::interpreter::{Interpreter, WeakInterpreter};
use super::stream::ForeignBatchStream;

/// Weak reference to a Lua object plus the id used when logging failures.
struct Dispatch {
    object: WeakObject,
    plugin: String,
}

impl Dispatch {
    fn new(interp: &Interpreter, plugin: &str, object: &Table) -> mlua::Result<Self> {
        Ok(Self {
            object: WeakObject::new(interp, object)?,
            plugin: plugin.to_string(),
        })
    }

    fn fail(&self, method: &str, err: mlua::Error) -> ExtensionError {
        tracing::warn!(target: "lunar::plugin", plugin = %self.plugin, "{method}: {err}");
        ExtensionError::failed(err.to_string())
    }

    /// Run `f` on the live object under the execution lock.
    fn with_object<R>(
        &self,
        method: &'static str,
        f: impl FnOnce(&Interpreter, &Table) -> mlua::Result<R>,
    ) -> ExtensionResult<R> {
        let interp = self
            .object
            .interpreter()
            .upgrade()
            .ok_or(ExtensionError::Unavailable)?;
        let _guard = interp.lock();
        let object = self
            .object
            .get(interp.lua())
            .map_err(|e| self.fail(method, e))?
            .ok_or(ExtensionError::Unavailable)?;
        f(&interp, &object).map_err(|e| self.fail(method, e))
    }

    /// Call the override of `method` with `args`, if there is one.
    fn call_override<A, R>(&self, method: &'static str, args: A) -> ExtensionResult<Option<R>>
    where
        A: IntoLuaMulti,
        R: FromLuaMulti,
    {
        self.with_object(method, |interp, object| {
            match bindings::lookup_override(interp.lua(), object, method)? {
                Some(function) => function.call::<R>((object.clone(), args)).map(Some),
                None => Ok(None),
            }
        })
    }
}

/// The root object of a loaded Lua plugin.
pub struct PluginInstanceTrampoline {
    dispatch: Dispatch,
}

impl PluginInstanceTrampoline {
    /// Must be called under the execution lock.
    pub(crate) fn new(interp: &Interpreter, plugin: &str, object: &Table) -> mlua::Result<Self> {
        Ok(Self {
            dispatch: Dispatch::new(interp, plugin, object)?,
        })
    }
}

impl PluginInstance for PluginInstanceTrampoline {
    fn extensions(&self) -> ExtensionResult<Vec<Arc<dyn Extension>>> {
        let plugin = self.dispatch.plugin.clone();
        self.dispatch.with_object("extensions", |interp, object| {
            let lua = interp.lua();
            let list: Table = match bindings::lookup_override(lua, object, "extensions")? {
                Some(function) => function.call(object.clone())?,
                None => {
                    let list = lua.create_table()?;
                    if interp.is_instance(object, "Extension")? {
                        list.raw_set(1, object.clone())?;
                    }
                    list
                }
            };

            // The instance keeps the extensions it handed out alive.
            object.raw_set(EXTENSIONS_KEY, list.clone())?;

            let mut extensions: Vec<Arc<dyn Extension>> = Vec::new();
            for value in list.sequence_values::<LuaValue>() {
                let LuaValue::Table(extension) = value? else {
                    return Err(mlua::Error::runtime("extensions() must return objects"));
                };
                if !interp.is_instance(&extension, "Extension")? {
                    return Err(mlua::Error::runtime(
                        "extensions() returned an object not deriving from lunar.Extension",
                    ));
                }
                extensions.push(Arc::new(ExtensionTrampoline::new(interp, &plugin, &extension)?));
            }
            Ok(extensions)
        })
    }
}

/// Capabilities of an extension object, checked once when it is wrapped.
#[derive(Debug, Clone, Copy, Default)]
struct Capabilities {
    query: bool,
    generator: bool,
    ranked: bool,
    global: bool,
    index: bool,
    fallback: bool,
}

impl Capabilities {
    fn of(interp: &Interpreter, object: &Table) -> mlua::Result<Self> {
        Ok(Self {
            query: interp.is_instance(object, "QueryHandler")?,
            generator: interp.is_instance(object, "GeneratorQueryHandler")?,
            ranked: interp.is_instance(object, "RankedQueryHandler")?,
            global: interp.is_instance(object, "GlobalQueryHandler")?,
            index: interp.is_instance(object, "IndexQueryHandler")?,
            fallback: interp.is_instance(object, "FallbackHandler")?,
        })
    }
}

/// An extension implemented by a Lua object.
///
/// Implements every handler interface; the `as_*` accessors expose only
/// the ones the object's classes derive from.
pub struct ExtensionTrampoline {
    dispatch: Dispatch,
    capabilities: Capabilities,
    batch_size: usize,
}

impl ExtensionTrampoline {
    /// Must be called under the execution lock.
    pub(crate) fn new(interp: &Interpreter, plugin: &str, object: &Table) -> mlua::Result<Self> {
        Ok(Self {
            dispatch: Dispatch::new(interp, plugin, object)?,
            capabilities: Capabilities::of(interp, object)?,
            batch_size: interp.batch_size(),
        })
    }

    /// `id`, `name` and `description` of a plugin instance fall back to its
    /// manifest.
    fn metadata(
        &self,
        method: &'static str,
        pick: fn(&PluginContext) -> String,
    ) -> ExtensionResult<String> {
        self.dispatch
            .with_object(method, |interp, object| {
                match bindings::lookup_override(interp.lua(), object, method)? {
                    Some(function) => function.call::<String>(object.clone()).map(Some),
                    None => Ok(bindings::plugin_context(object)?.map(|context| pick(&context))),
                }
            })?
            .ok_or(ExtensionError::NotImplemented { method })
    }
}

impl Extension for ExtensionTrampoline {
    fn id(&self) -> ExtensionResult<String> {
        self.metadata("id", |c| c.id.clone())
    }

    fn name(&self) -> ExtensionResult<String> {
        self.metadata("name", |c| c.name.clone())
    }

    fn description(&self) -> ExtensionResult<String> {
        self.metadata("description", |c| c.description.clone())
    }

    fn as_query_handler(&self) -> Option<&dyn QueryHandler> {
        self.capabilities.query.then_some(self as &dyn QueryHandler)
    }

    fn as_generator_query_handler(&self) -> Option<&dyn GeneratorQueryHandler> {
        self.capabilities
            .generator
            .then_some(self as &dyn GeneratorQueryHandler)
    }

    fn as_ranked_query_handler(&self) -> Option<&dyn RankedQueryHandler> {
        self.capabilities
            .ranked
            .then_some(self as &dyn RankedQueryHandler)
    }

    fn as_global_query_handler(&self) -> Option<&dyn GlobalQueryHandler> {
        self.capabilities
            .global
            .then_some(self as &dyn GlobalQueryHandler)
    }

    fn as_index_query_handler(&self) -> Option<&dyn IndexQueryHandler> {
        self.capabilities
            .index
            .then_some(self as &dyn IndexQueryHandler)
    }

    fn as_fallback_handler(&self) -> Option<&dyn FallbackHandler> {
        self.capabilities
            .fallback
            .then_some(self as &dyn FallbackHandler)
    }
}

impl QueryHandler for ExtensionTrampoline {
    fn synopsis(&self, query: &str) -> ExtensionResult<String> {
        Ok(self
            .dispatch
            .call_override("synopsis", query.to_string())?
            .unwrap_or_default())
    }

    fn allow_trigger_remap(&self) -> ExtensionResult<bool> {
        Ok(self
            .dispatch
            .call_override("allowTriggerRemap", ())?
            .unwrap_or(true))
    }

    fn default_trigger(&self) -> ExtensionResult<String> {
        match self.dispatch.call_override("defaultTrigger", ())? {
            Some(trigger) => Ok(trigger),
            None => Ok(format!("{} ", self.id()?)),
        }
    }

    fn set_trigger(&self, trigger: &str) -> ExtensionResult<()> {
        self.dispatch.with_object("setTrigger", |interp, object| {
            let lua = interp.lua();
            match bindings::lookup_override(lua, object, "setTrigger")? {
                Some(function) => function.call((object.clone(), trigger.to_string())),
                None => {
                    bindings::native_state(lua, object)?
                        .borrow_mut::<NativeState>()?
                        .trigger = Some(trigger.to_string());
                    Ok(())
                }
            }
        })
    }

    fn supports_fuzzy_matching(&self) -> ExtensionResult<bool> {
        Ok(self
            .dispatch
            .call_override("supportsFuzzyMatching", ())?
            .unwrap_or(false))
    }

    fn set_fuzzy_matching(&self, enabled: bool) -> ExtensionResult<()> {
        self.dispatch.with_object("setFuzzyMatching", |interp, object| {
            let lua = interp.lua();
            match bindings::lookup_override(lua, object, "setFuzzyMatching")? {
                Some(function) => function.call((object.clone(), enabled)),
                None => {
                    bindings::native_state(lua, object)?
                        .borrow_mut::<NativeState>()?
                        .index
                        .set_fuzzy(enabled);
                    Ok(())
                }
            }
        })
    }
}

impl GeneratorQueryHandler for ExtensionTrampoline {
    fn items(&self, context: Arc<dyn QueryContext>) -> ExtensionResult<ItemGenerator> {
        let stream = self.dispatch.with_object("items", |interp, object| {
            match bindings::lookup_override(interp.lua(), object, "items")? {
                Some(function) => Ok(Some(ForeignBatchStream::new(
                    interp,
                    &self.dispatch.plugin,
                    object,
                    function,
                    context.clone(),
                ))),
                None => Ok(None),
            }
        })?;

        match stream {
            Some(stream) => Ok(ItemGenerator::new(stream)),
            None if self.capabilities.ranked => ranked_items(self, context, self.batch_size),
            None => Err(ExtensionError::NotImplemented { method: "items" }),
        }
    }
}

impl RankedQueryHandler for ExtensionTrampoline {
    fn rank_items(&self, context: Arc<dyn QueryContext>) -> ExtensionResult<Vec<RankItem>> {
        let indexed = self.capabilities.index;
        self.dispatch
            .with_object("rankItems", |interp, object| {
                let lua = interp.lua();
                match bindings::lookup_override(lua, object, "rankItems")? {
                    Some(function) => {
                        let query = lua.create_userdata(ContextHandle(context.clone()))?;
                        let list: Table = function.call((object.clone(), query))?;
                        bindings::rank_items_from_lua(list).map(Some)
                    }
                    None if indexed => {
                        let state = bindings::native_state(lua, object)?;
                        let ranked = state.borrow::<NativeState>()?.index.search(context.query());
                        Ok(Some(ranked))
                    }
                    None => Ok(None),
                }
            })?
            .ok_or(ExtensionError::NotImplemented { method: "rankItems" })
    }
}

impl GlobalQueryHandler for ExtensionTrampoline {}

impl IndexQueryHandler for ExtensionTrampoline {
    fn update_index_items(&self) -> ExtensionResult<()> {
        self.dispatch
            .call_override::<_, ()>("updateIndexItems", ())?
            .ok_or(ExtensionError::NotImplemented {
                method: "updateIndexItems",
            })
    }

    fn set_index_items(&self, items: Vec<IndexItem>) -> ExtensionResult<()> {
        self.dispatch.with_object("setIndexItems", |interp, object| {
            let lua = interp.lua();
            match bindings::lookup_override(lua, object, "setIndexItems")? {
                Some(function) => {
                    let list = lua.create_sequence_from(items.into_iter().map(IndexItemHandle))?;
                    function.call((object.clone(), list))
                }
                None => {
                    bindings::native_state(lua, object)?
                        .borrow_mut::<NativeState>()?
                        .index
                        .set_items(items);
                    Ok(())
                }
            }
        })
    }
}

impl FallbackHandler for ExtensionTrampoline {
    fn fallbacks(&self, query: &str) -> ExtensionResult<Vec<Arc<dyn Item>>> {
        self.dispatch
            .with_object("fallbacks", |interp, object| {
                let lua = interp.lua();
                match bindings::lookup_override(lua, object, "fallbacks")? {
                    Some(function) => {
                        let list: Table = function.call((object.clone(), query.to_string()))?;
                        bindings::items_from_lua(lua, list).map(Some)
                    }
                    None => Ok(None),
                }
            })?
            .ok_or(ExtensionError::NotImplemented { method: "fallbacks" })
    }
}

/// An item implemented by a Lua object deriving from `lunar.Item`.
///
/// Items may outlive the query that produced them, so the object is held
/// strongly.
pub(crate) struct ItemTrampoline {
    interp: WeakInterpreter,
    object: Foreign<Table>,
}

impl ItemTrampoline {
    pub(crate) fn new(interp: &Interpreter, object: Foreign<Table>) -> Self {
        Self {
            interp: interp.downgrade(),
            object,
        }
    }

    fn with_override<R>(
        &self,
        method: &'static str,
        f: impl FnOnce(&Lua, Function, Table) -> mlua::Result<R>,
    ) -> ExtensionResult<Option<R>> {
        let interp = self.interp.upgrade().ok_or(ExtensionError::Unavailable)?;
        let _guard = interp.lock();
        let lua = interp.lua();
        let object: Table = (*self.object).clone();
        let result = match bindings::lookup_override(lua, &object, method) {
            Ok(Some(function)) => f(lua, function, object).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };
        result.map_err(|e| {
            tracing::warn!(target: "lunar::plugin", "Item.{method}: {e}");
            ExtensionError::failed(e.to_string())
        })
    }

    fn string(&self, method: &'static str) -> ExtensionResult<Option<String>> {
        self.with_override(method, |_, function, object| function.call(object))
    }
}

impl Item for ItemTrampoline {
    fn id(&self) -> ExtensionResult<String> {
        self.string("id")?
            .ok_or(ExtensionError::NotImplemented { method: "id" })
    }

    fn text(&self) -> ExtensionResult<String> {
        self.string("text")?
            .ok_or(ExtensionError::NotImplemented { method: "text" })
    }

    fn subtext(&self) -> ExtensionResult<String> {
        Ok(self.string("subtext")?.unwrap_or_default())
    }

    fn input_action_text(&self) -> ExtensionResult<String> {
        match self.string("inputActionText")? {
            Some(text) => Ok(text),
            None => self.text(),
        }
    }

    fn icon(&self) -> ExtensionResult<Option<Icon>> {
        Ok(self
            .with_override("icon", |_, function, object| {
                bindings::icon_from_lua(function.call::<LuaValue>(object)?)
            })?
            .flatten())
    }

    fn actions(&self) -> ExtensionResult<Vec<Action>> {
        Ok(self
            .with_override("actions", |_, function, object| {
                bindings::actions_from_lua(function.call::<Table>(object)?)
            })?
            .unwrap_or_default())
    }
}
