//! The `lunar` host module: value types and base class defaults.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use lunar_core::{
    Action, ExtensionError, Icon, IndexItem, Item, ItemIndex, Match, MatchConfig, Matcher,
    QueryContext, RankItem, SettingKind, SettingValue, Settings, StandardItem,
};
use mlua::{
    AnyUserData, Function, Lua, MetaMethod, Table, UserData, UserDataFields, UserDataMethods,
    UserDataRef, Value as LuaValue,
};

use crate::gate;

use super::guard::Foreign;
use super::interpreter::{self, Interpreter};
use super::trampoline::ItemTrampoline;

const PRELUDE: &str = include_str!("prelude.lua");

/// Registry name of the set of base class functions provided by the host.
const DEFAULTS_KEY: &str = "lunar.defaults";

/// Hidden instance field holding the [`PluginContext`].
pub(crate) const PLUGIN_KEY: &str = "__lunar_plugin";

/// Hidden object field holding the [`NativeState`].
const NATIVE_KEY: &str = "__lunar_native";

/// Hidden instance field pinning the extensions it returned.
pub(crate) const EXTENSIONS_KEY: &str = "__lunar_extensions";

/// Host data attached to a plugin instance.
pub(crate) struct PluginContext {
    pub id: String,
    pub name: String,
    pub description: String,
    pub cache_dir: PathBuf,
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub settings: Arc<dyn Settings>,
}

impl UserData for PluginContext {}

/// Host-side state of a handler object: configured trigger and item index.
#[derive(Default)]
pub(crate) struct NativeState {
    pub trigger: Option<String>,
    pub index: ItemIndex,
}

impl UserData for NativeState {}

pub(crate) struct ItemHandle(pub Arc<dyn Item>);

impl UserData for ItemHandle {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("id", |_, this| this.0.id().map_err(to_lua_error));
        fields.add_field_method_get("text", |_, this| this.0.text().map_err(to_lua_error));
        fields.add_field_method_get("subtext", |_, this| this.0.subtext().map_err(to_lua_error));
        fields.add_field_method_get("inputActionText", |_, this| {
            this.0.input_action_text().map_err(to_lua_error)
        });
    }
}

pub(crate) struct ActionHandle(pub Action);

impl UserData for ActionHandle {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("id", |_, this| Ok(this.0.id.clone()));
        fields.add_field_method_get("text", |_, this| Ok(this.0.text.clone()));
    }

    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("activate", |_, this, ()| {
            this.0.activate();
            Ok(())
        });
    }
}

pub(crate) struct IconHandle(pub Icon);

impl UserData for IconHandle {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("url", |_, this| Ok(this.0.to_url()));
    }

    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| Ok(this.0.to_url()));
    }
}

pub(crate) struct RankItemHandle(pub RankItem);

impl UserData for RankItemHandle {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("item", |_, this| Ok(ItemHandle(this.0.item.clone())));
        fields.add_field_method_get("score", |_, this| Ok(this.0.score));
        fields.add_field_method_set("score", |_, this, score: f64| {
            this.0.score = score;
            Ok(())
        });
    }
}

pub(crate) struct IndexItemHandle(pub IndexItem);

impl UserData for IndexItemHandle {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("item", |_, this| Ok(ItemHandle(this.0.item.clone())));
        fields.add_field_method_get("string", |_, this| Ok(this.0.string.clone()));
    }
}

pub(crate) struct MatchConfigHandle(pub MatchConfig);

impl UserData for MatchConfigHandle {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("fuzzy", |_, this| Ok(this.0.fuzzy));
        fields.add_field_method_get("ignore_case", |_, this| Ok(this.0.ignore_case));
        fields.add_field_method_get("ignore_word_order", |_, this| Ok(this.0.ignore_word_order));
        fields.add_field_method_get("ignore_diacritics", |_, this| Ok(this.0.ignore_diacritics));
        fields.add_field_method_get("separators", |_, this| Ok(this.0.separators.clone()));
    }
}

struct MatcherHandle(Matcher);

impl UserData for MatcherHandle {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        // matcher:match(string | {string...})
        methods.add_method("match", |_, this, candidate: LuaValue| match candidate {
            LuaValue::String(s) => Ok(MatchHandle(this.0.match_str(&s.to_string_lossy()))),
            LuaValue::Table(list) => {
                let strings = list
                    .sequence_values::<String>()
                    .collect::<mlua::Result<Vec<_>>>()?;
                Ok(MatchHandle(this.0.match_any(&strings)))
            }
            other => Err(mlua::Error::runtime(format!(
                "expected a string or a list of strings, got {}",
                other.type_name()
            ))),
        });
    }
}

struct MatchHandle(Match);

impl UserData for MatchHandle {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("score", |_, this| Ok(this.0.score()));
    }

    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("isMatch", |_, this, ()| Ok(this.0.is_match()));
        methods.add_method("isEmptyMatch", |_, this, ()| Ok(this.0.is_empty_match()));
        methods.add_method("isExactMatch", |_, this, ()| Ok(this.0.is_exact_match()));
    }
}

/// A host query as seen from Lua.
pub(crate) struct ContextHandle(pub Arc<dyn QueryContext>);

impl UserData for ContextHandle {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("trigger", |_, this| Ok(this.0.trigger().to_string()));
        fields.add_field_method_get("string", |_, this| Ok(this.0.query().to_string()));
        fields.add_field_method_get("isValid", |_, this| Ok(this.0.is_valid()));
    }
}

pub(crate) fn to_lua_error(err: ExtensionError) -> mlua::Error {
    mlua::Error::runtime(err.to_string())
}

/// Convert a Lua value to a host item: either a `StandardItem` value or an
/// object deriving from `lunar.Item`.
pub(crate) fn item_from_lua(lua: &Lua, value: LuaValue) -> mlua::Result<Arc<dyn Item>> {
    match value {
        LuaValue::UserData(ud) => match ud.borrow::<ItemHandle>() {
            Ok(handle) => Ok(handle.0.clone()),
            Err(_) => Err(mlua::Error::runtime("expected an Item, got another userdata")),
        },
        LuaValue::Table(object) => {
            if !interpreter::is_instance(lua, &object, "Item")? {
                return Err(mlua::Error::runtime(
                    "expected an Item, got a table not deriving from lunar.Item",
                ));
            }
            let interp = Interpreter::from_lua(lua)?;
            let object = Foreign::new(object, interp.execution_lock().clone());
            Ok(Arc::new(ItemTrampoline::new(&interp, object)))
        }
        other => Err(mlua::Error::runtime(format!(
            "expected an Item, got {}",
            other.type_name()
        ))),
    }
}

fn sequence<T>(
    list: Table,
    mut convert: impl FnMut(LuaValue) -> mlua::Result<T>,
) -> mlua::Result<Vec<T>> {
    list.sequence_values::<LuaValue>()
        .map(|value| convert(value?))
        .collect()
}

pub(crate) fn items_from_lua(lua: &Lua, list: Table) -> mlua::Result<Vec<Arc<dyn Item>>> {
    sequence(list, |value| item_from_lua(lua, value))
}

pub(crate) fn rank_items_from_lua(list: Table) -> mlua::Result<Vec<RankItem>> {
    sequence(list, |value| match value {
        LuaValue::UserData(ud) => Ok(ud.borrow::<RankItemHandle>()?.0.clone()),
        other => Err(mlua::Error::runtime(format!(
            "expected a RankItem, got {}",
            other.type_name()
        ))),
    })
}

pub(crate) fn index_items_from_lua(list: Table) -> mlua::Result<Vec<IndexItem>> {
    sequence(list, |value| match value {
        LuaValue::UserData(ud) => Ok(ud.borrow::<IndexItemHandle>()?.0.clone()),
        other => Err(mlua::Error::runtime(format!(
            "expected an IndexItem, got {}",
            other.type_name()
        ))),
    })
}

pub(crate) fn actions_from_lua(list: Table) -> mlua::Result<Vec<Action>> {
    sequence(list, |value| match value {
        LuaValue::UserData(ud) => Ok(ud.borrow::<ActionHandle>()?.0.clone()),
        other => Err(mlua::Error::runtime(format!(
            "expected an Action, got {}",
            other.type_name()
        ))),
    })
}

pub(crate) fn icon_from_lua(value: LuaValue) -> mlua::Result<Option<Icon>> {
    match value {
        LuaValue::Nil => Ok(None),
        LuaValue::UserData(ud) => Ok(Some(ud.borrow::<IconHandle>()?.0.clone())),
        other => Err(mlua::Error::runtime(format!(
            "expected an icon, got {}",
            other.type_name()
        ))),
    }
}

pub(crate) fn rank_items_to_lua(lua: &Lua, items: Vec<RankItem>) -> mlua::Result<Table> {
    lua.create_sequence_from(items.into_iter().map(RankItemHandle))
}

/// The overriding function `name` of `object`, if any. Functions provided
/// by the host base classes do not count as overrides.
pub(crate) fn lookup_override(
    lua: &Lua,
    object: &Table,
    name: &str,
) -> mlua::Result<Option<Function>> {
    let LuaValue::Function(function) = object.get::<LuaValue>(name)? else {
        return Ok(None);
    };
    let defaults: Table = lua.named_registry_value(DEFAULTS_KEY)?;
    if defaults.raw_get::<bool>(function.clone())? {
        Ok(None)
    } else {
        Ok(Some(function))
    }
}

/// The plugin context of an instance, if it is a plugin instance.
pub(crate) fn plugin_context(object: &Table) -> mlua::Result<Option<UserDataRef<PluginContext>>> {
    match object.raw_get::<LuaValue>(PLUGIN_KEY)? {
        LuaValue::UserData(ud) => Ok(Some(ud.borrow::<PluginContext>()?)),
        _ => Ok(None),
    }
}

fn require_context(object: &Table) -> mlua::Result<UserDataRef<PluginContext>> {
    plugin_context(object)?
        .ok_or_else(|| mlua::Error::runtime("object is not a loaded plugin instance"))
}

/// The native state of a handler object, created on first use.
pub(crate) fn native_state(lua: &Lua, object: &Table) -> mlua::Result<AnyUserData> {
    match object.raw_get::<LuaValue>(NATIVE_KEY)? {
        LuaValue::UserData(ud) => Ok(ud),
        _ => {
            let ud = lua.create_userdata(NativeState::default())?;
            object.raw_set(NATIVE_KEY, ud.clone())?;
            Ok(ud)
        }
    }
}

fn setting_to_lua(lua: &Lua, value: SettingValue) -> mlua::Result<LuaValue> {
    Ok(match value {
        SettingValue::Bool(b) => LuaValue::Boolean(b),
        SettingValue::Int(i) => LuaValue::Integer(i),
        SettingValue::Float(f) => LuaValue::Number(f),
        SettingValue::String(s) => LuaValue::String(lua.create_string(&s)?),
    })
}

fn setting_from_lua(value: &LuaValue) -> Option<SettingValue> {
    match value {
        LuaValue::Boolean(b) => Some(SettingValue::Bool(*b)),
        LuaValue::Integer(i) => Some(SettingValue::Int(*i)),
        LuaValue::Number(f) => Some(SettingValue::Float(*f)),
        LuaValue::String(s) => Some(SettingValue::String(s.to_string_lossy())),
        _ => None,
    }
}

fn location(dir: &Path) -> mlua::Result<String> {
    std::fs::create_dir_all(dir).map_err(mlua::Error::external)?;
    Ok(dir.to_string_lossy().into_owned())
}

fn string_field(table: &Table, key: &str) -> mlua::Result<String> {
    Ok(table.get::<Option<String>>(key)?.unwrap_or_default())
}

/// Build the `lunar` module table.
pub(crate) fn install(lua: &Lua) -> mlua::Result<Table> {
    let module = lua.create_table()?;
    module.set("api_version", gate::interface_version())?;

    let defaults = lua.create_table()?;
    let weak_keys = lua.create_table()?;
    weak_keys.set("__mode", "k")?;
    interpreter::set_metatable(lua, &defaults, &weak_keys)?;
    lua.set_named_registry_value(DEFAULTS_KEY, defaults.clone())?;

    lua.load(PRELUDE)
        .set_name("=lunar")
        .call::<()>((module.clone(), defaults.clone()))?;

    install_values(lua, &module)?;
    install_plugin_instance(lua, &module, &defaults)?;
    install_handler_defaults(lua, &module, &defaults)?;

    Ok(module)
}

fn install_values(lua: &Lua, module: &Table) -> mlua::Result<()> {
    // lunar.StandardItem{id=, text=, subtext=, inputActionText=, icon=, actions=}
    let standard_item = lua.create_function(|_, spec: Table| {
        let text = string_field(&spec, "text")?;
        let input_action_text = spec.get::<Option<String>>("inputActionText")?;
        let mut item = StandardItem::new(string_field(&spec, "id")?, text.clone())
            .with_subtext(string_field(&spec, "subtext")?)
            .with_input_action_text(input_action_text.unwrap_or(text));
        if let Some(icon) = icon_from_lua(spec.get::<LuaValue>("icon")?)? {
            item = item.with_icon(icon);
        }
        if let Some(actions) = spec.get::<Option<Table>>("actions")? {
            item = item.with_actions(actions_from_lua(actions)?);
        }
        Ok(ItemHandle(Arc::new(item)))
    })?;
    module.set("StandardItem", standard_item)?;

    // lunar.Action(id, text, callback)
    let action = lua.create_function(|lua, (id, text, callback): (String, String, Function)| {
        let lock = Interpreter::from_lua(lua)?.execution_lock().clone();
        let callback = Foreign::new(callback, lock.clone());
        let action_id = id.clone();
        Ok(ActionHandle(Action::new(id, text, move || {
            let _guard = lock.acquire();
            if let Err(e) = callback.call::<()>(()) {
                tracing::warn!(action = %action_id, "Action failed: {e}");
            }
        })))
    })?;
    module.set("Action", action)?;

    // lunar.RankItem(item, score)
    let rank_item = lua.create_function(|lua, (item, score): (LuaValue, f64)| {
        Ok(RankItemHandle(RankItem::new(item_from_lua(lua, item)?, score)))
    })?;
    module.set("RankItem", rank_item)?;

    // lunar.IndexItem(item, string)
    let index_item = lua.create_function(|lua, (item, string): (LuaValue, String)| {
        Ok(IndexItemHandle(IndexItem::new(item_from_lua(lua, item)?, string)))
    })?;
    module.set("IndexItem", index_item)?;

    // lunar.MatchConfig{fuzzy=, ignore_case=, ignore_word_order=, ignore_diacritics=, separators=}
    let match_config = lua.create_function(|_, spec: Option<Table>| {
        let mut config = MatchConfig::default();
        if let Some(spec) = spec {
            config.fuzzy = spec.get::<Option<bool>>("fuzzy")?.unwrap_or(config.fuzzy);
            config.ignore_case = spec
                .get::<Option<bool>>("ignore_case")?
                .unwrap_or(config.ignore_case);
            config.ignore_word_order = spec
                .get::<Option<bool>>("ignore_word_order")?
                .unwrap_or(config.ignore_word_order);
            config.ignore_diacritics = spec
                .get::<Option<bool>>("ignore_diacritics")?
                .unwrap_or(config.ignore_diacritics);
            if let Some(separators) = spec.get::<Option<String>>("separators")? {
                config.separators = separators;
            }
        }
        Ok(MatchConfigHandle(config))
    })?;
    module.set("MatchConfig", match_config)?;

    // lunar.Matcher(string, config?)
    let matcher = lua.create_function(|_, (string, config): (String, Option<AnyUserData>)| {
        let config = match config {
            Some(ud) => ud.borrow::<MatchConfigHandle>()?.0.clone(),
            None => MatchConfig::default(),
        };
        Ok(MatcherHandle(Matcher::new(&string, config)))
    })?;
    module.set("Matcher", matcher)?;

    let icons: [(&str, fn(String) -> Icon); 4] = [
        ("makeImageIcon", |s| Icon::Image(PathBuf::from(s))),
        ("makeFileTypeIcon", |s| Icon::FileType(PathBuf::from(s))),
        ("makeThemeIcon", Icon::Theme),
        ("makeGraphemeIcon", Icon::Grapheme),
    ];
    for (name, make) in icons {
        let f = lua.create_function(move |_, source: String| Ok(IconHandle(make(source))))?;
        module.set(name, f)?;
    }

    Ok(())
}

fn add_default(defaults: &Table, class: &Table, name: &str, function: Function) -> mlua::Result<()> {
    defaults.raw_set(function.clone(), true)?;
    class.raw_set(name, function)
}

fn install_plugin_instance(lua: &Lua, module: &Table, defaults: &Table) -> mlua::Result<()> {
    let class: Table = module.get("PluginInstance")?;

    let id = lua.create_function(|_, this: Table| Ok(require_context(&this)?.id.clone()))?;
    add_default(defaults, &class, "id", id)?;

    let name = lua.create_function(|_, this: Table| Ok(require_context(&this)?.name.clone()))?;
    add_default(defaults, &class, "name", name)?;

    let description = lua.create_function(|_, this: Table| {
        Ok(require_context(&this)?.description.clone())
    })?;
    add_default(defaults, &class, "description", description)?;

    let cache = lua.create_function(|_, this: Table| location(&require_context(&this)?.cache_dir))?;
    add_default(defaults, &class, "cacheLocation", cache)?;

    let config = lua.create_function(|_, this: Table| location(&require_context(&this)?.config_dir))?;
    add_default(defaults, &class, "configLocation", config)?;

    let data = lua.create_function(|_, this: Table| location(&require_context(&this)?.data_dir))?;
    add_default(defaults, &class, "dataLocation", data)?;

    // self:readConfig(key, type) -> value | nil
    let read_config = lua.create_function(|lua, (this, key, kind): (Table, String, String)| {
        let context = require_context(&this)?;
        let Some(kind) = SettingKind::from_name(&kind) else {
            tracing::warn!(plugin = %context.id, "readConfig: unsupported type '{kind}'");
            return Ok(LuaValue::Nil);
        };
        match context.settings.value(&context.id, &key).and_then(|v| v.convert(kind)) {
            Some(value) => setting_to_lua(lua, value),
            None => Ok(LuaValue::Nil),
        }
    })?;
    add_default(defaults, &class, "readConfig", read_config)?;

    // self:writeConfig(key, value)
    let write_config = lua.create_function(|_, (this, key, value): (Table, String, LuaValue)| {
        let context = require_context(&this)?;
        match setting_from_lua(&value) {
            Some(value) => context.settings.set_value(&context.id, &key, value),
            None => tracing::warn!(
                plugin = %context.id,
                "writeConfig: unsupported value type '{}' for '{key}'",
                value.type_name()
            ),
        }
        Ok(())
    })?;
    add_default(defaults, &class, "writeConfig", write_config)?;

    // Default extensions(): the instance itself if it is an extension.
    let extensions = lua.create_function(|lua, this: Table| {
        let list = lua.create_table()?;
        if interpreter::is_instance(lua, &this, "Extension")? {
            list.raw_set(1, this)?;
        }
        Ok(list)
    })?;
    add_default(defaults, &class, "extensions", extensions)?;

    Ok(())
}

fn install_handler_defaults(lua: &Lua, module: &Table, defaults: &Table) -> mlua::Result<()> {
    let query_handler: Table = module.get("QueryHandler")?;

    let set_trigger = lua.create_function(|lua, (this, trigger): (Table, String)| {
        native_state(lua, &this)?.borrow_mut::<NativeState>()?.trigger = Some(trigger);
        Ok(())
    })?;
    add_default(defaults, &query_handler, "setTrigger", set_trigger)?;

    // self:trigger(): the trigger last set by the host, or nil
    let trigger = lua.create_function(|lua, this: Table| {
        Ok(native_state(lua, &this)?.borrow::<NativeState>()?.trigger.clone())
    })?;
    add_default(defaults, &query_handler, "trigger", trigger)?;

    let set_fuzzy = lua.create_function(|lua, (this, enabled): (Table, bool)| {
        native_state(lua, &this)?
            .borrow_mut::<NativeState>()?
            .index
            .set_fuzzy(enabled);
        Ok(())
    })?;
    add_default(defaults, &query_handler, "setFuzzyMatching", set_fuzzy)?;

    let index_handler: Table = module.get("IndexQueryHandler")?;

    // self:setIndexItems({IndexItem...})
    let set_index_items = lua.create_function(|lua, (this, items): (Table, Table)| {
        let items = index_items_from_lua(items)?;
        native_state(lua, &this)?
            .borrow_mut::<NativeState>()?
            .index
            .set_items(items);
        Ok(())
    })?;
    add_default(defaults, &index_handler, "setIndexItems", set_index_items)?;

    // self:rankItems(ctx) searching the index
    let rank_items = lua.create_function(|lua, (this, context): (Table, AnyUserData)| {
        let query = context.borrow::<ContextHandle>()?.0.query().to_string();
        let ranked = native_state(lua, &this)?
            .borrow::<NativeState>()?
            .index
            .search(&query);
        rank_items_to_lua(lua, ranked)
    })?;
    add_default(defaults, &index_handler, "rankItems", rank_items)?;

    Ok(())
}
