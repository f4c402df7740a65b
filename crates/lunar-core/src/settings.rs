//! Per-extension persistent settings.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// A stored setting value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

/// The type a caller asks a setting to be read as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKind {
    Bool,
    Int,
    Float,
    String,
}

impl SettingKind {
    /// Parse a type name as used by scripts ("boolean", "integer", ...).
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "boolean" | "bool" => Some(Self::Bool),
            "integer" | "int" => Some(Self::Int),
            "number" | "float" => Some(Self::Float),
            "string" | "str" => Some(Self::String),
            _ => None,
        }
    }
}

impl fmt::Display for SettingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bool => "boolean",
            Self::Int => "integer",
            Self::Float => "number",
            Self::String => "string",
        })
    }
}

impl SettingValue {
    pub fn kind(&self) -> SettingKind {
        match self {
            Self::Bool(_) => SettingKind::Bool,
            Self::Int(_) => SettingKind::Int,
            Self::Float(_) => SettingKind::Float,
            Self::String(_) => SettingKind::String,
        }
    }

    /// Convert to `kind`, returning `None` when the value does not fit.
    pub fn convert(&self, kind: SettingKind) -> Option<SettingValue> {
        Some(match (self, kind) {
            (v, k) if v.kind() == k => v.clone(),
            (Self::Int(i), SettingKind::Float) => Self::Float(*i as f64),
            (Self::Float(f), SettingKind::Int) if f.fract() == 0.0 => Self::Int(*f as i64),
            (Self::Bool(b), SettingKind::String) => Self::String(b.to_string()),
            (Self::Int(i), SettingKind::String) => Self::String(i.to_string()),
            (Self::Float(f), SettingKind::String) => Self::String(f.to_string()),
            (Self::String(s), SettingKind::Bool) => Self::Bool(s.parse().ok()?),
            (Self::String(s), SettingKind::Int) => Self::Int(s.parse().ok()?),
            (Self::String(s), SettingKind::Float) => Self::Float(s.parse().ok()?),
            _ => return None,
        })
    }
}

/// Settings storage keyed by extension id and key.
pub trait Settings: Send + Sync {
    fn value(&self, group: &str, key: &str) -> Option<SettingValue>;

    fn set_value(&self, group: &str, key: &str, value: SettingValue);
}

/// In-memory settings store.
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: RwLock<HashMap<String, HashMap<String, SettingValue>>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Settings for MemorySettings {
    fn value(&self, group: &str, key: &str) -> Option<SettingValue> {
        self.values.read().get(group)?.get(key).cloned()
    }

    fn set_value(&self, group: &str, key: &str, value: SettingValue) {
        self.values
            .write()
            .entry(group.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }
}
