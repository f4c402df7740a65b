//! Core types and traits for lunar.
//!
//! This crate provides the host-side interfaces that extensions implement
//! (query handlers, fallback handlers, plugin instances) together with the
//! value types that cross the extension boundary: items, actions, ranked and
//! indexed items, and the pull-based batch sequence used for streaming
//! query results.

mod error;
mod generator;
mod handler;
mod index;
mod item;
mod matcher;
mod settings;

pub use error::{ExtensionError, ExtensionResult};
pub use generator::{Batch, DEFAULT_BATCH_SIZE, ItemGenerator, LazySortedBatches};
pub use handler::{
    Extension, FallbackHandler, GeneratorQueryHandler, GlobalQueryHandler, IndexQueryHandler,
    PluginInstance, Query, QueryContext, QueryHandler, RankedQueryHandler, ranked_items,
};
pub use index::{ItemIndex, index_by_text};
pub use item::{Action, Icon, IndexItem, Item, RankItem, StandardItem};
pub use matcher::{DEFAULT_SEPARATORS, Match, MatchConfig, MatchConfigBuilder, Matcher};
pub use settings::{MemorySettings, SettingKind, SettingValue, Settings};
