//! Extension interfaces the host dispatches to.
//!
//! The interfaces form a capability hierarchy: each trait carries every
//! obligation of its supertraits. Hosts hold extensions as
//! `Arc<dyn Extension>` and discover wider capabilities through the `as_*`
//! accessors.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::ExtensionResult;
use crate::generator::{ItemGenerator, LazySortedBatches};
use crate::item::{IndexItem, Item, RankItem};

/// The query an extension is asked to handle.
pub trait QueryContext: Send + Sync {
    /// The trigger that routed the query to the handler (empty for global queries).
    fn trigger(&self) -> &str;

    /// The query string without the trigger.
    fn query(&self) -> &str;

    /// False once the host has abandoned the query.
    fn is_valid(&self) -> bool;
}

/// A simple query context.
#[derive(Debug, Clone)]
pub struct Query {
    trigger: String,
    string: String,
    valid: Arc<AtomicBool>,
}

impl Query {
    /// Create a valid query.
    pub fn new(trigger: impl Into<String>, string: impl Into<String>) -> Self {
        Self {
            trigger: trigger.into(),
            string: string.into(),
            valid: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Mark the query (and every clone of it) as abandoned.
    pub fn cancel(&self) {
        self.valid.store(false, Ordering::Release);
    }
}

impl QueryContext for Query {
    fn trigger(&self) -> &str {
        &self.trigger
    }

    fn query(&self) -> &str {
        &self.string
    }

    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }
}

/// Anything the host can list as an extension.
pub trait Extension: Send + Sync {
    fn id(&self) -> ExtensionResult<String>;

    fn name(&self) -> ExtensionResult<String>;

    fn description(&self) -> ExtensionResult<String>;

    fn as_query_handler(&self) -> Option<&dyn QueryHandler> {
        None
    }

    fn as_generator_query_handler(&self) -> Option<&dyn GeneratorQueryHandler> {
        None
    }

    fn as_ranked_query_handler(&self) -> Option<&dyn RankedQueryHandler> {
        None
    }

    fn as_global_query_handler(&self) -> Option<&dyn GlobalQueryHandler> {
        None
    }

    fn as_index_query_handler(&self) -> Option<&dyn IndexQueryHandler> {
        None
    }

    fn as_fallback_handler(&self) -> Option<&dyn FallbackHandler> {
        None
    }
}

/// An extension that handles triggered queries.
pub trait QueryHandler: Extension {
    /// Usage hint shown while typing a query.
    fn synopsis(&self, _query: &str) -> ExtensionResult<String> {
        Ok(String::new())
    }

    /// Whether the user may change the trigger.
    fn allow_trigger_remap(&self) -> ExtensionResult<bool> {
        Ok(true)
    }

    fn default_trigger(&self) -> ExtensionResult<String> {
        Ok(format!("{} ", self.id()?))
    }

    /// Notification that the user configured a trigger.
    fn set_trigger(&self, _trigger: &str) -> ExtensionResult<()> {
        Ok(())
    }

    fn supports_fuzzy_matching(&self) -> ExtensionResult<bool> {
        Ok(false)
    }

    fn set_fuzzy_matching(&self, _enabled: bool) -> ExtensionResult<()> {
        Ok(())
    }
}

/// A query handler producing results as a lazy sequence of batches.
pub trait GeneratorQueryHandler: QueryHandler {
    fn items(&self, context: Arc<dyn QueryContext>) -> ExtensionResult<ItemGenerator>;
}

/// A query handler scoring all of its results up front.
///
/// Implementors usually produce `items` through [`ranked_items`].
pub trait RankedQueryHandler: GeneratorQueryHandler {
    fn rank_items(&self, context: Arc<dyn QueryContext>) -> ExtensionResult<Vec<RankItem>>;
}

/// A ranked handler that also takes part in the global (untriggered) query.
pub trait GlobalQueryHandler: RankedQueryHandler {}

/// A global handler backed by an item index the host helps maintain.
pub trait IndexQueryHandler: GlobalQueryHandler {
    /// Rebuild the index, usually by calling `set_index_items`.
    fn update_index_items(&self) -> ExtensionResult<()>;

    /// Replace the indexed content.
    fn set_index_items(&self, items: Vec<IndexItem>) -> ExtensionResult<()>;
}

/// An extension offering results when nothing else matched.
pub trait FallbackHandler: Extension {
    fn fallbacks(&self, query: &str) -> ExtensionResult<Vec<Arc<dyn Item>>>;
}

/// The root object of a loaded plugin.
pub trait PluginInstance: Send + Sync {
    fn extensions(&self) -> ExtensionResult<Vec<Arc<dyn Extension>>>;
}

/// Default `items` of a ranked handler: score everything, then hand the
/// results out best-first in batches of `batch_size`.
pub fn ranked_items(
    handler: &(impl RankedQueryHandler + ?Sized),
    context: Arc<dyn QueryContext>,
    batch_size: usize,
) -> ExtensionResult<ItemGenerator> {
    let ranked = handler.rank_items(context)?;
    Ok(ItemGenerator::new(LazySortedBatches::new(ranked, batch_size)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtensionError;

    struct Echo;

    impl Extension for Echo {
        fn id(&self) -> ExtensionResult<String> {
            Ok("echo".into())
        }

        fn name(&self) -> ExtensionResult<String> {
            Ok("Echo".into())
        }

        fn description(&self) -> ExtensionResult<String> {
            Err(ExtensionError::Unavailable)
        }

        fn as_query_handler(&self) -> Option<&dyn QueryHandler> {
            Some(self)
        }
    }

    impl QueryHandler for Echo {}

    #[test]
    fn test_query_handler_defaults() {
        let echo = Echo;
        let handler = echo.as_query_handler().unwrap();

        assert_eq!(handler.default_trigger().unwrap(), "echo ");
        assert!(handler.allow_trigger_remap().unwrap());
        assert!(!handler.supports_fuzzy_matching().unwrap());
        assert_eq!(handler.synopsis("x").unwrap(), "");
        assert!(echo.as_fallback_handler().is_none());
    }

    #[test]
    fn test_query_cancel_is_shared() {
        let query = Query::new("echo ", "hello");
        let clone = query.clone();
        assert!(clone.is_valid());

        query.cancel();
        assert!(!clone.is_valid());
        assert_eq!(clone.query(), "hello");
    }
}
