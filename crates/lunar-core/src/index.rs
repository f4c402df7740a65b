//! Item index backing index query handlers.

use std::collections::HashMap;
use std::sync::Arc;

use crate::item::{IndexItem, Item, RankItem};
use crate::matcher::{MatchConfig, Matcher};

/// Searchable set of `(item, lookup string)` pairs.
///
/// An item may be indexed under several strings. A search reports each
/// item once, with the best score among its strings.
#[derive(Clone, Default)]
pub struct ItemIndex {
    items: Vec<IndexItem>,
    config: MatchConfig,
}

impl ItemIndex {
    pub fn new(config: MatchConfig) -> Self {
        Self {
            items: Vec::new(),
            config,
        }
    }

    /// Replace the indexed content.
    pub fn set_items(&mut self, items: Vec<IndexItem>) {
        self.items = items;
    }

    pub fn set_fuzzy(&mut self, fuzzy: bool) {
        self.config.fuzzy = fuzzy;
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Score the indexed items against `query`, in index order.
    pub fn search(&self, query: &str) -> Vec<RankItem> {
        let matcher = Matcher::new(query, self.config.clone());
        let mut seen: HashMap<*const (), usize> = HashMap::new();
        let mut results: Vec<RankItem> = Vec::new();

        for entry in &self.items {
            let m = matcher.match_str(&entry.string);
            if !m.is_match() {
                continue;
            }

            let key = Arc::as_ptr(&entry.item) as *const ();
            match seen.get(&key) {
                Some(&pos) => {
                    if m.score() > results[pos].score {
                        results[pos].score = m.score();
                    }
                }
                None => {
                    seen.insert(key, results.len());
                    results.push(RankItem::new(Arc::clone(&entry.item), m.score()));
                }
            }
        }

        results
    }
}

impl std::fmt::Debug for ItemIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemIndex")
            .field("len", &self.items.len())
            .field("config", &self.config)
            .finish()
    }
}

/// Shorthand used by handlers indexing plain items under their text.
pub fn index_by_text(items: &[Arc<dyn Item>]) -> Vec<IndexItem> {
    items
        .iter()
        .filter_map(|item| Some(IndexItem::new(Arc::clone(item), item.text().ok()?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::StandardItem;

    fn item(id: &str) -> Arc<dyn Item> {
        Arc::new(StandardItem::new(id, id))
    }

    #[test]
    fn test_search_dedupes_items() {
        let firefox = item("firefox");
        let mut index = ItemIndex::default();
        index.set_items(vec![
            IndexItem::new(Arc::clone(&firefox), "firefox web browser"),
            IndexItem::new(Arc::clone(&firefox), "web"),
            IndexItem::new(item("chromium"), "chromium"),
        ]);

        let results = index.search("web");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].item.id().unwrap(), "firefox");
        assert_eq!(results[0].score, 1.0);
    }

    #[test]
    fn test_fuzzy_toggle() {
        let mut index = ItemIndex::default();
        index.set_items(index_by_text(&[item("terminal")]));
        assert!(index.search("termnal").is_empty());

        index.set_fuzzy(true);
        assert_eq!(index.search("termnal").len(), 1);
    }
}
