//! Pull-based batch sequences for streaming query results.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::error::ExtensionResult;
use crate::item::{Item, RankItem};

/// One lazily produced chunk of results.
pub type Batch = Vec<Arc<dyn Item>>;

/// Number of items per batch handed out by [`LazySortedBatches`] unless
/// configured otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// A resumable sequence of result batches.
///
/// The host pulls one batch at a time; producers do no work for batches that
/// are never requested. An `Err` item reports a failure of the producer.
pub struct ItemGenerator {
    inner: Box<dyn Iterator<Item = ExtensionResult<Batch>> + Send>,
}

impl ItemGenerator {
    pub fn new(batches: impl Iterator<Item = ExtensionResult<Batch>> + Send + 'static) -> Self {
        Self {
            inner: Box::new(batches),
        }
    }
}

impl Iterator for ItemGenerator {
    type Item = ExtensionResult<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

impl fmt::Debug for ItemGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemGenerator").finish_non_exhaustive()
    }
}

/// Ranked items handed out best-first, one batch per pull.
///
/// Only the batch being handed out is sorted; the tail stays partitioned
/// until it is requested. Equal scores keep their input order.
pub struct LazySortedBatches {
    ranked: Vec<(usize, RankItem)>,
    cursor: usize,
    batch_size: usize,
}

impl LazySortedBatches {
    pub fn new(ranked: Vec<RankItem>, batch_size: usize) -> Self {
        Self {
            ranked: ranked.into_iter().enumerate().collect(),
            cursor: 0,
            batch_size: batch_size.max(1),
        }
    }

    fn order(a: &(usize, RankItem), b: &(usize, RankItem)) -> Ordering {
        b.1.score.total_cmp(&a.1.score).then_with(|| a.0.cmp(&b.0))
    }
}

impl Iterator for LazySortedBatches {
    type Item = ExtensionResult<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        let tail = &mut self.ranked[self.cursor..];
        if tail.is_empty() {
            return None;
        }

        let n = self.batch_size.min(tail.len());
        if n < tail.len() {
            tail.select_nth_unstable_by(n - 1, Self::order);
        }
        tail[..n].sort_unstable_by(Self::order);

        let batch = tail[..n].iter().map(|(_, r)| r.item.clone()).collect();
        self.cursor += n;
        Some(Ok(batch))
    }
}
