//! Fan-in stage merging individually sorted sources.

use crate::errors::{EngineError, Result};
use crate::graph::{Stage, StageContext};
use crate::header::Header;
use crate::record::Record;
use crate::sort::keys::{CoordinateKey, QuerynameKey, SortKey, SortOrder};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// K-way merge over live sources.
///
/// Precondition: every source is individually sorted under the configured
/// order. The output is then sorted under the same order, with key ties
/// broken by source index for determinism.
pub struct SortedMergerStage {
    order: SortOrder,
}

impl SortedMergerStage {
    /// Creates a merger for the given order.
    #[must_use]
    pub fn new(order: SortOrder) -> Self {
        Self { order }
    }
}

impl Stage for SortedMergerStage {
    fn name(&self) -> &str {
        "sorted-merger"
    }

    fn header(&mut self, upstream: &[Header]) -> Result<Header> {
        upstream
            .first()
            .cloned()
            .ok_or_else(|| EngineError::graph("sorted-merger", "missing source"))
    }

    fn run(&mut self, ctx: &StageContext) -> Result<()> {
        match self.order {
            SortOrder::Coordinate => merge::<CoordinateKey>(ctx),
            SortOrder::Queryname => merge::<QuerynameKey>(ctx),
        }
    }
}

struct Head<K> {
    key: K,
    source: usize,
    record: Record,
}

impl<K: Ord> PartialEq for Head<K> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl<K: Ord> Eq for Head<K> {}

impl<K: Ord> PartialOrd for Head<K> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Ord> Ord for Head<K> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key).then_with(|| self.source.cmp(&other.source))
    }
}

fn merge<K: SortKey>(ctx: &StageContext) -> Result<()> {
    if ctx.inputs.is_empty() {
        return Err(EngineError::graph("sorted-merger", "no sources"));
    }

    // Seed with each source's current head; a source with no records simply
    // never enters the heap.
    let mut heap: BinaryHeap<Reverse<Head<K>>> = BinaryHeap::with_capacity(ctx.inputs.len());
    for source in 0..ctx.inputs.len() {
        if let Some(record) = ctx.pull_from(source) {
            heap.push(Reverse(Head { key: K::from_record(&record), source, record }));
        }
    }

    while let Some(Reverse(head)) = heap.pop() {
        let source = head.source;
        ctx.emit(head.record)?;
        if let Some(record) = ctx.pull_from(source) {
            heap.push(Reverse(Head { key: K::from_record(&record), source, record }));
        }
    }
    Ok(())
}
