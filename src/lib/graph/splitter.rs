//! Fan-out stage partitioning a stream across several sinks.

use crate::errors::{EngineError, Result};
use crate::graph::{Stage, StageContext};
use crate::header::Header;
use crate::record::Record;

/// Key function mapping a record to a partition number (taken mod the sink
/// count).
pub type SplitKeyFn = Box<dyn Fn(&Record) -> usize + Send>;

/// Routes each record to exactly one sink, deterministically by key.
///
/// Ordering within each sink follows the input; no ordering holds across
/// sinks.
pub struct SplitterStage {
    key: SplitKeyFn,
}

impl SplitterStage {
    /// Splits by reference id (unmapped records go to partition 0).
    #[must_use]
    pub fn by_reference() -> Self {
        Self::with_key(Box::new(|record| record.ref_id().max(0) as usize))
    }

    /// Splits by an explicit key function.
    #[must_use]
    pub fn with_key(key: SplitKeyFn) -> Self {
        Self { key }
    }
}

impl Stage for SplitterStage {
    fn name(&self) -> &str {
        "splitter"
    }

    fn header(&mut self, upstream: &[Header]) -> Result<Header> {
        upstream
            .first()
            .cloned()
            .ok_or_else(|| EngineError::graph("splitter", "missing source"))
    }

    fn run(&mut self, ctx: &StageContext) -> Result<()> {
        let sinks = ctx.outputs.len();
        if sinks == 0 {
            return Err(EngineError::graph("splitter", "no sinks"));
        }
        while let Some(record) = ctx.pull() {
            let partition = (self.key)(&record) % sinks;
            ctx.emit_to(partition, record)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::record::RecordBuilder;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct VecSource {
        records: Vec<Record>,
    }

    impl Stage for VecSource {
        fn name(&self) -> &str {
            "vec-source"
        }

        fn header(&mut self, _upstream: &[Header]) -> Result<Header> {
            Ok(Header::default())
        }

        fn run(&mut self, ctx: &StageContext) -> Result<()> {
            for record in self.records.drain(..) {
                ctx.emit(record)?;
            }
            Ok(())
        }
    }

    struct VecSink {
        out: Arc<Mutex<Vec<Record>>>,
    }

    impl Stage for VecSink {
        fn name(&self) -> &str {
            "vec-sink"
        }

        fn header(&mut self, upstream: &[Header]) -> Result<Header> {
            Ok(upstream.first().cloned().unwrap_or_default())
        }

        fn run(&mut self, ctx: &StageContext) -> Result<()> {
            while let Some(record) = ctx.pull() {
                self.out.lock().push(record);
            }
            Ok(())
        }
    }

    #[test]
    fn test_split_by_ref_id_mod_two() {
        let records: Vec<Record> = (0..100)
            .map(|i| RecordBuilder::new().name(&format!("r{i}")).ref_id(i % 4).pos(i).build())
            .collect();

        let mut graph = Graph::new(16);
        let source = graph.add_stage(Box::new(VecSource { records }));
        let splitter = graph.add_stage(Box::new(SplitterStage::with_key(Box::new(|r| {
            r.ref_id().max(0) as usize
        }))));
        let even = Arc::new(Mutex::new(Vec::new()));
        let odd = Arc::new(Mutex::new(Vec::new()));
        let sink_even = graph.add_stage(Box::new(VecSink { out: Arc::clone(&even) }));
        let sink_odd = graph.add_stage(Box::new(VecSink { out: Arc::clone(&odd) }));
        graph.connect(source, splitter);
        graph.connect(splitter, sink_even);
        graph.connect(splitter, sink_odd);
        graph.run_chain().unwrap();

        let even = even.lock();
        let odd = odd.lock();
        assert_eq!(even.len() + odd.len(), 100);
        assert!(even.iter().all(|r| r.ref_id() % 2 == 0));
        assert!(odd.iter().all(|r| r.ref_id() % 2 == 1));

        // Per-sink order matches input order.
        for sink in [&even, &odd] {
            for window in sink.windows(2) {
                assert!(window[0].pos() < window[1].pos());
            }
        }
    }

    #[test]
    fn test_unmapped_routes_to_partition_zero() {
        let splitter = SplitterStage::by_reference();
        let unmapped = RecordBuilder::new()
            .name("u")
            .flags(crate::record::flags::UNMAPPED)
            .build();
        assert_eq!((splitter.key)(&unmapped), 0);
    }
}
