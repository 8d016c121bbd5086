//! Stage-graph runtime.
//!
//! A chain is a directed acyclic graph of [`Stage`]s connected by bounded
//! record queues. [`Graph::run_chain`] starts one thread per stage; each
//! stage pulls from its input edges and pushes to its output edges, with
//! back-pressure coming from the queues' capacity.
//!
//! Headers propagate root-to-leaf before any record flows: each stage's
//! [`Stage::header`] is called once with its sources' headers, in
//! topological order.
//!
//! # Cancellation
//!
//! The first stage to fail stores its error, sets the chain-wide abort flag,
//! and closes its edges. Closing cascades: a neighbor blocked on a closed
//! queue wakes, observes the end of its stream, and exits, so every thread
//! joins within a bounded time of its upstream closing. The stored error is
//! returned from `run_chain`.

mod merger;
mod splitter;
mod stages;

pub use merger::SortedMergerStage;
pub use splitter::SplitterStage;
pub use stages::{MarkDuplicatesStage, ReaderStage, SortStage, WriterStage};

use crate::errors::{EngineError, Result};
use crate::header::Header;
use crate::queue::BoundedQueue;
use crate::record::Record;
use log::debug;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A record-carrying edge between two stages.
pub type Edge = Arc<BoundedQueue<Record>>;

/// Chain-wide cooperative cancellation flag.
#[derive(Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    /// Raises the flag.
    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// True once any stage has failed.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Everything a running stage needs: its edges and the abort flag.
pub struct StageContext {
    /// Input edges, in connection order.
    pub inputs: Vec<Edge>,
    /// Output edges, in connection order.
    pub outputs: Vec<Edge>,
    /// Chain-wide abort flag, checked between records.
    pub abort: AbortFlag,
}

impl StageContext {
    /// Pulls the next record from the sole input edge.
    ///
    /// Returns `None` at end of stream or when the chain is aborting.
    pub fn pull(&self) -> Option<Record> {
        if self.abort.is_set() {
            return None;
        }
        self.inputs.first()?.pop()
    }

    /// Pulls from input edge `i`.
    pub fn pull_from(&self, i: usize) -> Option<Record> {
        if self.abort.is_set() {
            return None;
        }
        self.inputs.get(i)?.pop()
    }

    /// Moves a record to the sole output edge.
    pub fn emit(&self, record: Record) -> Result<()> {
        self.emit_to(0, record)
    }

    /// Moves a record to output edge `i`.
    pub fn emit_to(&self, i: usize, record: Record) -> Result<()> {
        if self.abort.is_set() {
            return Err(EngineError::graph("chain", "aborting"));
        }
        let edge = self
            .outputs
            .get(i)
            .ok_or_else(|| EngineError::graph("chain", format!("no output edge {i}")))?;
        edge.push(record).map_err(|_| EngineError::graph("chain", "downstream closed"))
    }

    fn close_all(&self) {
        for edge in self.inputs.iter().chain(&self.outputs) {
            edge.close();
        }
    }
}

/// A node in the processing graph.
///
/// Stages produce (no inputs), transform (inputs and outputs), or consume
/// (no outputs) records. A stage owns whatever I/O it performs.
pub trait Stage: Send {
    /// Stage name, used in thread names and diagnostics.
    fn name(&self) -> &str;

    /// Computes this stage's output header from its sources' headers.
    ///
    /// Called once, before any record flows. Source stages receive an empty
    /// slice; fan-in stages receive one header per source in connection
    /// order.
    fn header(&mut self, upstream: &[Header]) -> Result<Header>;

    /// Moves records until the stream ends or the chain aborts.
    fn run(&mut self, ctx: &StageContext) -> Result<()>;
}

/// Identifier returned by [`Graph::add_stage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageId(usize);

/// A stage graph under construction.
pub struct Graph {
    stages: Vec<Box<dyn Stage>>,
    edges: Vec<(usize, usize)>,
    edge_capacity: usize,
}

impl Graph {
    /// Creates an empty graph whose edges hold up to `edge_capacity` records.
    #[must_use]
    pub fn new(edge_capacity: usize) -> Self {
        Self { stages: Vec::new(), edges: Vec::new(), edge_capacity: edge_capacity.max(1) }
    }

    /// Adds a stage, returning its id for wiring.
    pub fn add_stage(&mut self, stage: Box<dyn Stage>) -> StageId {
        self.stages.push(stage);
        StageId(self.stages.len() - 1)
    }

    /// Connects `from`'s next output edge to `to`'s next input edge.
    pub fn connect(&mut self, from: StageId, to: StageId) {
        self.edges.push((from.0, to.0));
    }

    /// Runs the chain to completion.
    ///
    /// Spawns a thread per stage and blocks until every stage finishes.
    /// Returns the first error any stage produced.
    pub fn run_chain(self) -> Result<()> {
        if self.stages.is_empty() {
            return Err(EngineError::graph("chain", "no stages"));
        }
        for &(from, to) in &self.edges {
            if from >= self.stages.len() || to >= self.stages.len() {
                return Err(EngineError::graph("chain", "edge references unknown stage"));
            }
            if from == to {
                return Err(EngineError::graph("chain", "self edge"));
            }
        }

        let order = self.topological_order()?;

        // One queue per edge.
        let queues: Vec<Edge> = self
            .edges
            .iter()
            .map(|_| Arc::new(BoundedQueue::new(self.edge_capacity)))
            .collect();

        let mut inputs: Vec<Vec<Edge>> = vec![Vec::new(); self.stages.len()];
        let mut outputs: Vec<Vec<Edge>> = vec![Vec::new(); self.stages.len()];
        let mut source_ids: Vec<Vec<usize>> = vec![Vec::new(); self.stages.len()];
        for (edge_idx, &(from, to)) in self.edges.iter().enumerate() {
            outputs[from].push(Arc::clone(&queues[edge_idx]));
            inputs[to].push(Arc::clone(&queues[edge_idx]));
            source_ids[to].push(from);
        }

        let mut stages = self.stages;

        // Propagate headers root-to-leaf before any thread starts.
        let mut headers: Vec<Option<Header>> = vec![None; stages.len()];
        for &id in &order {
            let upstream: Vec<Header> = source_ids[id]
                .iter()
                .map(|&src| headers[src].clone().expect("topological order"))
                .collect();
            headers[id] = Some(stages[id].header(&upstream)?);
        }

        let abort = AbortFlag::default();
        let first_error: Arc<Mutex<Option<EngineError>>> = Arc::new(Mutex::new(None));

        let mut handles = Vec::with_capacity(stages.len());
        let mut input_iter = inputs.into_iter();
        let mut output_iter = outputs.into_iter();
        for (id, mut stage) in stages.drain(..).enumerate() {
            let ctx = StageContext {
                inputs: input_iter.next().expect("one entry per stage"),
                outputs: output_iter.next().expect("one entry per stage"),
                abort: abort.clone(),
            };
            let abort = abort.clone();
            let first_error = Arc::clone(&first_error);
            let spawned = std::thread::Builder::new()
                .name(format!("stage-{}", stage.name()))
                .spawn(move || {
                    let result = stage.run(&ctx);
                    if let Err(e) = result {
                        debug!("stage '{}' failed: {e}", stage.name());
                        let mut slot = first_error.lock();
                        if slot.is_none() {
                            *slot = Some(e);
                        }
                        abort.set();
                    }
                    ctx.close_all();
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    // Unblock whatever already started, then join it.
                    for queue in &queues {
                        queue.close();
                    }
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(EngineError::resource(format!(
                        "cannot spawn thread for stage {id}: {e}"
                    )));
                }
            }
        }

        for handle in handles {
            let _ = handle.join();
        }

        match Arc::try_unwrap(first_error) {
            Ok(slot) => match slot.into_inner() {
                Some(err) => Err(err),
                None => Ok(()),
            },
            Err(shared) => {
                let taken = shared.lock().take();
                match taken {
                    Some(err) => Err(err),
                    None => Ok(()),
                }
            }
        }
    }

    /// Kahn topological order; errors on cycles.
    fn topological_order(&self) -> Result<Vec<usize>> {
        let n = self.stages.len();
        let mut indegree = vec![0usize; n];
        for &(_, to) in &self.edges {
            indegree[to] += 1;
        }
        let mut ready: Vec<usize> =
            (0..n).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(id) = ready.pop() {
            order.push(id);
            for &(from, to) in &self.edges {
                if from == id {
                    indegree[to] -= 1;
                    if indegree[to] == 0 {
                        ready.push(to);
                    }
                }
            }
        }
        if order.len() != n {
            return Err(EngineError::graph("chain", "cycle in stage graph"));
        }
        Ok(order)
    }
}
