//! Mark (or remove) duplicate records.

use anyhow::Result;
use bamflow_lib::graph::{
    Graph, MarkDuplicatesStage, ReaderStage, SortedMergerStage, SplitterStage, WriterStage,
};
use bamflow_lib::logging::OperationTimer;
use bamflow_lib::sort::SortOrder;
use bamflow_lib::validation::validate_file_exists;
use clap::Parser;
use log::info;
use std::path::PathBuf;

use crate::commands::command::Command;
use crate::commands::common::EngineOptions;

/// Most chains worth running in the split pipeline.
const MAX_CHAINS: usize = 12;

/// Mark duplicate reads in a BAM file.
///
/// On multi-core machines the stream is split by reference across several
/// duplicate-marking chains whose outputs are merged back into coordinate
/// order; with threading disabled (or too few cores) a single chain runs
/// instead.
#[derive(Debug, Parser)]
#[command(name = "dedup", about = "Mark or remove duplicate reads")]
pub struct Dedup {
    /// Input BAM file (coordinate-sorted).
    pub input: PathBuf,

    /// Output BAM file.
    #[arg(short = 'o', long = "out")]
    pub out: PathBuf,

    /// Remove duplicates instead of flagging them.
    #[arg(short = 'r', long = "remove")]
    pub remove: bool,

    /// Disable split-by-reference parallelism.
    #[arg(long = "nosplit")]
    pub nosplit: bool,

    #[command(flatten)]
    pub engine: EngineOptions,
}

impl Command for Dedup {
    fn execute(&self, command_line: &str) -> Result<()> {
        validate_file_exists(&self.input, "Input BAM")?;
        let config = self.engine.engine_config();
        let chains = MAX_CHAINS.min(config.threads / 2);

        info!("Input: {}", self.input.display());
        info!("Output: {}", self.out.display());

        let timer = OperationTimer::new("Marking duplicates");

        let mut graph = Graph::new(config.edge_capacity);
        let reader = graph
            .add_stage(Box::new(ReaderStage::open(&self.input, !config.single_threaded())?));
        let mut writer = WriterStage::new(&self.out, config.compression_level);
        if config.provenance {
            writer = writer.provenance(crate::VERSION, command_line);
        }
        let writer = graph.add_stage(Box::new(writer));

        if config.single_threaded() || self.nosplit || chains <= 1 {
            let dedup = graph.add_stage(Box::new(MarkDuplicatesStage::new(self.remove)));
            graph.connect(reader, dedup);
            graph.connect(dedup, writer);
        } else {
            info!("Splitting across {chains} duplicate-marking chains");
            let splitter = graph.add_stage(Box::new(SplitterStage::by_reference()));
            let merger =
                graph.add_stage(Box::new(SortedMergerStage::new(SortOrder::Coordinate)));
            graph.connect(reader, splitter);
            for _ in 0..chains {
                let dedup = graph.add_stage(Box::new(MarkDuplicatesStage::new(self.remove)));
                graph.connect(splitter, dedup);
                graph.connect(dedup, merger);
            }
            graph.connect(merger, writer);
        }
        graph.run_chain()?;

        timer.log_finished();
        Ok(())
    }
}
