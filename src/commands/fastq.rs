//! Export a container file as FASTQ.

use anyhow::Result;
use bamflow_lib::fastq::{FastqExportStage, FastqWriter};
use bamflow_lib::graph::{Graph, ReaderStage};
use bamflow_lib::logging::OperationTimer;
use bamflow_lib::validation::validate_file_exists;
use clap::Parser;
use log::info;
use std::path::PathBuf;

use crate::commands::command::Command;
use crate::commands::common::EngineOptions;

/// Export reads as FASTQ.
///
/// Paired reads are matched by name and written to `<out>_1.fastq` and
/// `<out>_2.fastq`; reads whose mate never appears go to `<out>.fastq`.
/// The `stdout` target writes everything to standard output.
#[derive(Debug, Parser)]
#[command(name = "fastq", about = "Export reads as FASTQ")]
pub struct Fastq {
    /// Input BAM file.
    pub input: PathBuf,

    /// Output stub, or `stdout`.
    #[arg(short = 'o', long = "out", default_value = "stdout")]
    pub out: String,

    #[command(flatten)]
    pub engine: EngineOptions,
}

impl Command for Fastq {
    fn execute(&self, _command_line: &str) -> Result<()> {
        validate_file_exists(&self.input, "Input BAM")?;
        let config = self.engine.engine_config();

        info!("Input: {}", self.input.display());
        info!("Output: {}", self.out);

        let timer = OperationTimer::new("Exporting FASTQ");

        let mut graph = Graph::new(config.edge_capacity);
        let reader = graph
            .add_stage(Box::new(ReaderStage::open(&self.input, !config.single_threaded())?));
        let export =
            graph.add_stage(Box::new(FastqExportStage::new(FastqWriter::create(&self.out)?)));
        graph.connect(reader, export);
        graph.run_chain()?;

        timer.log_finished();
        Ok(())
    }
}
