//! Sort a container file by coordinate or queryname.

use anyhow::{Result, bail};
use bamflow_lib::graph::{Graph, ReaderStage, SortStage, WriterStage};
use bamflow_lib::logging::OperationTimer;
use bamflow_lib::sort::{ExternalSorter, SortOrder};
use bamflow_lib::validation::validate_file_exists;
use clap::{Parser, ValueEnum};
use log::info;
use std::path::PathBuf;

use crate::commands::command::Command;
use crate::commands::common::EngineOptions;

/// Sort order argument.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SortOrderArg {
    /// (reference id, position), unmapped last.
    Coordinate,
    /// Lexicographic read name.
    Queryname,
}

impl From<SortOrderArg> for SortOrder {
    fn from(arg: SortOrderArg) -> Self {
        match arg {
            SortOrderArg::Coordinate => SortOrder::Coordinate,
            SortOrderArg::Queryname => SortOrder::Queryname,
        }
    }
}

/// Sort a BAM file.
///
/// Streams the input through an external parallel merge sort: memory-sized
/// chunks are sorted on a worker pool and spilled to temp files, then
/// multiway-merged into the output.
#[derive(Debug, Parser)]
#[command(name = "sort", about = "Sort a BAM file by coordinate or queryname")]
pub struct Sort {
    /// Input BAM file.
    pub input: PathBuf,

    /// Output BAM file.
    #[arg(short = 'o', long = "out")]
    pub out: PathBuf,

    /// Sort order.
    #[arg(long = "order", value_enum, default_value = "coordinate")]
    pub order: SortOrderArg,

    /// Records buffered per temp chunk.
    #[arg(short = 'n', long = "records-per-chunk", default_value = "500000")]
    pub records_per_chunk: usize,

    /// Memory budget per chunk buffer, in megabytes.
    #[arg(short = 'm', long = "memory-mb", default_value = "1024")]
    pub memory_mb: usize,

    /// BGZF level for temp chunks (0 = uncompressed).
    #[arg(long = "temp-compression", default_value = "0")]
    pub temp_compression: u32,

    #[command(flatten)]
    pub engine: EngineOptions,
}

impl Command for Sort {
    fn execute(&self, command_line: &str) -> Result<()> {
        validate_file_exists(&self.input, "Input BAM")?;
        if self.records_per_chunk == 0 {
            bail!("--records-per-chunk must be greater than 0");
        }
        let config = self.engine.engine_config();

        info!("Input: {}", self.input.display());
        info!("Output: {}", self.out.display());
        info!("Sort order: {:?}", self.order);
        info!("Threads: {}", config.threads);
        if let Some(ref tmpdir) = config.temp_dir {
            info!("Temp directory: {}", tmpdir.display());
        }

        let mut sorter = ExternalSorter::new(self.order.into())
            .records_per_chunk(self.records_per_chunk)
            .memory_budget_mb(self.memory_mb)
            .temp_compression(self.temp_compression)
            .threads(config.threads);
        if let Some(ref tmpdir) = config.temp_dir {
            sorter = sorter.temp_dir(tmpdir.clone());
        }

        let timer = OperationTimer::new("Sorting");

        let mut graph = Graph::new(config.edge_capacity);
        let reader = graph
            .add_stage(Box::new(ReaderStage::open(&self.input, !config.single_threaded())?));
        let sort = graph.add_stage(Box::new(SortStage::new(sorter)));
        let mut writer = WriterStage::new(&self.out, config.compression_level);
        if config.provenance {
            writer = writer.provenance(crate::VERSION, command_line);
        }
        let writer = graph.add_stage(Box::new(writer));
        graph.connect(reader, sort);
        graph.connect(sort, writer);
        graph.run_chain()?;

        timer.log_finished();
        Ok(())
    }
}
