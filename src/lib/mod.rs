#![deny(unsafe_code)]
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::uninlined_format_args
)]

//! # bamflow - parallel read-stream processing engine
//!
//! bamflow moves alignment records from producers to consumers through a
//! graph of concurrently running stages connected by back-pressured queues.
//! On top of that runtime it provides the two stages that shape the design:
//! an external parallel merge sort and a prefetching, load-aware container
//! reader.
//!
//! ## Modules
//!
//! - **[`record`]** / **[`header`]** - the in-memory data model
//! - **[`bam_io`]** - the container codec over BGZF
//! - **[`prefetch`]** - background read-ahead with adaptive throttling
//! - **[`queue`]** / **[`pool`]** - concurrency primitives
//! - **[`sort`]** - comparator policies, parallel in-memory sort, external
//!   merge sort
//! - **[`graph`]** - the stage-graph runtime and the built-in stages
//! - **[`fastq`]** - mate-pairing FASTQ export
//!
//! ## Reading and writing containers
//!
//! ```no_run
//! use bamflow_lib::bam_io::{BamReader, BamWriter};
//!
//! # fn main() -> bamflow_lib::errors::Result<()> {
//! let mut reader = BamReader::open("input.bam")?;
//! let header = reader.header().clone();
//! let mut writer = BamWriter::create("output.bam", &header, 6)?;
//! while let Some(record) = reader.read_next()? {
//!     writer.write_record(&record)?;
//! }
//! writer.finish()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Running a chain
//!
//! ```no_run
//! use bamflow_lib::graph::{Graph, ReaderStage, SortStage, WriterStage};
//! use bamflow_lib::sort::{ExternalSorter, SortOrder};
//!
//! # fn main() -> bamflow_lib::errors::Result<()> {
//! let mut graph = Graph::new(1024);
//! let reader = graph.add_stage(Box::new(ReaderStage::open("input.bam", true)?));
//! let sorter = ExternalSorter::new(SortOrder::Coordinate).threads(8);
//! let sort = graph.add_stage(Box::new(SortStage::new(sorter)));
//! let writer = graph.add_stage(Box::new(WriterStage::new("sorted.bam", 6)));
//! graph.connect(reader, sort);
//! graph.connect(sort, writer);
//! graph.run_chain()
//! # }
//! ```

pub mod bam_io;
pub mod config;
pub mod dna;
pub mod errors;
pub mod fastq;
pub mod graph;
pub mod header;
pub mod logging;
pub mod pool;
pub mod prefetch;
pub mod progress;
pub mod queue;
pub mod record;
pub mod sort;
pub mod validation;

pub use config::EngineConfig;
pub use errors::{EngineError, Result};
