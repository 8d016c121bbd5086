//! Concrete stages: reader source, writer sink, streaming sort, and
//! duplicate marking.

use crate::bam_io::BamWriter;
use crate::errors::{EngineError, Result};
use crate::graph::{Stage, StageContext};
use crate::header::Header;
use crate::prefetch::PrefetchReader;
use crate::sort::ExternalSorter;
use ahash::AHashSet;
use log::info;
use std::path::PathBuf;

/// Source stage emitting records from a prefetching reader.
pub struct ReaderStage {
    reader: PrefetchReader,
}

impl ReaderStage {
    /// Wraps an open prefetch reader.
    #[must_use]
    pub fn new(reader: PrefetchReader) -> Self {
        Self { reader }
    }

    /// Opens `path`, prefetching when `threaded`.
    pub fn open(path: impl Into<PathBuf>, threaded: bool) -> Result<Self> {
        Ok(Self { reader: PrefetchReader::open(path.into(), threaded)? })
    }
}

impl Stage for ReaderStage {
    fn name(&self) -> &str {
        "reader"
    }

    fn header(&mut self, _upstream: &[Header]) -> Result<Header> {
        Ok(self.reader.header().clone())
    }

    fn run(&mut self, ctx: &StageContext) -> Result<()> {
        while let Some(record) = self.reader.next()? {
            ctx.emit(record)?;
        }
        Ok(())
    }
}

/// Sink stage writing records to a container file.
///
/// Appends a provenance line to the emitted header when configured with one.
pub struct WriterStage {
    path: PathBuf,
    compression_level: u32,
    provenance: Option<(String, String)>,
    header: Option<Header>,
    records_written: u64,
}

impl WriterStage {
    /// Creates a writer sink for `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, compression_level: u32) -> Self {
        Self {
            path: path.into(),
            compression_level,
            provenance: None,
            header: None,
            records_written: 0,
        }
    }

    /// Adds a provenance (@PG) line with the given version and command line.
    #[must_use]
    pub fn provenance(mut self, version: impl Into<String>, command_line: impl Into<String>) -> Self {
        self.provenance = Some((version.into(), command_line.into()));
        self
    }

    /// Records written by the completed stage.
    #[must_use]
    pub fn records_written(&self) -> u64 {
        self.records_written
    }
}

impl Stage for WriterStage {
    fn name(&self) -> &str {
        "writer"
    }

    fn header(&mut self, upstream: &[Header]) -> Result<Header> {
        let mut header = upstream
            .first()
            .cloned()
            .ok_or_else(|| EngineError::graph("writer", "missing source"))?;
        if let Some((version, command_line)) = &self.provenance {
            header.add_program_line("bamflow", version, command_line);
        }
        self.header = Some(header.clone());
        Ok(header)
    }

    fn run(&mut self, ctx: &StageContext) -> Result<()> {
        let header =
            self.header.as_ref().ok_or_else(|| EngineError::graph("writer", "no header"))?;
        let mut writer = BamWriter::create(&self.path, header, self.compression_level)?;
        while let Some(record) = ctx.pull() {
            writer.write_record(&record)?;
            self.records_written += 1;
        }
        writer.finish()?;
        info!("Wrote {} records to {}", self.records_written, self.path.display());
        Ok(())
    }
}

/// Transform stage running the external merge sort over the stream.
///
/// Buffers the entire upstream (spilling to temp chunks), then emits it in
/// sorted order. Downstream observes the rewritten sort-order header.
pub struct SortStage {
    sorter: ExternalSorter,
    header: Option<Header>,
}

impl SortStage {
    /// Wraps a configured sorter.
    #[must_use]
    pub fn new(sorter: ExternalSorter) -> Self {
        Self { sorter, header: None }
    }
}

impl Stage for SortStage {
    fn name(&self) -> &str {
        "sort"
    }

    fn header(&mut self, upstream: &[Header]) -> Result<Header> {
        let input = upstream
            .first()
            .ok_or_else(|| EngineError::graph("sort", "missing source"))?;
        let header = self.sorter.output_header(input);
        self.header = Some(header.clone());
        Ok(header)
    }

    fn run(&mut self, ctx: &StageContext) -> Result<()> {
        let header =
            self.header.as_ref().ok_or_else(|| EngineError::graph("sort", "no header"))?;
        self.sorter.sort(header, || Ok(ctx.pull()), |record| ctx.emit(record))?;
        Ok(())
    }
}

/// Transform stage flagging duplicate records.
///
/// A record is a duplicate when an earlier record shared its (reference,
/// position, strand). Optionally drops flagged records instead of
/// forwarding them.
///
/// The stage drains its entire input before emitting anything. This is what
/// lets several markers sit between a splitter and a sorted merger: the
/// merger needs a head from every chain before it can emit, so a chain that
/// emitted lazily while another still consumed would stall the graph.
pub struct MarkDuplicatesStage {
    remove: bool,
    seen: AHashSet<(i32, i32, bool)>,
    duplicates: u64,
}

impl MarkDuplicatesStage {
    /// Creates a marker; `remove` drops duplicates instead of flagging.
    #[must_use]
    pub fn new(remove: bool) -> Self {
        Self { remove, seen: AHashSet::new(), duplicates: 0 }
    }
}

impl Stage for MarkDuplicatesStage {
    fn name(&self) -> &str {
        "mark-duplicates"
    }

    fn header(&mut self, upstream: &[Header]) -> Result<Header> {
        upstream
            .first()
            .cloned()
            .ok_or_else(|| EngineError::graph("mark-duplicates", "missing source"))
    }

    fn run(&mut self, ctx: &StageContext) -> Result<()> {
        let mut buffer: Vec<crate::record::Record> = Vec::new();
        while let Some(mut record) = ctx.pull() {
            if !record.is_unmapped() {
                let key = (record.ref_id(), record.pos(), record.is_reverse());
                if !self.seen.insert(key) {
                    self.duplicates += 1;
                    if self.remove {
                        continue;
                    }
                    record.set_duplicate(true);
                }
            }
            buffer.push(record);
        }
        for record in buffer {
            ctx.emit(record)?;
        }
        if self.duplicates > 0 {
            info!("Marked {} duplicate records", self.duplicates);
        }
        Ok(())
    }
}
