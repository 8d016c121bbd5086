//! External merge sort for record streams larger than memory.
//!
//! # Algorithm
//!
//! 1. **Chunking**: pull records from the source into a buffer; when the
//!    buffer reaches the per-chunk record count or the memory budget, hand it
//!    to the worker pool as a chunk job (stable parallel sort, then spill to
//!    a temp container file). The final partial buffer is always flushed.
//! 2. **Multiway merge**: open one reader per temp file, seed a min-heap
//!    with each file's first record, then repeatedly emit the minimum and
//!    refill from its source. Temp files are deleted once consumed.
//!
//! The merge heap breaks key ties by (chunk index, intra-chunk index), so
//! output order is deterministic and stability is preserved across chunks.
//!
//! Two pools are used: chunk jobs run on one, and each chunk job's parallel
//! sub-sorts run on the other. A single shared pool would deadlock, with the
//! chunk job occupying a worker while waiting for its own sub-sorts.

use crate::bam_io::{BamReader, BamWriter};
use crate::errors::{EngineError, Result};
use crate::header::Header;
use crate::pool::WorkerPool;
use crate::progress::ProgressTracker;
use crate::record::Record;
use crate::sort::keys::{CoordinateKey, QuerynameKey, SortKey, SortOrder};
use crate::sort::parallel::parallel_sort;
use log::{debug, info};
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Default number of records per temp chunk.
pub const DEFAULT_RECORDS_PER_CHUNK: usize = 500_000;

/// Default memory budget for one chunk buffer, in megabytes.
pub const DEFAULT_MEMORY_BUDGET_MB: usize = 1024;

/// Per-record bookkeeping overhead added to the encoded size when charging
/// the memory budget.
const RECORD_OVERHEAD: usize = 96;

/// External sorter for record streams.
///
/// Configured with builder-style setters, then run with
/// [`ExternalSorter::sort`]. Temp-file naming (stub + monotone counter) and
/// the counter itself are per-instance state; nothing global.
pub struct ExternalSorter {
    order: SortOrder,
    records_per_chunk: usize,
    memory_budget: usize,
    temp_dir: Option<PathBuf>,
    temp_compression: u32,
    threads: usize,
    filename_stub: String,
}

impl ExternalSorter {
    /// Creates a sorter producing the given order.
    #[must_use]
    pub fn new(order: SortOrder) -> Self {
        Self {
            order,
            records_per_chunk: DEFAULT_RECORDS_PER_CHUNK,
            memory_budget: DEFAULT_MEMORY_BUDGET_MB * 1024 * 1024,
            temp_dir: None,
            temp_compression: 0,
            threads: 1,
            filename_stub: "chunk_".to_string(),
        }
    }

    /// Sets the records-per-chunk spill threshold.
    #[must_use]
    pub fn records_per_chunk(mut self, count: usize) -> Self {
        self.records_per_chunk = count.max(1);
        self
    }

    /// Sets the chunk memory budget in megabytes.
    #[must_use]
    pub fn memory_budget_mb(mut self, mb: usize) -> Self {
        self.memory_budget = mb.max(1) * 1024 * 1024;
        self
    }

    /// Sets the directory temp chunks are created under.
    #[must_use]
    pub fn temp_dir(mut self, dir: PathBuf) -> Self {
        self.temp_dir = Some(dir);
        self
    }

    /// Sets the BGZF level for temp chunks (0 = uncompressed blocks).
    #[must_use]
    pub fn temp_compression(mut self, level: u32) -> Self {
        self.temp_compression = level;
        self
    }

    /// Sets the worker thread count for chunk jobs and sub-sorts.
    #[must_use]
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// The header downstream stages observe: input header with its
    /// sort-order field rewritten to the produced order.
    #[must_use]
    pub fn output_header(&self, input: &Header) -> Header {
        let mut header = input.clone();
        header.set_sort_order(self.order.header_state());
        header
    }

    /// Sorts the stream produced by `source` and feeds it to `emit`.
    ///
    /// `source` yields records until `Ok(None)`; `emit` receives them in
    /// sorted order. Temp chunks live under a fresh directory that is
    /// removed on both success and failure.
    pub fn sort<S, E>(&self, header: &Header, source: S, emit: E) -> Result<SortStats>
    where
        S: FnMut() -> Result<Option<Record>>,
        E: FnMut(Record) -> Result<()>,
    {
        match self.order {
            SortOrder::Coordinate => self.sort_with_key::<CoordinateKey, S, E>(header, source, emit),
            SortOrder::Queryname => self.sort_with_key::<QuerynameKey, S, E>(header, source, emit),
        }
    }

    fn sort_with_key<K, S, E>(&self, header: &Header, mut source: S, mut emit: E) -> Result<SortStats>
    where
        K: SortKey,
        S: FnMut() -> Result<Option<Record>>,
        E: FnMut(Record) -> Result<()>,
    {
        let temp = self.create_temp_dir()?;
        let chunk_header = self.output_header(header);
        let mut stats = SortStats::default();

        // Chunk jobs run on chunk_pool; their sub-sorts on sort_pool.
        let pools = if self.threads > 1 {
            Some((
                Arc::new(WorkerPool::new(self.threads)?),
                Arc::new(WorkerPool::new(self.threads)?),
            ))
        } else {
            None
        };
        let spill_error: Arc<Mutex<Option<EngineError>>> = Arc::new(Mutex::new(None));

        info!("Generating sorted temp chunks under {}", temp.path().display());
        let progress = ProgressTracker::new("Read records");

        let mut chunk_paths: Vec<PathBuf> = Vec::new();
        let mut buffer: Vec<(K, Record)> = Vec::new();
        let mut buffered_bytes = 0usize;

        loop {
            if spill_error.lock().is_some() {
                break;
            }
            let Some(record) = source()? else { break };
            stats.total_records += 1;
            progress.log_if_needed(1);
            buffered_bytes += record.len() + RECORD_OVERHEAD;
            buffer.push((K::from_record(&record), record));

            if buffer.len() >= self.records_per_chunk || buffered_bytes >= self.memory_budget {
                let full = std::mem::take(&mut buffer);
                buffered_bytes = 0;
                self.spill_chunk(
                    full,
                    &mut chunk_paths,
                    &temp,
                    &chunk_header,
                    pools.as_ref(),
                    &spill_error,
                );
            }
        }
        progress.log_final();

        if !buffer.is_empty() && spill_error.lock().is_none() {
            self.spill_chunk(
                buffer,
                &mut chunk_paths,
                &temp,
                &chunk_header,
                pools.as_ref(),
                &spill_error,
            );
        }
        if let Some((chunk_pool, _)) = pools.as_ref() {
            chunk_pool.wait_idle();
        }
        if let Some(err) = spill_error.lock().take() {
            // TempDir removes the partial chunks on drop.
            return Err(EngineError::sort(format!("chunk spill failed: {err}")));
        }
        stats.chunks_written = chunk_paths.len();
        drop(pools);

        info!("Merging {} sorted chunks", chunk_paths.len());
        self.merge_chunks::<K, E>(&chunk_paths, &mut emit, &mut stats)?;

        Ok(stats)
    }

    /// Sorts one buffer and writes it to the next temp chunk, on the pool
    /// when one is available.
    fn spill_chunk<K: SortKey>(
        &self,
        buffer: Vec<(K, Record)>,
        chunk_paths: &mut Vec<PathBuf>,
        temp: &TempDir,
        chunk_header: &Header,
        pools: Option<&(Arc<WorkerPool>, Arc<WorkerPool>)>,
        spill_error: &Arc<Mutex<Option<EngineError>>>,
    ) {
        let path = temp.path().join(format!("{}{}", self.filename_stub, chunk_paths.len()));
        chunk_paths.push(path.clone());
        debug!("Spilling {} records to {}", buffer.len(), path.display());

        match pools {
            Some((chunk_pool, sort_pool)) => {
                let sort_pool = Arc::clone(sort_pool);
                let header = chunk_header.clone();
                let level = self.temp_compression;
                let error = Arc::clone(spill_error);
                chunk_pool.submit(move || {
                    let mut buffer = buffer;
                    parallel_sort(&mut buffer, |a, b| a.0.cmp(&b.0), Some(&*sort_pool));
                    if let Err(e) = write_chunk(&path, &header, level, &buffer) {
                        let mut slot = error.lock();
                        if slot.is_none() {
                            *slot = Some(e);
                        }
                    }
                });
            }
            None => {
                let mut buffer = buffer;
                parallel_sort(&mut buffer, |a, b| a.0.cmp(&b.0), None);
                if let Err(e) = write_chunk(&path, chunk_header, self.temp_compression, &buffer) {
                    let mut slot = spill_error.lock();
                    if slot.is_none() {
                        *slot = Some(e);
                    }
                }
            }
        }
    }

    fn merge_chunks<K, E>(
        &self,
        chunk_paths: &[PathBuf],
        emit: &mut E,
        stats: &mut SortStats,
    ) -> Result<()>
    where
        K: SortKey,
        E: FnMut(Record) -> Result<()>,
    {
        let mut sources: Vec<ChunkSource> = Vec::with_capacity(chunk_paths.len());
        for path in chunk_paths {
            let reader = BamReader::open(path)
                .map_err(|e| EngineError::sort(format!("cannot reopen temp chunk: {e}")))?;
            sources.push(ChunkSource { reader, next_seq: 0 });
        }

        let mut heap: BinaryHeap<Reverse<MergeEntry<K>>> =
            BinaryHeap::with_capacity(sources.len());
        for (chunk, src) in sources.iter_mut().enumerate() {
            if let Some(entry) = src.next_entry::<K>(chunk)? {
                heap.push(Reverse(entry));
            }
        }

        let progress = ProgressTracker::new("Merged records");
        while let Some(Reverse(entry)) = heap.pop() {
            let chunk = entry.chunk;
            emit(entry.record)?;
            stats.output_records += 1;
            progress.log_if_needed(1);
            if let Some(next) = sources[chunk].next_entry::<K>(chunk)? {
                heap.push(Reverse(next));
            }
        }
        progress.log_final();

        // Release the readers before unlinking their files.
        drop(sources);
        for path in chunk_paths {
            if let Err(e) = std::fs::remove_file(path) {
                debug!("could not remove temp chunk {}: {e}", path.display());
            }
        }
        Ok(())
    }

    fn create_temp_dir(&self) -> Result<TempDir> {
        let result = match &self.temp_dir {
            Some(base) => {
                std::fs::create_dir_all(base)?;
                TempDir::new_in(base)
            }
            None => TempDir::new(),
        };
        result.map_err(|e| EngineError::resource(format!("cannot create temp directory: {e}")))
    }
}

fn write_chunk<K: SortKey>(
    path: &std::path::Path,
    header: &Header,
    level: u32,
    buffer: &[(K, Record)],
) -> Result<()> {
    let mut writer = BamWriter::create(path, header, level)?;
    for (_, record) in buffer {
        writer.write_record(record)?;
    }
    writer.finish()
}

/// One open temp chunk during the merge phase.
struct ChunkSource {
    reader: BamReader,
    next_seq: u64,
}

impl ChunkSource {
    fn next_entry<K: SortKey>(&mut self, chunk: usize) -> Result<Option<MergeEntry<K>>> {
        match self
            .reader
            .read_next()
            .map_err(|e| EngineError::sort(format!("temp chunk read failed: {e}")))?
        {
            Some(record) => {
                let entry = MergeEntry {
                    key: K::from_record(&record),
                    chunk,
                    seq: self.next_seq,
                    record,
                };
                self.next_seq += 1;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }
}

/// Heap entry: ordered by key, then (chunk, intra-chunk index) so equal keys
/// come out in spill order.
struct MergeEntry<K> {
    key: K,
    chunk: usize,
    seq: u64,
    record: Record,
}

impl<K: Ord> PartialEq for MergeEntry<K> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl<K: Ord> Eq for MergeEntry<K> {}

impl<K: Ord> PartialOrd for MergeEntry<K> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Ord> Ord for MergeEntry<K> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| self.chunk.cmp(&other.chunk))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Statistics from one sort run.
#[derive(Debug, Default)]
pub struct SortStats {
    /// Records pulled from the source.
    pub total_records: u64,
    /// Records emitted downstream.
    pub output_records: u64,
    /// Temp chunks written during the chunking phase.
    pub chunks_written: usize,
}
