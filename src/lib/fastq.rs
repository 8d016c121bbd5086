//! FASTQ export with mate pairing.
//!
//! Records are buffered by name until their mate arrives; completed pairs go
//! to `<target>_1.fastq` / `<target>_2.fastq` with `/1` and `/2` name
//! suffixes, the reverse-strand record written as read 2 with its sequence
//! reverse-complemented and qualities reversed. Names still unpaired at
//! stream end are flushed as orphans to `<target>.fastq`.
//!
//! The `stdout` target writes every record immediately, unpaired, to
//! standard output.

use crate::dna::reverse_complement_in_place;
use crate::errors::{EngineError, Result};
use crate::graph::{Stage, StageContext};
use crate::header::Header;
use crate::record::Record;
use ahash::AHashMap;
use bstr::BString;
use log::info;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Phred-to-ASCII offset for quality strings.
const QUAL_OFFSET: u8 = 33;

/// Buffered sequence and qualities waiting for a mate.
struct PendingMate {
    seq: Vec<u8>,
    qual: Vec<u8>,
}

enum Output {
    Stdout(std::io::Stdout),
    Files {
        fwd: BufWriter<File>,
        rev: BufWriter<File>,
        orphan: BufWriter<File>,
    },
}

/// FASTQ writer with a pair-completion buffer.
pub struct FastqWriter {
    output: Output,
    pending: AHashMap<BString, PendingMate>,
    pairs: u64,
    orphans: u64,
    finished: bool,
}

impl FastqWriter {
    /// Creates a writer for `target`.
    ///
    /// A plain path produces `<target>_1.fastq`, `<target>_2.fastq`, and
    /// `<target>.fastq`; the literal `stdout` writes to standard output.
    pub fn create(target: &str) -> Result<Self> {
        let output = if target == "stdout" {
            Output::Stdout(std::io::stdout())
        } else {
            Output::Files {
                fwd: open_stream(&format!("{target}_1.fastq"))?,
                rev: open_stream(&format!("{target}_2.fastq"))?,
                orphan: open_stream(&format!("{target}.fastq"))?,
            }
        };
        Ok(Self { output, pending: AHashMap::new(), pairs: 0, orphans: 0, finished: false })
    }

    /// Writes one record, pairing it with a buffered mate when possible.
    pub fn write_record(&mut self, record: &Record) -> Result<()> {
        let name = BString::from(record.name().to_vec());
        let seq = record.sequence();
        let qual: Vec<u8> = record.qualities().iter().map(|&q| q + QUAL_OFFSET).collect();

        match &mut self.output {
            Output::Stdout(stdout) => {
                write_entry(&mut stdout.lock(), &name, "", &seq, &qual)?;
            }
            Output::Files { fwd, rev, .. } => {
                if let Some(mate) = self.pending.remove(&name) {
                    // The reverse-strand record becomes read 2.
                    let (fwd_rec, mut rev_rec) = if record.is_reverse() {
                        ((mate.seq, mate.qual), (seq, qual))
                    } else {
                        ((seq, qual), (mate.seq, mate.qual))
                    };
                    reverse_complement_in_place(&mut rev_rec.0);
                    rev_rec.1.reverse();

                    write_entry(fwd, &name, "/1", &fwd_rec.0, &fwd_rec.1)?;
                    write_entry(rev, &name, "/2", &rev_rec.0, &rev_rec.1)?;
                    self.pairs += 1;
                } else {
                    self.pending.insert(name, PendingMate { seq, qual });
                }
            }
        }
        Ok(())
    }

    /// Flushes remaining unpaired entries as orphans and closes the streams.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        match &mut self.output {
            Output::Stdout(stdout) => {
                let mut lock = stdout.lock();
                for (name, mate) in self.pending.drain() {
                    write_entry(&mut lock, &name, "", &mate.seq, &mate.qual)?;
                    self.orphans += 1;
                }
                lock.flush()?;
            }
            Output::Files { fwd, rev, orphan } => {
                for (name, mate) in self.pending.drain() {
                    write_entry(orphan, &name, "", &mate.seq, &mate.qual)?;
                    self.orphans += 1;
                }
                fwd.flush()?;
                rev.flush()?;
                orphan.flush()?;
            }
        }
        info!("FASTQ export: {} pairs, {} orphans", self.pairs, self.orphans);
        Ok(())
    }

    /// Completed pairs written so far.
    #[must_use]
    pub fn pairs(&self) -> u64 {
        self.pairs
    }

    /// Orphans written by [`FastqWriter::finish`].
    #[must_use]
    pub fn orphans(&self) -> u64 {
        self.orphans
    }
}

fn open_stream(path: &str) -> Result<BufWriter<File>> {
    let file = File::create(Path::new(path))
        .map_err(|e| EngineError::resource(format!("cannot create '{path}': {e}")))?;
    Ok(BufWriter::new(file))
}

fn write_entry<W: Write>(
    out: &mut W,
    name: &BString,
    suffix: &str,
    seq: &[u8],
    qual: &[u8],
) -> Result<()> {
    out.write_all(b"@")?;
    out.write_all(name)?;
    out.write_all(suffix.as_bytes())?;
    out.write_all(b"\n")?;
    out.write_all(seq)?;
    out.write_all(b"\n+")?;
    out.write_all(name)?;
    out.write_all(suffix.as_bytes())?;
    out.write_all(b"\n")?;
    out.write_all(qual)?;
    out.write_all(b"\n")?;
    Ok(())
}

/// Sink stage feeding records into a [`FastqWriter`].
pub struct FastqExportStage {
    writer: FastqWriter,
}

impl FastqExportStage {
    /// Wraps a FASTQ writer as a sink stage.
    #[must_use]
    pub fn new(writer: FastqWriter) -> Self {
        Self { writer }
    }
}

impl Stage for FastqExportStage {
    fn name(&self) -> &str {
        "fastq-export"
    }

    fn header(&mut self, upstream: &[Header]) -> Result<Header> {
        upstream
            .first()
            .cloned()
            .ok_or_else(|| EngineError::graph("fastq-export", "missing source"))
    }

    fn run(&mut self, ctx: &StageContext) -> Result<()> {
        while let Some(record) = ctx.pull() {
            self.writer.write_record(&record)?;
        }
        self.writer.finish()
    }
}
