//! BAM container codec.
//!
//! Reads and writes the block-compressed container: a 4-byte magic, the
//! textual header, the reference table, then length-prefixed records. The
//! BGZF envelope comes from `noodles_bgzf`; the record layer on top is
//! implemented here. Integer fields are little-endian on the wire and
//! normalized to host order on both paths.

use crate::errors::{EngineError, Result};
use crate::header::{Header, Reference};
use crate::record::Record;
use log::debug;
use noodles_bgzf::{self as bgzf, writer::CompressionLevel};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Container magic bytes.
const BAM_MAGIC: &[u8; 4] = b"BAM\x01";

/// Buffer size under the BGZF reader.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Reader for a BAM container.
///
/// Opening reads the magic, the textual header, and the reference table;
/// records are then pulled one at a time with [`BamReader::read_record`].
pub struct BamReader {
    inner: bgzf::Reader<BufReader<File>>,
    header: Header,
    path: PathBuf,
}

impl std::fmt::Debug for BamReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BamReader").field("path", &self.path).finish_non_exhaustive()
    }
}

impl BamReader {
    /// Opens a container and reads its header and reference table.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| {
            EngineError::resource(format!("cannot open '{}': {e}", path.display()))
        })?;
        let mut inner = bgzf::Reader::new(BufReader::with_capacity(READ_BUFFER_SIZE, file));
        let header = read_header(&mut inner, &path)?;
        debug!("Opened '{}' with {} references", path.display(), header.references().len());
        Ok(Self { inner, header, path })
    }

    /// The header read at open time.
    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Path this reader was opened on.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the next record into `record`, returning its encoded size or 0
    /// at end of stream.
    pub fn read_record(&mut self, record: &mut Record) -> Result<usize> {
        let block_size = match read_block_size(&mut self.inner)? {
            0 => return Ok(0),
            n => n,
        };
        let buf = record.buf_mut();
        buf.resize(block_size, 0);
        self.inner
            .read_exact(buf)
            .map_err(|_| EngineError::truncated("EOF inside record body"))?;
        record.validate()?;
        Ok(block_size)
    }

    /// Reads and returns the next record, or `None` at end of stream.
    pub fn read_next(&mut self) -> Result<Option<Record>> {
        let mut record = Record::new();
        match self.read_record(&mut record)? {
            0 => Ok(None),
            _ => Ok(Some(record)),
        }
    }

    /// Current virtual position, suitable for a later [`BamReader::seek`].
    #[must_use]
    pub fn virtual_position(&self) -> bgzf::VirtualPosition {
        self.inner.virtual_position()
    }

    /// Seeks to a virtual position previously returned by
    /// [`BamReader::virtual_position`].
    pub fn seek(&mut self, pos: bgzf::VirtualPosition) -> Result<()> {
        self.inner.seek(pos)?;
        Ok(())
    }
}

/// Reads the 4-byte record length prefix, returning 0 at a clean EOF.
fn read_block_size<R: Read>(reader: &mut R) -> Result<usize> {
    let mut buf = [0u8; 4];
    loop {
        match reader.read(&mut buf[..1]) {
            Ok(0) => return Ok(0),
            Ok(_) => break,
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    reader
        .read_exact(&mut buf[1..])
        .map_err(|_| EngineError::truncated("EOF inside record length prefix"))?;
    Ok(u32::from_le_bytes(buf) as usize)
}

fn read_header<R: Read>(reader: &mut R, path: &Path) -> Result<Header> {
    let mut magic = [0u8; 4];
    reader
        .read_exact(&mut magic)
        .map_err(|_| EngineError::truncated("EOF inside container magic"))?;
    if &magic != BAM_MAGIC {
        return Err(EngineError::UnsupportedVersion { path: path.to_path_buf() });
    }

    let l_text = read_i32(reader, "header text length")?;
    let mut text = vec![0u8; usize::try_from(l_text).map_err(|_| {
        EngineError::malformed(format!("negative header text length {l_text}"))
    })?];
    reader
        .read_exact(&mut text)
        .map_err(|_| EngineError::truncated("EOF inside header text"))?;
    let text = String::from_utf8_lossy(&text).into_owned();

    let n_ref = read_i32(reader, "reference count")?;
    let n_ref = usize::try_from(n_ref)
        .map_err(|_| EngineError::malformed(format!("negative reference count {n_ref}")))?;
    let mut references = Vec::with_capacity(n_ref);
    for _ in 0..n_ref {
        let l_name = read_i32(reader, "reference name length")?;
        let l_name = usize::try_from(l_name).map_err(|_| {
            EngineError::malformed(format!("negative reference name length {l_name}"))
        })?;
        let mut name = vec![0u8; l_name];
        reader
            .read_exact(&mut name)
            .map_err(|_| EngineError::truncated("EOF inside reference name"))?;
        if name.last() == Some(&0) {
            name.pop();
        }
        let length = read_i32(reader, "reference length")?;
        references.push(Reference::new(
            String::from_utf8_lossy(&name).into_owned(),
            u32::try_from(length).unwrap_or(0),
        ));
    }

    Ok(Header::new(text, references))
}

fn read_i32<R: Read>(reader: &mut R, what: &str) -> Result<i32> {
    let mut buf = [0u8; 4];
    reader
        .read_exact(&mut buf)
        .map_err(|_| EngineError::truncated(format!("EOF inside {what}")))?;
    Ok(i32::from_le_bytes(buf))
}

/// Writer for a BAM container.
pub struct BamWriter {
    inner: Option<bgzf::Writer<BufWriter<File>>>,
    path: PathBuf,
}

impl BamWriter {
    /// Creates a container at `path` and writes the header and reference
    /// table. `compression_level` 0 stores blocks uncompressed.
    pub fn create<P: AsRef<Path>>(
        path: P,
        header: &Header,
        compression_level: u32,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|e| {
            EngineError::resource(format!("cannot create '{}': {e}", path.display()))
        })?;
        let buf = BufWriter::with_capacity(READ_BUFFER_SIZE, file);
        #[allow(clippy::cast_possible_truncation)]
        let level = CompressionLevel::new(compression_level as u8)
            .unwrap_or_else(|| CompressionLevel::new(6).expect("valid default level"));
        let inner = bgzf::writer::Builder::default()
            .set_compression_level(level)
            .build_from_writer(buf);
        let mut writer = Self { inner: Some(inner), path };
        writer.write_header(header)?;
        Ok(writer)
    }

    fn writer(&mut self) -> &mut bgzf::Writer<BufWriter<File>> {
        self.inner.as_mut().expect("writer used after finish")
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn write_header(&mut self, header: &Header) -> Result<()> {
        let text = header.text().as_bytes().to_vec();
        let references: Vec<Reference> = header.references().to_vec();
        let w = self.writer();
        w.write_all(BAM_MAGIC)?;
        w.write_all(&(text.len() as i32).to_le_bytes())?;
        w.write_all(&text)?;
        w.write_all(&(references.len() as i32).to_le_bytes())?;
        for reference in &references {
            let name = reference.name.as_bytes();
            w.write_all(&((name.len() + 1) as i32).to_le_bytes())?;
            w.write_all(name)?;
            w.write_all(&[0])?;
            w.write_all(&(reference.length as i32).to_le_bytes())?;
        }
        Ok(())
    }

    /// Writes one record, length-prefixed.
    #[allow(clippy::cast_possible_truncation)]
    pub fn write_record(&mut self, record: &Record) -> Result<()> {
        let bytes = record.as_bytes();
        let w = self.inner.as_mut().expect("writer used after finish");
        w.write_all(&(bytes.len() as u32).to_le_bytes())?;
        w.write_all(bytes)?;
        Ok(())
    }

    /// Flushes remaining blocks and writes the BGZF EOF marker.
    pub fn finish(mut self) -> Result<()> {
        if let Some(inner) = self.inner.take() {
            inner.finish()?;
        }
        Ok(())
    }

    /// Path this writer was created at.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for BamWriter {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            let _ = inner.finish();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordBuilder;
    use tempfile::NamedTempFile;

    fn test_header() -> Header {
        Header::new(
            "@HD\tVN:1.6\tSO:unsorted\n@SQ\tSN:chr1\tLN:1000\n@SQ\tSN:chr2\tLN:2000\n",
            vec![Reference::new("chr1", 1000), Reference::new("chr2", 2000)],
        )
    }

    #[test]
    fn test_roundtrip() {
        let tmp = NamedTempFile::new().unwrap();
        let header = test_header();

        let records: Vec<_> = (0..5)
            .map(|i| {
                RecordBuilder::new()
                    .name(&format!("read{i}"))
                    .ref_id(i % 2)
                    .pos(100 * i)
                    .sequence(b"ACGT")
                    .qualities(&[30, 30, 30, 30])
                    .build()
            })
            .collect();

        let mut writer = BamWriter::create(tmp.path(), &header, 1).unwrap();
        for record in &records {
            writer.write_record(record).unwrap();
        }
        writer.finish().unwrap();

        let mut reader = BamReader::open(tmp.path()).unwrap();
        assert_eq!(reader.header(), &header);

        let mut seen = Vec::new();
        while let Some(record) = reader.read_next().unwrap() {
            seen.push(record);
        }
        assert_eq!(seen, records);
    }

    #[test]
    fn test_roundtrip_uncompressed() {
        let tmp = NamedTempFile::new().unwrap();
        let header = test_header();
        let record = RecordBuilder::new().name("solo").sequence(b"ACGTN").build();

        let mut writer = BamWriter::create(tmp.path(), &header, 0).unwrap();
        writer.write_record(&record).unwrap();
        writer.finish().unwrap();

        let mut reader = BamReader::open(tmp.path()).unwrap();
        assert_eq!(reader.read_next().unwrap().unwrap(), record);
        assert!(reader.read_next().unwrap().is_none());
    }

    #[test]
    fn test_empty_container() {
        let tmp = NamedTempFile::new().unwrap();
        let writer = BamWriter::create(tmp.path(), &test_header(), 1).unwrap();
        writer.finish().unwrap();

        let mut reader = BamReader::open(tmp.path()).unwrap();
        assert!(reader.read_next().unwrap().is_none());
    }

    #[test]
    fn test_bad_magic() {
        let tmp = NamedTempFile::new().unwrap();
        let file = File::create(tmp.path()).unwrap();
        let mut w = bgzf::Writer::new(file);
        w.write_all(b"XAM\x01").unwrap();
        w.write_all(&0i32.to_le_bytes()).unwrap();
        w.write_all(&0i32.to_le_bytes()).unwrap();
        w.finish().unwrap();

        match BamReader::open(tmp.path()) {
            Err(EngineError::UnsupportedVersion { .. }) => {}
            other => panic!("expected UnsupportedVersion, got {other:?}"),
        }
    }

    #[test]
    fn test_truncated_record() {
        let tmp = NamedTempFile::new().unwrap();
        let file = File::create(tmp.path()).unwrap();
        let mut w = bgzf::Writer::new(file);
        w.write_all(BAM_MAGIC).unwrap();
        w.write_all(&0i32.to_le_bytes()).unwrap(); // empty text
        w.write_all(&0i32.to_le_bytes()).unwrap(); // no references
        w.write_all(&100u32.to_le_bytes()).unwrap(); // record claims 100 bytes
        w.write_all(&[0u8; 10]).unwrap(); // ...but only 10 follow
        w.finish().unwrap();

        let mut reader = BamReader::open(tmp.path()).unwrap();
        match reader.read_next() {
            Err(EngineError::TruncatedStream { .. }) => {}
            other => panic!("expected TruncatedStream, got {other:?}"),
        }
    }

    #[test]
    fn test_seek_to_virtual_position() {
        let tmp = NamedTempFile::new().unwrap();
        let header = test_header();
        let first = RecordBuilder::new().name("first").build();
        let second = RecordBuilder::new().name("second").build();

        let mut writer = BamWriter::create(tmp.path(), &header, 1).unwrap();
        writer.write_record(&first).unwrap();
        writer.write_record(&second).unwrap();
        writer.finish().unwrap();

        let mut reader = BamReader::open(tmp.path()).unwrap();
        let after_header = reader.virtual_position();
        assert_eq!(reader.read_next().unwrap().unwrap(), first);
        assert_eq!(reader.read_next().unwrap().unwrap(), second);

        reader.seek(after_header).unwrap();
        assert_eq!(reader.read_next().unwrap().unwrap(), first);
    }
}
