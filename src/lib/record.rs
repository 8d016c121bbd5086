//! Alignment record model.
//!
//! A [`Record`] owns the raw bytes of one BAM-encoded alignment (everything
//! after the 4-byte block-length prefix) and decodes fields on demand. Keeping
//! the wire bytes as the backing store makes records cheap to move through
//! queues and lets the sorter spill them back to disk without re-encoding;
//! the character fields (name, CIGAR, sequence, qualities) are materialized
//! only when a stage asks for them.
//!
//! # Binary layout
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//! 0-3     4     refID (i32)
//! 4-7     4     pos (i32, 0-based)
//! 8       1     l_read_name (u8, includes NUL)
//! 9       1     mapq (u8)
//! 10-11   2     bin (u16)
//! 12-13   2     n_cigar_op (u16)
//! 14-15   2     flag (u16)
//! 16-19   4     l_seq (u32)
//! 20-23   4     next_refID (i32)
//! 24-27   4     next_pos (i32)
//! 28-31   4     tlen (i32)
//! 32+     var   read_name, CIGAR, 4-bit sequence, quality, tags
//! ```
//!
//! All integers are little-endian on the wire and normalized to host order
//! by the accessors.

use crate::errors::{EngineError, Result};
use bstr::{BStr, ByteSlice};

/// Reference id denoting an unmapped record.
pub const UNMAPPED_REF_ID: i32 = -1;

/// Size of the fixed portion of an encoded record.
pub const FIXED_HEADER_LEN: usize = 32;

/// 4-bit sequence decode table.
const SEQ_DECODE: [u8; 16] = *b"=ACMGRSVTWYHKDBN";

/// Alignment flag bits.
pub mod flags {
    /// Read is paired in sequencing.
    pub const PAIRED: u16 = 0x1;
    /// Read is unmapped.
    pub const UNMAPPED: u16 = 0x4;
    /// Mate is unmapped.
    pub const MATE_UNMAPPED: u16 = 0x8;
    /// Read aligned to the reverse strand.
    pub const REVERSE: u16 = 0x10;
    /// Mate aligned to the reverse strand.
    pub const MATE_REVERSE: u16 = 0x20;
    /// First segment in the template (R1).
    pub const FIRST_OF_PAIR: u16 = 0x40;
    /// Last segment in the template (R2).
    pub const SECOND_OF_PAIR: u16 = 0x80;
    /// Secondary alignment.
    pub const SECONDARY: u16 = 0x100;
    /// Failed quality control.
    pub const QC_FAIL: u16 = 0x200;
    /// PCR or optical duplicate.
    pub const DUPLICATE: u16 = 0x400;
    /// Supplementary alignment.
    pub const SUPPLEMENTARY: u16 = 0x800;
}

/// One CIGAR operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CigarOp {
    /// Alignment match or mismatch (M).
    Match,
    /// Insertion to the reference (I).
    Insert,
    /// Deletion from the reference (D).
    Delete,
    /// Skipped region (N).
    Skip,
    /// Soft clip (S).
    SoftClip,
    /// Hard clip (H).
    HardClip,
    /// Padding (P).
    Pad,
    /// Sequence match (=).
    Equal,
    /// Sequence mismatch (X).
    Diff,
}

impl CigarOp {
    /// Decodes the low 4 bits of a packed CIGAR word.
    pub fn from_code(code: u32) -> Result<Self> {
        match code {
            0 => Ok(CigarOp::Match),
            1 => Ok(CigarOp::Insert),
            2 => Ok(CigarOp::Delete),
            3 => Ok(CigarOp::Skip),
            4 => Ok(CigarOp::SoftClip),
            5 => Ok(CigarOp::HardClip),
            6 => Ok(CigarOp::Pad),
            7 => Ok(CigarOp::Equal),
            8 => Ok(CigarOp::Diff),
            _ => Err(EngineError::malformed(format!("invalid CIGAR op code {code}"))),
        }
    }

    /// The 4-bit wire code for this op.
    #[must_use]
    pub fn code(self) -> u32 {
        match self {
            CigarOp::Match => 0,
            CigarOp::Insert => 1,
            CigarOp::Delete => 2,
            CigarOp::Skip => 3,
            CigarOp::SoftClip => 4,
            CigarOp::HardClip => 5,
            CigarOp::Pad => 6,
            CigarOp::Equal => 7,
            CigarOp::Diff => 8,
        }
    }
}

/// A single alignment record backed by its encoded bytes.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Record(Vec<u8>);

impl Record {
    /// Creates an empty record (used as a read target).
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Wraps encoded bytes, checking structural invariants.
    ///
    /// Verifies the fixed header is present and that every variable-length
    /// extent (name, CIGAR, sequence, qualities) lies within the buffer.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let record = Self(bytes);
        record.validate()?;
        Ok(record)
    }

    /// Checks that the buffer is a structurally valid record.
    pub fn validate(&self) -> Result<()> {
        let bytes = &self.0;
        if bytes.len() < FIXED_HEADER_LEN {
            return Err(EngineError::malformed(format!(
                "record body is {} bytes, shorter than the {FIXED_HEADER_LEN}-byte fixed header",
                bytes.len()
            )));
        }
        let end = self.qual_offset() + self.seq_len();
        if end > bytes.len() {
            return Err(EngineError::malformed(format!(
                "variable fields extend to byte {end} but record body is {} bytes",
                bytes.len()
            )));
        }
        Ok(())
    }

    /// The encoded bytes backing this record.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the record, returning its encoded bytes.
    #[inline]
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Encoded size in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no bytes are present.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Mutable access for the codec's read path.
    #[inline]
    pub(crate) fn buf_mut(&mut self) -> &mut Vec<u8> {
        &mut self.0
    }

    // ------------------------------------------------------------------
    // Fixed-field accessors
    // ------------------------------------------------------------------

    /// Reference id, or [`UNMAPPED_REF_ID`].
    #[inline]
    #[must_use]
    pub fn ref_id(&self) -> i32 {
        i32::from_le_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    /// 0-based leftmost position on the reference.
    #[inline]
    #[must_use]
    pub fn pos(&self) -> i32 {
        i32::from_le_bytes([self.0[4], self.0[5], self.0[6], self.0[7]])
    }

    /// Mapping quality.
    #[inline]
    #[must_use]
    pub fn mapq(&self) -> u8 {
        self.0[9]
    }

    /// Raw 16-bit alignment flags.
    #[inline]
    #[must_use]
    pub fn flags(&self) -> u16 {
        u16::from_le_bytes([self.0[14], self.0[15]])
    }

    /// Overwrites the alignment flags.
    #[inline]
    pub fn set_flags(&mut self, new_flags: u16) {
        self.0[14..16].copy_from_slice(&new_flags.to_le_bytes());
    }

    /// Sets or clears the duplicate flag.
    pub fn set_duplicate(&mut self, duplicate: bool) {
        let f = self.flags();
        self.set_flags(if duplicate { f | flags::DUPLICATE } else { f & !flags::DUPLICATE });
    }

    /// True when the read is paired in sequencing.
    #[inline]
    #[must_use]
    pub fn is_paired(&self) -> bool {
        self.flags() & flags::PAIRED != 0
    }

    /// True when the read is unmapped.
    #[inline]
    #[must_use]
    pub fn is_unmapped(&self) -> bool {
        self.flags() & flags::UNMAPPED != 0
    }

    /// True when the read aligned to the reverse strand.
    #[inline]
    #[must_use]
    pub fn is_reverse(&self) -> bool {
        self.flags() & flags::REVERSE != 0
    }

    /// True when the read is the first segment of its template.
    #[inline]
    #[must_use]
    pub fn is_first_of_pair(&self) -> bool {
        self.flags() & flags::FIRST_OF_PAIR != 0
    }

    /// True when the duplicate flag is set.
    #[inline]
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        self.flags() & flags::DUPLICATE != 0
    }

    /// Mate's reference id.
    #[inline]
    #[must_use]
    pub fn mate_ref_id(&self) -> i32 {
        i32::from_le_bytes([self.0[20], self.0[21], self.0[22], self.0[23]])
    }

    /// Mate's 0-based position.
    #[inline]
    #[must_use]
    pub fn mate_pos(&self) -> i32 {
        i32::from_le_bytes([self.0[24], self.0[25], self.0[26], self.0[27]])
    }

    /// Signed observed insert size.
    #[inline]
    #[must_use]
    pub fn insert_size(&self) -> i32 {
        i32::from_le_bytes([self.0[28], self.0[29], self.0[30], self.0[31]])
    }

    /// Number of CIGAR operations.
    #[inline]
    #[must_use]
    pub fn n_cigar_ops(&self) -> usize {
        u16::from_le_bytes([self.0[12], self.0[13]]) as usize
    }

    /// Length of the query sequence.
    #[inline]
    #[must_use]
    pub fn seq_len(&self) -> usize {
        u32::from_le_bytes([self.0[16], self.0[17], self.0[18], self.0[19]]) as usize
    }

    // ------------------------------------------------------------------
    // Variable-field accessors
    // ------------------------------------------------------------------

    /// Read name, without the trailing NUL.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &BStr {
        let l = self.0[8] as usize;
        if l > 1 { self.0[32..32 + l - 1].as_bstr() } else { b"".as_bstr() }
    }

    #[inline]
    fn cigar_offset(&self) -> usize {
        32 + self.0[8] as usize
    }

    #[inline]
    fn seq_offset(&self) -> usize {
        self.cigar_offset() + self.n_cigar_ops() * 4
    }

    #[inline]
    fn qual_offset(&self) -> usize {
        self.seq_offset() + self.seq_len().div_ceil(2)
    }

    /// Decodes the CIGAR into (op, length) pairs.
    pub fn cigar(&self) -> Result<Vec<(CigarOp, u32)>> {
        let start = self.cigar_offset();
        let mut ops = Vec::with_capacity(self.n_cigar_ops());
        for i in 0..self.n_cigar_ops() {
            let at = start + i * 4;
            let word =
                u32::from_le_bytes([self.0[at], self.0[at + 1], self.0[at + 2], self.0[at + 3]]);
            ops.push((CigarOp::from_code(word & 0xF)?, word >> 4));
        }
        Ok(ops)
    }

    /// Decodes the 4-bit packed query sequence into ASCII bases.
    #[must_use]
    pub fn sequence(&self) -> Vec<u8> {
        let l_seq = self.seq_len();
        let packed = &self.0[self.seq_offset()..];
        let mut bases = Vec::with_capacity(l_seq);
        for i in 0..l_seq {
            let byte = packed[i / 2];
            let code = if i.is_multiple_of(2) { byte >> 4 } else { byte & 0x0F };
            bases.push(SEQ_DECODE[code as usize]);
        }
        bases
    }

    /// Per-base qualities as raw phred values (no +33 offset).
    ///
    /// Always the same length as the sequence.
    #[must_use]
    pub fn qualities(&self) -> &[u8] {
        let start = self.qual_offset();
        &self.0[start..start + self.seq_len()]
    }
}

impl std::fmt::Debug for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.len() < FIXED_HEADER_LEN {
            return f.debug_struct("Record").field("len", &self.0.len()).finish();
        }
        f.debug_struct("Record")
            .field("name", &self.name())
            .field("ref_id", &self.ref_id())
            .field("pos", &self.pos())
            .field("flags", &self.flags())
            .finish()
    }
}

/// Builder for encoded records.
///
/// Used by tests and by tools that synthesize records from scratch. Fields
/// default to an unmapped, empty-sequence record.
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    name: Vec<u8>,
    ref_id: i32,
    pos: i32,
    mapq: u8,
    flags: u16,
    cigar: Vec<(CigarOp, u32)>,
    sequence: Vec<u8>,
    qualities: Option<Vec<u8>>,
    mate_ref_id: i32,
    mate_pos: i32,
    insert_size: i32,
}

impl Default for RecordBuilder {
    fn default() -> Self {
        Self {
            name: b"read".to_vec(),
            ref_id: UNMAPPED_REF_ID,
            pos: -1,
            mapq: 0,
            flags: 0,
            cigar: Vec::new(),
            sequence: Vec::new(),
            qualities: None,
            mate_ref_id: UNMAPPED_REF_ID,
            mate_pos: -1,
            insert_size: 0,
        }
    }
}

impl RecordBuilder {
    /// Creates a builder with default fields.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the read name.
    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.as_bytes().to_vec();
        self
    }

    /// Sets the reference id.
    #[must_use]
    pub fn ref_id(mut self, ref_id: i32) -> Self {
        self.ref_id = ref_id;
        self
    }

    /// Sets the 0-based position.
    #[must_use]
    pub fn pos(mut self, pos: i32) -> Self {
        self.pos = pos;
        self
    }

    /// Sets the mapping quality.
    #[must_use]
    pub fn mapq(mut self, mapq: u8) -> Self {
        self.mapq = mapq;
        self
    }

    /// Sets the raw flag word.
    #[must_use]
    pub fn flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the CIGAR operations.
    #[must_use]
    pub fn cigar(mut self, ops: &[(CigarOp, u32)]) -> Self {
        self.cigar = ops.to_vec();
        self
    }

    /// Sets the query sequence (ASCII bases).
    #[must_use]
    pub fn sequence(mut self, bases: &[u8]) -> Self {
        self.sequence = bases.to_vec();
        self
    }

    /// Sets per-base phred qualities (no +33 offset).
    #[must_use]
    pub fn qualities(mut self, quals: &[u8]) -> Self {
        self.qualities = Some(quals.to_vec());
        self
    }

    /// Sets the mate reference id and position.
    #[must_use]
    pub fn mate(mut self, ref_id: i32, pos: i32) -> Self {
        self.mate_ref_id = ref_id;
        self.mate_pos = pos;
        self
    }

    /// Sets the insert size.
    #[must_use]
    pub fn insert_size(mut self, insert_size: i32) -> Self {
        self.insert_size = insert_size;
        self
    }

    /// Encodes the record.
    ///
    /// # Panics
    ///
    /// Panics if qualities were provided with a length differing from the
    /// sequence, or if the name exceeds 254 bytes.
    #[must_use]
    pub fn build(self) -> Record {
        let quals = self.qualities.unwrap_or_else(|| vec![0xFF; self.sequence.len()]);
        assert_eq!(quals.len(), self.sequence.len(), "qualities must match sequence length");
        let l_read_name = u8::try_from(self.name.len() + 1).expect("name too long");
        let n_cigar = u16::try_from(self.cigar.len()).expect("too many CIGAR ops");
        let l_seq = u32::try_from(self.sequence.len()).expect("sequence too long");
        let seq_bytes = self.sequence.len().div_ceil(2);

        let total = FIXED_HEADER_LEN
            + l_read_name as usize
            + self.cigar.len() * 4
            + seq_bytes
            + self.sequence.len();
        let mut buf = Vec::with_capacity(total);

        buf.extend_from_slice(&self.ref_id.to_le_bytes());
        buf.extend_from_slice(&self.pos.to_le_bytes());
        buf.push(l_read_name);
        buf.push(self.mapq);
        buf.extend_from_slice(&0u16.to_le_bytes()); // bin
        buf.extend_from_slice(&n_cigar.to_le_bytes());
        buf.extend_from_slice(&self.flags.to_le_bytes());
        buf.extend_from_slice(&l_seq.to_le_bytes());
        buf.extend_from_slice(&self.mate_ref_id.to_le_bytes());
        buf.extend_from_slice(&self.mate_pos.to_le_bytes());
        buf.extend_from_slice(&self.insert_size.to_le_bytes());

        buf.extend_from_slice(&self.name);
        buf.push(0);

        for &(op, len) in &self.cigar {
            buf.extend_from_slice(&((len << 4) | op.code()).to_le_bytes());
        }

        let mut packed = vec![0u8; seq_bytes];
        for (i, &base) in self.sequence.iter().enumerate() {
            let code = encode_base(base);
            if i.is_multiple_of(2) {
                packed[i / 2] |= code << 4;
            } else {
                packed[i / 2] |= code;
            }
        }
        buf.extend_from_slice(&packed);
        buf.extend_from_slice(&quals);

        Record(buf)
    }
}

fn encode_base(base: u8) -> u8 {
    match base.to_ascii_uppercase() {
        b'=' => 0,
        b'A' => 1,
        b'C' => 2,
        b'M' => 3,
        b'G' => 4,
        b'R' => 5,
        b'S' => 6,
        b'V' => 7,
        b'T' => 8,
        b'W' => 9,
        b'Y' => 10,
        b'H' => 11,
        b'K' => 12,
        b'D' => 13,
        b'B' => 14,
        _ => 15, // N and anything unrecognized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_roundtrip() {
        let record = RecordBuilder::new()
            .name("alpha")
            .ref_id(3)
            .pos(200)
            .mapq(42)
            .flags(flags::PAIRED | flags::REVERSE)
            .cigar(&[(CigarOp::Match, 4)])
            .sequence(b"ACGT")
            .qualities(&[40, 40, 30, 2])
            .mate(5, 400)
            .insert_size(150)
            .build();

        record.validate().unwrap();
        assert_eq!(record.name().as_bytes(), b"alpha");
        assert_eq!(record.ref_id(), 3);
        assert_eq!(record.pos(), 200);
        assert_eq!(record.mapq(), 42);
        assert!(record.is_paired());
        assert!(record.is_reverse());
        assert!(!record.is_unmapped());
        assert_eq!(record.cigar().unwrap(), vec![(CigarOp::Match, 4)]);
        assert_eq!(record.sequence(), b"ACGT");
        assert_eq!(record.qualities(), &[40, 40, 30, 2]);
        assert_eq!(record.mate_ref_id(), 5);
        assert_eq!(record.mate_pos(), 400);
        assert_eq!(record.insert_size(), 150);
    }

    #[test]
    fn test_cigar_decode_single_match() {
        // Packed CIGAR word 0x00000040 = length 4, op code 0 (match).
        let record =
            RecordBuilder::new().name("rd").cigar(&[(CigarOp::Match, 4)]).build();
        let cigar_word = &record.as_bytes()[32 + 3..32 + 3 + 4];
        assert_eq!(cigar_word, &0x0000_0040u32.to_le_bytes());
        assert_eq!(record.cigar().unwrap(), vec![(CigarOp::Match, 4)]);
    }

    #[test]
    fn test_all_cigar_ops_roundtrip() {
        let ops = [
            CigarOp::Match,
            CigarOp::Insert,
            CigarOp::Delete,
            CigarOp::Skip,
            CigarOp::SoftClip,
            CigarOp::HardClip,
            CigarOp::Pad,
            CigarOp::Equal,
            CigarOp::Diff,
        ];
        for op in ops {
            assert_eq!(CigarOp::from_code(op.code()).unwrap(), op);
        }
        assert!(CigarOp::from_code(9).is_err());
    }

    #[test]
    fn test_odd_length_sequence() {
        let record = RecordBuilder::new().name("rd").sequence(b"ACGTN").build();
        assert_eq!(record.sequence(), b"ACGTN");
        assert_eq!(record.qualities().len(), 5);
    }

    #[test]
    fn test_seq_qual_lengths_agree() {
        let record = RecordBuilder::new().name("rd").sequence(b"ACG").qualities(&[1, 2, 3]).build();
        assert_eq!(record.sequence().len(), record.qualities().len());
    }

    #[test]
    fn test_duplicate_flag_mutation() {
        let mut record = RecordBuilder::new().name("rd").flags(flags::PAIRED).build();
        assert!(!record.is_duplicate());
        record.set_duplicate(true);
        assert!(record.is_duplicate());
        assert!(record.is_paired());
        record.set_duplicate(false);
        assert!(!record.is_duplicate());
    }

    #[test]
    fn test_unmapped_defaults() {
        let record = RecordBuilder::new().build();
        assert_eq!(record.ref_id(), UNMAPPED_REF_ID);
        assert_eq!(record.pos(), -1);
    }

    #[test]
    fn test_validate_rejects_short_buffer() {
        assert!(Record::from_bytes(vec![0u8; 16]).is_err());
    }

    #[test]
    fn test_validate_rejects_overrun() {
        let mut bytes = RecordBuilder::new().name("rd").sequence(b"ACGT").build().into_bytes();
        // Claim a longer sequence than the buffer holds.
        bytes[16..20].copy_from_slice(&100u32.to_le_bytes());
        assert!(Record::from_bytes(bytes).is_err());
    }

    #[test]
    fn test_empty_name() {
        let record = RecordBuilder::new().name("").build();
        assert!(record.name().is_empty());
    }
}
