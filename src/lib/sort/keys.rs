//! Sort key policies.
//!
//! Keys are extracted once per record and compared many times, so they carry
//! only the fields their ordering needs. The sort machinery is
//! comparator-agnostic: it is generic over [`SortKey`] and never inspects
//! records itself.

use crate::header::SortOrderState;
use crate::record::Record;
use bstr::BString;

/// A sort key extractable from a record.
///
/// `Ord` on the key defines the output order; ties that the key cannot break
/// are broken positionally by the machinery (input order in the stable
/// in-memory sort, (chunk index, intra-chunk index) in the external merge).
pub trait SortKey: Ord + Clone + Send + 'static {
    /// Extracts the key from a record.
    fn from_record(record: &Record) -> Self;

    /// The header sort-order state this key produces.
    fn header_state() -> SortOrderState;
}

/// Sort order selector for the external sorter and CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// (reference id, position), unmapped last; ties by strand then name.
    Coordinate,
    /// Lexicographic read name; ties by first-of-pair flag then position.
    Queryname,
}

impl SortOrder {
    /// The header state corresponding to this order.
    #[must_use]
    pub fn header_state(self) -> SortOrderState {
        match self {
            SortOrder::Coordinate => SortOrderState::Coordinate,
            SortOrder::Queryname => SortOrderState::Queryname,
        }
    }
}

/// Coordinate ordering: (reference id, position), with unmapped records
/// (reference id -1) sorting last; ties break on the reverse-strand flag
/// (forward first) and then the read name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CoordinateKey {
    tid: u32,
    pos: i32,
    reverse: bool,
    name: BString,
}

impl SortKey for CoordinateKey {
    fn from_record(record: &Record) -> Self {
        let ref_id = record.ref_id();
        // -1 (unmapped) maps above every valid index.
        let tid = if ref_id < 0 { u32::MAX } else { ref_id as u32 };
        Self {
            tid,
            pos: record.pos(),
            reverse: record.is_reverse(),
            name: BString::from(record.name().to_vec()),
        }
    }

    fn header_state() -> SortOrderState {
        SortOrderState::Coordinate
    }
}

/// Queryname ordering: lexicographic on the read name; ties break on the
/// first-of-pair flag (first segment first) and then position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerynameKey {
    name: BString,
    first_of_pair: bool,
    pos: i32,
}

impl PartialOrd for QuerynameKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QuerynameKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.name
            .cmp(&other.name)
            // First segment sorts before second: true > false, so reverse.
            .then_with(|| other.first_of_pair.cmp(&self.first_of_pair))
            .then_with(|| self.pos.cmp(&other.pos))
    }
}

impl SortKey for QuerynameKey {
    fn from_record(record: &Record) -> Self {
        Self {
            name: BString::from(record.name().to_vec()),
            first_of_pair: record.is_first_of_pair(),
            pos: record.pos(),
        }
    }

    fn header_state() -> SortOrderState {
        SortOrderState::Queryname
    }
}
