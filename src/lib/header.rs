//! Header and reference-table model.
//!
//! The header travels end-to-end through a chain: the reader supplies it,
//! transform stages pass it along (the sorter rewriting the sort order), and
//! writer stages may append a provenance line before emitting it.

use crate::errors::{EngineError, Result};

/// One reference sequence: name and length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Reference sequence name.
    pub name: String,
    /// Reference sequence length in bases.
    pub length: u32,
}

impl Reference {
    /// Creates a reference entry.
    #[must_use]
    pub fn new(name: impl Into<String>, length: u32) -> Self {
        Self { name: name.into(), length }
    }
}

/// Sort order recorded in the header's @HD line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrderState {
    /// No ordering guarantee.
    #[default]
    Unsorted,
    /// Sorted lexicographically by read name.
    Queryname,
    /// Sorted by (reference id, position).
    Coordinate,
}

impl SortOrderState {
    /// The SO tag value for this state.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SortOrderState::Unsorted => "unsorted",
            SortOrderState::Queryname => "queryname",
            SortOrderState::Coordinate => "coordinate",
        }
    }

    fn parse(tag: &str) -> Self {
        match tag {
            "queryname" => SortOrderState::Queryname,
            "coordinate" => SortOrderState::Coordinate,
            _ => SortOrderState::Unsorted,
        }
    }
}

/// Textual header block plus the immutable reference table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    /// Raw header text (@HD, @SQ, @RG, @PG, @CO lines).
    text: String,
    /// Reference table; record reference ids index into this.
    references: Vec<Reference>,
}

impl Header {
    /// Creates a header from raw text and a reference table.
    #[must_use]
    pub fn new(text: impl Into<String>, references: Vec<Reference>) -> Self {
        Self { text: text.into(), references }
    }

    /// The raw header text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The reference table.
    #[must_use]
    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    /// Checks that `ref_id` is -1 or a valid reference index.
    pub fn validate_ref_id(&self, ref_id: i32) -> Result<()> {
        if ref_id >= -1 && (ref_id as i64) < self.references.len() as i64 {
            Ok(())
        } else {
            Err(EngineError::malformed(format!(
                "reference id {ref_id} outside table of {} references",
                self.references.len()
            )))
        }
    }

    /// The sort order declared by the @HD line's SO field.
    #[must_use]
    pub fn sort_order(&self) -> SortOrderState {
        for line in self.text.lines() {
            if let Some(rest) = line.strip_prefix("@HD") {
                for field in rest.split('\t') {
                    if let Some(value) = field.strip_prefix("SO:") {
                        return SortOrderState::parse(value);
                    }
                }
            }
        }
        SortOrderState::Unsorted
    }

    /// Rewrites (or inserts) the @HD line to declare `order`.
    pub fn set_sort_order(&mut self, order: SortOrderState) {
        let so = format!("SO:{}", order.as_str());
        let mut lines: Vec<String> = Vec::new();
        let mut updated = false;
        for line in self.text.lines() {
            if line.starts_with("@HD") {
                let mut fields: Vec<String> =
                    line.split('\t').map(ToString::to_string).collect();
                let mut replaced = false;
                for field in fields.iter_mut().skip(1) {
                    if field.starts_with("SO:") {
                        *field = so.clone();
                        replaced = true;
                    }
                }
                if !replaced {
                    fields.push(so.clone());
                }
                lines.push(fields.join("\t"));
                updated = true;
            } else {
                lines.push(line.to_string());
            }
        }
        if !updated {
            lines.insert(0, format!("@HD\tVN:1.6\t{so}"));
        }
        self.text = lines.join("\n");
        if !self.text.is_empty() {
            self.text.push('\n');
        }
    }

    /// Appends a @PG provenance line naming the program and command line.
    pub fn add_program_line(&mut self, name: &str, version: &str, command_line: &str) {
        let id = self.unique_program_id(name);
        self.text.push_str(&format!(
            "@PG\tID:{id}\tPN:{name}\tVN:{version}\tCL:{command_line}\n"
        ));
    }

    /// Picks a program id not already present (base, base.1, base.2, ...).
    fn unique_program_id(&self, base: &str) -> String {
        let taken: Vec<&str> = self
            .text
            .lines()
            .filter(|l| l.starts_with("@PG"))
            .filter_map(|l| l.split('\t').find_map(|f| f.strip_prefix("ID:")))
            .collect();
        if !taken.contains(&base) {
            return base.to_string();
        }
        let mut i = 1;
        loop {
            let candidate = format!("{base}.{i}");
            if !taken.contains(&candidate.as_str()) {
                return candidate;
            }
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_order_roundtrip() {
        let mut header = Header::new("@HD\tVN:1.6\tSO:unsorted\n@SQ\tSN:chr1\tLN:1000\n", vec![]);
        assert_eq!(header.sort_order(), SortOrderState::Unsorted);

        header.set_sort_order(SortOrderState::Coordinate);
        assert_eq!(header.sort_order(), SortOrderState::Coordinate);
        assert!(header.text().contains("SO:coordinate"));
        assert!(header.text().contains("@SQ\tSN:chr1"));
    }

    #[test]
    fn test_set_sort_order_inserts_hd_line() {
        let mut header = Header::new("@SQ\tSN:chr1\tLN:1000\n", vec![]);
        header.set_sort_order(SortOrderState::Queryname);
        assert!(header.text().starts_with("@HD"));
        assert_eq!(header.sort_order(), SortOrderState::Queryname);
    }

    #[test]
    fn test_add_program_line() {
        let mut header = Header::new("@HD\tVN:1.6\n", vec![]);
        header.add_program_line("bamflow", "0.3.1", "bamflow sort -o out.bam in.bam");
        assert!(header.text().contains("@PG\tID:bamflow\tPN:bamflow"));
        assert!(header.text().contains("CL:bamflow sort -o out.bam in.bam"));
    }

    #[test]
    fn test_program_id_deduplication() {
        let mut header = Header::new("@PG\tID:bamflow\tPN:bamflow\n", vec![]);
        header.add_program_line("bamflow", "0.3.1", "bamflow dedup in.bam");
        assert!(header.text().contains("ID:bamflow.1"));
    }

    #[test]
    fn test_validate_ref_id() {
        let header = Header::new("", vec![Reference::new("chr1", 1000)]);
        assert!(header.validate_ref_id(-1).is_ok());
        assert!(header.validate_ref_id(0).is_ok());
        assert!(header.validate_ref_id(1).is_err());
        assert!(header.validate_ref_id(-2).is_err());
    }
}
