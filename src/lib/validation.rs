//! Input validation helpers with consistent error messages.

use crate::errors::{EngineError, Result};
use std::path::Path;

/// Validates that a file exists.
///
/// `description` names the file's role in error messages (e.g. "Input BAM").
pub fn validate_file_exists<P: AsRef<Path>>(path: P, description: &str) -> Result<()> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(EngineError::resource(format!(
            "{description} '{}' does not exist",
            path.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file() {
        let result = validate_file_exists("/nonexistent/input.bam", "Input BAM");
        let msg = format!("{}", result.unwrap_err());
        assert!(msg.contains("Input BAM"));
        assert!(msg.contains("does not exist"));
    }

    #[test]
    fn test_existing_file() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        assert!(validate_file_exists(tmp.path(), "Input BAM").is_ok());
    }
}
