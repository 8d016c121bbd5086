//! Engine configuration threaded through stage construction.

use std::path::PathBuf;

/// Configuration for one engine invocation.
///
/// Built once by the caller and passed by reference into stage and sorter
/// constructors. Nothing in the engine mutates it after `run_chain` starts.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker threads available to pools and parallel sorts.
    pub threads: usize,
    /// Directory for external-sort temp chunks. `None` = system default.
    pub temp_dir: Option<PathBuf>,
    /// BGZF compression level for final outputs (0-12).
    pub compression_level: u32,
    /// BGZF compression level for temp chunks; 0 writes them uncompressed.
    pub temp_compression_level: u32,
    /// Whether writers append a provenance (@PG) line to emitted headers.
    pub provenance: bool,
    /// Capacity of each stage-graph edge queue, in records.
    pub edge_capacity: usize,
}

impl EngineConfig {
    /// Default configuration for the detected machine.
    #[must_use]
    pub fn detect() -> Self {
        Self::with_threads(detected_parallelism())
    }

    /// Configuration with an explicit thread count (0 is clamped to 1).
    #[must_use]
    pub fn with_threads(threads: usize) -> Self {
        Self {
            threads: threads.max(1),
            temp_dir: None,
            compression_level: 6,
            temp_compression_level: 0,
            provenance: true,
            edge_capacity: 1024,
        }
    }

    /// True when the engine should avoid spawning extra threads.
    #[must_use]
    pub fn single_threaded(&self) -> bool {
        self.threads <= 1
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::detect()
    }
}

/// Number of cores the OS reports, falling back to 1.
#[must_use]
pub fn detected_parallelism() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threads_clamped() {
        let config = EngineConfig::with_threads(0);
        assert_eq!(config.threads, 1);
        assert!(config.single_threaded());
    }

    #[test]
    fn test_detect_nonzero() {
        assert!(EngineConfig::detect().threads >= 1);
    }
}
