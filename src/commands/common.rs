//! Options shared across subcommands.

use bamflow_lib::config::{EngineConfig, detected_parallelism};
use clap::Args;
use std::path::PathBuf;

/// Engine-wide options every pipeline command accepts.
#[derive(Debug, Clone, Args)]
pub struct EngineOptions {
    /// Worker threads (default: detected cores).
    #[arg(short = 't', long = "threads")]
    pub threads: Option<usize>,

    /// Disable worker threads entirely.
    #[arg(long = "nothreads", conflicts_with = "threads")]
    pub nothreads: bool,

    /// Directory for temporary files.
    #[arg(short = 'T', long = "tmpdir")]
    pub tmpdir: Option<PathBuf>,

    /// BGZF compression level for outputs (0-9).
    #[arg(short = 'c', long = "compression", default_value = "6")]
    pub compression: u32,

    /// Do not append a @PG provenance line to output headers.
    #[arg(long = "nopg")]
    pub nopg: bool,
}

impl EngineOptions {
    /// Resolves the effective thread count.
    #[must_use]
    pub fn threads(&self) -> usize {
        if self.nothreads {
            1
        } else {
            self.threads.unwrap_or_else(detected_parallelism).max(1)
        }
    }

    /// Builds the engine configuration these options describe.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::with_threads(self.threads());
        config.temp_dir = self.tmpdir.clone();
        config.compression_level = self.compression;
        config.provenance = !self.nopg;
        config
    }
}
