#![deny(unsafe_code)]
pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::command::Command;
use commands::dedup::Dedup;
use commands::fastq::Fastq;
use commands::sort::Sort;
use enum_dispatch::enum_dispatch;
use env_logger::Env;
use log::info;

/// Crate version, used in @PG provenance lines.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(name = "bamflow", version, about = "Parallel BAM read-stream processing")]
struct Args {
    /// Verbose (debug-level) logging.
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    #[clap(subcommand)]
    subcommand: Subcommand,
}

#[enum_dispatch(Command)]
#[derive(Parser, Debug)]
#[allow(clippy::large_enum_variant)]
enum Subcommand {
    Sort(Sort),
    Dedup(Dedup),
    Fastq(Fastq),
}

fn main() -> Result<()> {
    // Capture the full command line before clap parsing, for @PG records.
    let command_line = std::env::args().collect::<Vec<_>>().join(" ");

    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    info!("bamflow {VERSION}");
    args.subcommand.execute(&command_line)
}
