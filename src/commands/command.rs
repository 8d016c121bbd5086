//! Command trait shared by all subcommands.

use anyhow::Result;
use enum_dispatch::enum_dispatch;

/// Implemented by every bamflow subcommand.
///
/// `command_line` is the full invocation, used for provenance (@PG) lines.
#[enum_dispatch]
pub trait Command {
    #[allow(clippy::missing_errors_doc)]
    fn execute(&self, command_line: &str) -> Result<()>;
}
