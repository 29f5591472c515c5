pub mod consolidate;
pub mod record;
pub mod stats;
pub mod sweep;

pub use consolidate::ConsolidateCommand;
pub use record::RecordCommand;
pub use stats::StatsCommand;
pub use sweep::SweepCommand;

use cascade_cache::{RecordKind, Tier};

use crate::error::{CliError, CliResult};

pub(crate) fn parse_tier(s: &str) -> CliResult<Tier> {
    match s {
        "hot" => Ok(Tier::Hot),
        "warm" => Ok(Tier::Warm),
        "cold" => Ok(Tier::Cold),
        t => Err(CliError::usage(format!("Unknown tier: {t}. Use hot, warm, or cold."))),
    }
}

pub(crate) fn parse_kind(s: &str) -> CliResult<RecordKind> {
    match s {
        "turn" => Ok(RecordKind::Turn),
        "tool_output" => Ok(RecordKind::ToolOutput),
        "note" => Ok(RecordKind::Note),
        "summary" => Ok(RecordKind::Summary),
        k => Err(CliError::usage(format!(
            "Unknown record kind: {k}. Use turn, tool_output, note, or summary."
        ))),
    }
}
