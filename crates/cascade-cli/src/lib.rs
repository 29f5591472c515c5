pub mod commands;
pub mod error;
pub mod output;

pub use commands::{ConsolidateCommand, RecordCommand, StatsCommand, SweepCommand};
pub use error::{CliError, CliResult};
pub use output::{OutputFormat, format_size, format_timestamp, truncate_string};
