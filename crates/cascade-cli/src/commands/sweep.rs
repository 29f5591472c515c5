use cascade_cache::MemoryCache;
use clap::Parser;

use crate::error::CliResult;
use crate::output::{OutputFormat, format_size};

#[derive(Parser)]
pub struct SweepCommand {}

impl SweepCommand {
    pub async fn execute(&self, cache: &MemoryCache, format: OutputFormat) -> CliResult<()> {
        let report = cache.maintain_now().await;

        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            OutputFormat::Table => {
                match &report.sweep {
                    Some(sweep) => println!(
                        "Moved {} of {} examined records from {} to {} ({}), {} failed",
                        sweep.moved,
                        sweep.examined,
                        sweep.from,
                        sweep.to,
                        format_size(sweep.bytes_moved),
                        sweep.failed
                    ),
                    None => println!("Warm sweep failed, see logs for details"),
                }
                println!("Removed {} stale copies", report.shadows_removed);
            }
        }

        Ok(())
    }
}
