use cascade_cache::MemoryCache;
use clap::Parser;
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};

use crate::error::CliResult;
use crate::output::{OutputFormat, truncate_string};

#[derive(Parser)]
pub struct ConsolidateCommand {}

impl ConsolidateCommand {
    pub async fn execute(&self, cache: &MemoryCache, format: OutputFormat) -> CliResult<()> {
        let report = cache.consolidate_now().await;

        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            OutputFormat::Table => {
                println!("Consolidation Results");
                println!("=====================\n");

                if report.groups == 0 {
                    println!(
                        "No groups to consolidate ({} candidate records).",
                        report.candidates
                    );
                    return Ok(());
                }

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Record", "Sources", "Generation", "Outcome"]);

                for group in &report.consolidated {
                    table.add_row([
                        truncate_string(&group.new_id.to_string(), 8),
                        group.source_ids.len().to_string(),
                        group.generation.to_string(),
                        format!("stored in {}", group.tier),
                    ]);
                }
                for group in &report.skipped {
                    table.add_row([
                        "-".to_string(),
                        group.source_ids.len().to_string(),
                        "-".to_string(),
                        format!("skipped: {}", group.reason),
                    ]);
                }

                println!("{table}\n");
                println!(
                    "Total: {} groups committed, {} skipped, {} records replaced",
                    report.consolidated.len(),
                    report.skipped.len(),
                    report.records_replaced()
                );
            }
        }

        Ok(())
    }
}
