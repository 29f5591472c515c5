use cascade_cache::{MemoryCache, Tier};
use clap::Parser;
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};

use crate::error::CliResult;
use crate::output::{OutputFormat, format_size};

#[derive(Parser)]
pub struct StatsCommand {
    #[clap(long, help = "Also show the startup recovery report")]
    pub recovery: bool,
}

impl StatsCommand {
    pub async fn execute(&self, cache: &MemoryCache, format: OutputFormat) -> CliResult<()> {
        let stats = cache.stats();
        let recovery = cache.store().last_recovery();

        match format {
            OutputFormat::Json => {
                let mut output = serde_json::json!({
                    "total_records": stats.tiers.total_records(),
                    "by_tier": {
                        "hot": stats.tiers.hot,
                        "warm": stats.tiers.warm,
                        "cold": stats.tiers.cold,
                    },
                    "generations": stats.tiers.generations,
                    "pending_shadows": stats.tiers.pending_shadows,
                });
                if self.recovery {
                    output["recovery"] = serde_json::to_value(recovery)?;
                }
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => {
                println!("Cascade Statistics");
                println!("==================\n");

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Tier", "Records", "Size"]);

                for tier in Tier::ALL {
                    let usage = stats.tiers.tier(tier);
                    table.add_row([
                        tier.to_string(),
                        usage.count.to_string(),
                        format_size(usage.bytes),
                    ]);
                }
                println!("{table}\n");

                let mut generations = Table::new();
                generations
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_header(["Generation", "Records"]);
                for (generation, count) in &stats.tiers.generations {
                    generations.add_row([generation.to_string(), count.to_string()]);
                }
                println!("{generations}\n");

                println!(
                    "Total: {} records, {} stale copies pending cleanup",
                    stats.tiers.total_records(),
                    stats.tiers.pending_shadows
                );

                if self.recovery {
                    println!(
                        "\nRecovery: {} warm, {} cold, {} superseded removed, {} duplicates removed, {} undecodable",
                        recovery.warm_records,
                        recovery.cold_records,
                        recovery.superseded_removed,
                        recovery.duplicates_removed,
                        recovery.undecodable
                    );
                }
            }
        }

        Ok(())
    }
}
