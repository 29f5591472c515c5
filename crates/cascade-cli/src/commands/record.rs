use cascade_cache::{MemoryCache, MemoryRecord, Payload, RecordId, Tier};
use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};

use super::{parse_kind, parse_tier};
use crate::error::{CliError, CliResult};
use crate::output::{OutputFormat, format_size, format_timestamp, truncate_string};

#[derive(Parser)]
pub struct RecordCommand {
    #[clap(subcommand)]
    pub command: RecordSubcommand,
}

#[derive(Subcommand)]
pub enum RecordSubcommand {
    #[clap(about = "List indexed records")]
    List(ListArgs),

    #[clap(about = "Show a record without promoting it")]
    Show(ShowArgs),

    #[clap(about = "Store a new record")]
    Add(AddArgs),

    #[clap(about = "Delete a record from every tier")]
    Delete(DeleteArgs),
}

#[derive(Parser)]
pub struct ListArgs {
    #[clap(
        long,
        short,
        default_value = "20",
        help = "Maximum number of records to display"
    )]
    pub limit: usize,

    #[clap(long, short, help = "Filter by tier (hot, warm, cold)")]
    pub tier: Option<String>,

    #[clap(long, help = "Filter to records of this conversation")]
    pub conversation: Option<String>,
}

#[derive(Parser)]
pub struct ShowArgs {
    #[clap(help = "Record ID (UUID format)")]
    pub id: String,
}

#[derive(Parser)]
pub struct AddArgs {
    #[clap(help = "Record content text")]
    pub text: String,

    #[clap(
        long,
        short,
        default_value = "note",
        help = "Record kind (turn, tool_output, note, summary)"
    )]
    pub kind: String,

    #[clap(long, help = "Conversation the record belongs to")]
    pub conversation: Option<String>,
}

#[derive(Parser)]
pub struct DeleteArgs {
    #[clap(help = "Record ID to delete (UUID format)")]
    pub id: String,
}

fn parse_id(s: &str) -> CliResult<RecordId> {
    s.parse::<RecordId>()
        .map_err(|e| CliError::usage(format!("Invalid UUID format: {e}")))
}

impl RecordCommand {
    pub async fn execute(&self, cache: &MemoryCache, format: OutputFormat) -> CliResult<()> {
        match &self.command {
            RecordSubcommand::List(args) => Self::list(cache, args, format).await,
            RecordSubcommand::Show(args) => Self::show(cache, args, format).await,
            RecordSubcommand::Add(args) => Self::add(cache, args, format).await,
            RecordSubcommand::Delete(args) => Self::delete(cache, args, format).await,
        }
    }

    async fn list(cache: &MemoryCache, args: &ListArgs, format: OutputFormat) -> CliResult<()> {
        let tiers: Vec<Tier> = match args.tier.as_deref() {
            Some(t) => vec![parse_tier(t)?],
            None => Tier::ALL.to_vec(),
        };

        let mut entries = cache.store().scan(&tiers).await;
        if let Some(ref conversation) = args.conversation {
            entries.retain(|e| e.meta.conversation_id.as_deref() == Some(conversation.as_str()));
        }
        entries.sort_by(|a, b| b.meta.created_at.cmp(&a.meta.created_at));
        entries.truncate(args.limit);

        match format {
            OutputFormat::Json => {
                let output: Vec<_> = entries
                    .iter()
                    .map(|e| {
                        serde_json::json!({
                            "id": e.id.to_string(),
                            "kind": e.meta.kind,
                            "tier": e.tier,
                            "score": e.score,
                            "generation": e.meta.generation,
                            "size_bytes": e.meta.size_bytes,
                            "conversation_id": e.meta.conversation_id,
                            "created_at": e.meta.created_at.to_rfc3339(),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => {
                if entries.is_empty() {
                    println!("No records found.");
                    return Ok(());
                }

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["ID", "Kind", "Tier", "Score", "Gen", "Size", "Created"]);

                for entry in &entries {
                    table.add_row([
                        truncate_string(&entry.id.to_string(), 8),
                        entry.meta.kind.to_string(),
                        entry.tier.to_string(),
                        format!("{:.3}", entry.score),
                        entry.meta.generation.to_string(),
                        format_size(entry.meta.size_bytes),
                        format_timestamp(&entry.meta.created_at),
                    ]);
                }

                println!("{table}");
                println!("\nTotal: {} records", entries.len());
            }
        }

        Ok(())
    }

    async fn show(cache: &MemoryCache, args: &ShowArgs, format: OutputFormat) -> CliResult<()> {
        let id = parse_id(&args.id)?;
        let store = cache.store();
        let tier = store
            .locate(id)
            .await
            .ok_or(CliError::NotFound(id))?;
        let record = store
            .peek(id, store.default_deadline())
            .await?
            .ok_or(CliError::NotFound(id))?;

        match format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "id": record.id.to_string(),
                    "kind": record.kind,
                    "tier": tier,
                    "content": record.payload.text(),
                    "embedding_size": record.payload.embedding.as_ref().map(Vec::len),
                    "conversation_id": record.conversation_id,
                    "created_at": record.created_at.to_rfc3339(),
                    "last_accessed_at": record.last_accessed_at.to_rfc3339(),
                    "access_count": record.access_count,
                    "size_bytes": record.size_bytes,
                    "generation": record.consolidation_generation,
                    "source_ids": record.source_ids,
                    "lineage": record.lineage,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => {
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Property", "Value"]);

                table.add_row(["ID", &record.id.to_string()]);
                table.add_row(["Kind", record.kind.as_str()]);
                table.add_row(["Tier", tier.as_str()]);
                table.add_row(["Content", &record.payload.text()]);
                table.add_row([
                    "Conversation ID",
                    record.conversation_id.as_deref().unwrap_or("-"),
                ]);
                table.add_row(["Created", &record.created_at.to_rfc3339()]);
                table.add_row(["Last Accessed", &record.last_accessed_at.to_rfc3339()]);
                table.add_row(["Access Count", &record.access_count.to_string()]);
                table.add_row(["Size", &format_size(record.size_bytes)]);
                table.add_row(["Generation", &record.consolidation_generation.to_string()]);
                if record.is_consolidated() {
                    table.add_row(["Sources", &record.source_ids.len().to_string()]);
                    table.add_row(["Lineage", &record.lineage.len().to_string()]);
                }

                println!("{table}");
            }
        }

        Ok(())
    }

    async fn add(cache: &MemoryCache, args: &AddArgs, format: OutputFormat) -> CliResult<()> {
        let kind = parse_kind(&args.kind)?;
        let mut record = MemoryRecord::new(kind, Payload::new(args.text.as_str()));
        if let Some(ref conversation) = args.conversation {
            record = record.with_conversation(conversation.as_str());
        }
        let id = cache.put(record).await?;

        match format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "id": id.to_string(),
                    "kind": kind,
                    "created": true,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => {
                println!("Record {id} created.");
            }
        }

        Ok(())
    }

    async fn delete(cache: &MemoryCache, args: &DeleteArgs, format: OutputFormat) -> CliResult<()> {
        let id = parse_id(&args.id)?;
        let deleted = cache.delete(id).await?;

        match format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "id": args.id,
                    "deleted": deleted,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => {
                if deleted {
                    println!("Record {} deleted successfully.", args.id);
                } else {
                    println!("Record {} not found.", args.id);
                }
            }
        }

        Ok(())
    }
}
