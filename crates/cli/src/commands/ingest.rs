//! `temple ingest` — Submit items and inspect the queue.

use clap::Subcommand;
use std::path::PathBuf;
use temple_core::ingest::{IngestItem, IngestState, IngestSubmission};
use temple_core::scope::Scope;

use super::{open_broker, preview, Invocation};

#[derive(Subcommand)]
pub enum IngestCommand {
    /// Queue content for enrichment
    Submit {
        /// Content to ingest (or use --file)
        content: Option<String>,
        /// Read the content from a file
        #[arg(long, conflicts_with = "content")]
        file: Option<PathBuf>,
        #[arg(long = "type", default_value = "note")]
        item_type: String,
        /// Who the content is about or from (default: the tenant)
        #[arg(long)]
        actor: Option<String>,
        #[arg(long, default_value = "cli")]
        source: String,
        #[arg(long)]
        source_id: Option<String>,
        /// Idempotency key; derived from the payload otherwise
        #[arg(long)]
        key: Option<String>,
        #[arg(long, default_value = "global")]
        scope: Scope,
    },

    /// Show one item, or list items
    Status {
        id: Option<String>,
        /// Only items in this state
        #[arg(long)]
        state: Option<IngestState>,
    },

    /// Process every queued item once and exit
    RunOnce,
}

fn print_item(item: &IngestItem) {
    println!("  {} [{}]", item.id, item.state);
    println!("    type:     {}", item.item_type);
    println!("    actor:    {}", item.actor_id);
    println!("    scope:    {}", item.scope);
    println!("    key:      {}", item.idempotency_key);
    println!("    attempts: {}", item.attempts);
    if let Some(error) = &item.last_error {
        println!("    error:    {error}");
    }
    println!("    content:  {}", preview(&item.content, 70));
}

pub async fn run(command: IngestCommand, invocation: &Invocation) -> Result<(), Box<dyn std::error::Error>> {
    let broker = open_broker(invocation).await?;

    match command {
        IngestCommand::Submit {
            content,
            file,
            item_type,
            actor,
            source,
            source_id,
            key,
            scope,
        } => {
            let content = match (content, file) {
                (Some(content), _) => content,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .map_err(|e| format!("Failed to read {}: {e}", path.display()))?,
                (None, None) => return Err("Provide content or --file".into()),
            };
            let actor = actor.unwrap_or_else(|| invocation.tenant.clone());
            let mut submission = IngestSubmission::new(item_type, actor, source, content).with_scope(scope);
            submission.source_id = source_id;
            if let Some(key) = key {
                submission = submission.with_key(key);
            }

            let outcome = broker.submit_ingest(submission).await?;
            if outcome.duplicate {
                println!("ℹ️  Already submitted as {} [{}]", outcome.item.id, outcome.item.state);
            } else {
                println!("📥 Queued {} [{}]", outcome.item.id, outcome.item.state);
            }
        }
        IngestCommand::Status { id: Some(id), .. } => {
            let item = broker.ingest_item(&id).await?;
            print_item(&item);
            println!("    history:");
            for step in &item.history {
                println!(
                    "      {} {} → {}{}",
                    step.at.format("%Y-%m-%d %H:%M:%S"),
                    step.from,
                    step.to,
                    step.reason.as_deref().map(|r| format!(" ({r})")).unwrap_or_default()
                );
            }
            for review in &item.reviews {
                println!(
                    "    review {} [{}] {:.2} {}",
                    review.id,
                    review.status,
                    review.confidence,
                    review.candidate.describe()
                );
            }
        }
        IngestCommand::Status { id: None, state } => {
            let items = broker.list_ingest(state).await;
            println!("📋 {} item(s)", items.len());
            for item in &items {
                print_item(item);
            }
        }
        IngestCommand::RunOnce => {
            let worker = broker.worker();
            let recovered = worker.recover().await?;
            let processed = worker.run_once().await;
            println!("⚙️  Recovered {recovered}, processed {processed} item(s)");
        }
    }

    Ok(())
}
