//! `temple review` — Decide medium-confidence candidates.

use clap::Subcommand;
use temple_core::ingest::{ReviewDecision, ReviewStatus};

use super::{open_broker, Invocation};

#[derive(Subcommand)]
pub enum ReviewCommand {
    /// List review candidates
    List {
        /// pending, approved or rejected (default: pending)
        #[arg(long, default_value = "pending")]
        status: ReviewStatus,
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },

    /// Approve a candidate and write it to the graph
    Approve {
        id: String,
        #[arg(long)]
        reviewer: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },

    /// Reject a candidate
    Reject {
        id: String,
        #[arg(long)]
        reviewer: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
}

pub async fn run(command: ReviewCommand, invocation: &Invocation) -> Result<(), Box<dyn std::error::Error>> {
    let broker = open_broker(invocation).await?;

    let (id, decision) = match command {
        ReviewCommand::List { status, limit } => {
            let reviews = broker.list_reviews(Some(status), limit).await;
            println!("🗳️  {} {status} review(s)", reviews.len());
            for review in &reviews {
                println!(
                    "  {} [{:.2}] {} ({})",
                    review.id,
                    review.confidence,
                    review.candidate.describe(),
                    review.scope
                );
                println!("      item: {}", review.item_id);
                if let Some(error) = &review.error {
                    println!("      ⚠️  last approval failed: {error}");
                }
            }
            return Ok(());
        }
        ReviewCommand::Approve { id, reviewer, notes } => (
            id,
            ReviewDecision {
                approve: true,
                reviewer,
                notes,
            },
        ),
        ReviewCommand::Reject { id, reviewer, notes } => (
            id,
            ReviewDecision {
                approve: false,
                reviewer,
                notes,
            },
        ),
    };

    let decided = broker.decide_review(&id, decision).await?;
    let item = broker.ingest_item(&decided.item_id).await?;
    println!(
        "✅ {} {} — item {} is {}",
        decided.status,
        decided.candidate.describe(),
        item.id,
        item.state
    );
    Ok(())
}
