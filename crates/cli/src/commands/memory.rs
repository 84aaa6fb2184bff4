//! `temple memory` — Direct memory operations.

use clap::Subcommand;
use temple_broker::{RankedHit, RetrieveRequest, SearchRequest, StoreRequest};
use temple_core::scope::Scope;

use super::{open_broker, preview, Invocation};

#[derive(Subcommand)]
pub enum MemoryCommand {
    /// Store a memory in the most specific active scope
    Store {
        content: String,
        /// Write to this scope instead (global, project:NAME, session:ID)
        #[arg(long)]
        scope: Option<Scope>,
        /// Tag the memory (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Overwrite identical content
        #[arg(long)]
        force: bool,
    },

    /// Semantic retrieval across the active scopes
    Retrieve {
        query: String,
        #[arg(long)]
        scope: Option<Scope>,
        #[arg(short, long)]
        k: Option<usize>,
        /// Include entities named in the hits and their relations
        #[arg(long)]
        graph: bool,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Search by tags, optionally ranked by a query
    Search {
        query: Option<String>,
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long)]
        scope: Option<Scope>,
        #[arg(short, long)]
        k: Option<usize>,
    },

    /// Delete a memory by id
    Delete {
        id: String,
        #[arg(long)]
        scope: Option<Scope>,
    },
}

fn print_hits(hits: &[RankedHit]) {
    if hits.is_empty() {
        println!("   No memories found.");
    }
    for (i, hit) in hits.iter().enumerate() {
        println!(
            "  {:>2}. [{} | score: {:.2}] {}",
            i + 1,
            hit.entry.scope,
            hit.score,
            preview(&hit.entry.content, 80)
        );
        if !hit.entry.tags.is_empty() {
            println!("      tags: {}", hit.entry.tags.join(", "));
        }
    }
}

pub async fn run(command: MemoryCommand, invocation: &Invocation) -> Result<(), Box<dyn std::error::Error>> {
    let broker = open_broker(invocation).await?;
    let tenant = invocation.tenant.as_str();

    match command {
        MemoryCommand::Store {
            content,
            scope,
            tags,
            force,
        } => {
            let outcome = broker
                .store(
                    tenant,
                    StoreRequest {
                        content,
                        scope,
                        tags,
                        force,
                        ..Default::default()
                    },
                )
                .await?;
            if outcome.duplicate {
                println!("ℹ️  Already stored in {} (id {})", outcome.entry.scope, outcome.entry.id);
            } else {
                println!("🧠 Stored in {} (id {})", outcome.entry.scope, outcome.entry.id);
            }
        }
        MemoryCommand::Retrieve {
            query,
            scope,
            k,
            graph,
            json,
        } => {
            let response = broker
                .retrieve(
                    tenant,
                    RetrieveRequest {
                        query: query.clone(),
                        scope,
                        k,
                        expand_graph: graph,
                    },
                )
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
                return Ok(());
            }
            let scopes: Vec<String> = response.scopes.iter().map(Scope::key).collect();
            println!("🔍 \"{query}\" in {}", scopes.join(", "));
            print_hits(&response.hits);
            if let Some(neighbourhood) = response.graph {
                println!("\n  Entities:");
                for entity in &neighbourhood.entities {
                    println!("    {} ({}) [{}]", entity.name, entity.entity_type, entity.scope);
                }
                println!("  Relations:");
                for relation in &neighbourhood.relations {
                    println!(
                        "    {} -{}-> {}",
                        relation.source, relation.relation_type, relation.target
                    );
                }
            }
        }
        MemoryCommand::Search {
            query,
            tags,
            scope,
            k,
        } => {
            let hits = broker
                .search(
                    tenant,
                    SearchRequest {
                        query,
                        tags,
                        scope,
                        k,
                    },
                )
                .await?;
            print_hits(&hits);
        }
        MemoryCommand::Delete { id, scope } => {
            let scope = broker.delete(tenant, &id, scope).await?;
            println!("🗑️  Deleted {id} from {scope}");
        }
    }

    Ok(())
}
