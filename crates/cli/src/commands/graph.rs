//! `temple graph` — Export and schema migration.

use clap::Subcommand;
use std::path::PathBuf;
use temple_broker::ExportFilter;
use temple_core::scope::Scope;

use super::{open_broker, Invocation};

#[derive(Subcommand)]
pub enum GraphCommand {
    /// Export entities and relations as JSON
    Export {
        /// Export only this scope (default: every active scope)
        #[arg(long)]
        scope: Option<Scope>,
        /// Include stored memories
        #[arg(long)]
        memories: bool,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Migrate a legacy graph database to the scoped schema
    Migrate,
}

pub async fn run(command: GraphCommand, invocation: &Invocation) -> Result<(), Box<dyn std::error::Error>> {
    let broker = open_broker(invocation).await?;

    match command {
        GraphCommand::Export {
            scope,
            memories,
            output,
        } => {
            let export = broker
                .export_graph(
                    &invocation.tenant,
                    ExportFilter {
                        scope,
                        include_memories: memories,
                    },
                )
                .await?;
            let json = serde_json::to_string_pretty(&export)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, &json)?;
                    println!(
                        "📤 Exported {} entities and {} relations to {}",
                        export.entities.len(),
                        export.relations.len(),
                        path.display()
                    );
                }
                None => println!("{json}"),
            }
        }
        GraphCommand::Migrate => {
            let report = broker.migrate_graph().await?;
            if report.migrated {
                println!(
                    "✅ Migrated {} entities and {} relations (schema {})",
                    report.entities, report.relations, report.schema_version
                );
            } else {
                println!(
                    "ℹ️  Nothing to migrate: {}",
                    report.reason.as_deref().unwrap_or("schema is current")
                );
            }
        }
    }

    Ok(())
}
