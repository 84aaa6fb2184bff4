//! `temple audit` — Read and compact the JSONL audit log.

use clap::Subcommand;
use temple_audit::JsonlAuditSink;
use temple_core::scope::Scope;

use super::Invocation;

#[derive(Subcommand)]
pub enum AuditCommand {
    /// Show the latest entries for a scope
    Show {
        #[arg(long, default_value = "global")]
        scope: Scope,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Keep only the newest entries per scope
    Compact {
        /// Compact this scope only (default: every scope with a log)
        #[arg(long)]
        scope: Option<Scope>,
        /// Entries to keep (default: audit.compact_keep)
        #[arg(long)]
        keep: Option<usize>,
    },
}

/// The scope whose log file has this stem.
fn scope_for_stem(stem: &str) -> Option<Scope> {
    if stem == "global" {
        return Some(Scope::Global);
    }
    let (tier, name) = stem.split_once('_')?;
    match tier {
        "project" => Some(Scope::project(name)),
        "session" => Some(Scope::session(name)),
        _ => None,
    }
}

pub async fn run(command: AuditCommand, invocation: &Invocation) -> Result<(), Box<dyn std::error::Error>> {
    let sink = JsonlAuditSink::new(invocation.config.audit_dir());

    match command {
        AuditCommand::Show { scope, limit } => {
            let entries = sink.read(&scope, limit)?;
            println!("📜 Audit log for {scope} ({} entries)", entries.len());
            for entry in &entries {
                println!(
                    "  {} {:<20} {:<8} {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    serde_json::to_value(entry.action)?.as_str().unwrap_or_default(),
                    serde_json::to_value(entry.outcome)?.as_str().unwrap_or_default(),
                    serde_json::Value::Object(entry.details.clone())
                );
            }
        }
        AuditCommand::Compact { scope, keep } => {
            let keep = keep.unwrap_or(invocation.config.audit.compact_keep);
            let scopes = match scope {
                Some(scope) => vec![scope],
                None => sink.scopes().iter().filter_map(|s| scope_for_stem(s)).collect(),
            };
            let mut removed = 0;
            for scope in &scopes {
                removed += sink.compact(scope, keep)?;
            }
            println!(
                "🧹 Removed {removed} entries across {} log(s), keeping {keep} each",
                scopes.len()
            );
        }
    }

    Ok(())
}
