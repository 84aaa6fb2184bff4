//! Temple CLI — the main entry point.
//!
//! Commands:
//! - `onboard` — Write the default config and create the data directory
//! - `daemon`  — Run the enrichment worker and session sweeper
//! - `status`  — Show stats and component health
//! - `memory`  — Store, retrieve, search and delete memories
//! - `ingest`  — Submit items and inspect the ingest queue
//! - `review`  — List and decide review candidates
//! - `graph`   — Export the knowledge graph, migrate legacy schemas
//! - `audit`   — Read and compact the audit log

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

use commands::{
    audit::AuditCommand, graph::GraphCommand, ingest::IngestCommand, memory::MemoryCommand,
    review::ReviewCommand, Invocation,
};

#[derive(Parser)]
#[command(
    name = "temple",
    about = "Temple — scoped long-term memory for AI agents",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Config file (default: ~/.temple/config.toml)
    #[arg(long, global = true, env = "TEMPLE_CONFIG")]
    config: Option<PathBuf>,

    /// Tenant the command acts for (default: config `default_tenant`)
    #[arg(long, global = true)]
    tenant: Option<String>,

    /// Activate this project for the command
    #[arg(long, global = true)]
    project: Option<String>,

    /// Activate this session for the command
    #[arg(long, global = true)]
    session: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration and data directory
    Onboard,

    /// Run the enrichment worker and session sweeper until Ctrl-C
    Daemon,

    /// Show stats and health
    Status,

    /// Direct memory operations
    Memory {
        #[command(subcommand)]
        command: MemoryCommand,
    },

    /// Ingest queue
    Ingest {
        #[command(subcommand)]
        command: IngestCommand,
    },

    /// Review queue
    Review {
        #[command(subcommand)]
        command: ReviewCommand,
    },

    /// Knowledge graph maintenance
    Graph {
        #[command(subcommand)]
        command: GraphCommand,
    },

    /// Audit log
    Audit {
        #[command(subcommand)]
        command: AuditCommand,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    if let Commands::Onboard = cli.command {
        return commands::onboard::run(cli.config.as_deref()).await;
    }

    let config = commands::load_config(cli.config.as_deref())?;
    let invocation = Invocation {
        tenant: cli.tenant.unwrap_or_else(|| config.default_tenant.clone()),
        project: cli.project,
        session: cli.session,
        config,
    };

    match cli.command {
        Commands::Onboard => {}
        Commands::Daemon => commands::daemon::run(&invocation).await?,
        Commands::Status => commands::status::run(&invocation).await?,
        Commands::Memory { command } => commands::memory::run(command, &invocation).await?,
        Commands::Ingest { command } => commands::ingest::run(command, &invocation).await?,
        Commands::Review { command } => commands::review::run(command, &invocation).await?,
        Commands::Graph { command } => commands::graph::run(command, &invocation).await?,
        Commands::Audit { command } => commands::audit::run(command, &invocation).await?,
    }

    Ok(())
}
