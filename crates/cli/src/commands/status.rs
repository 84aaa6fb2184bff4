//! `temple status` — Stats and component health.

use temple_config::AppConfig;

use super::{open_broker, Invocation};

pub async fn run(invocation: &Invocation) -> Result<(), Box<dyn std::error::Error>> {
    let broker = open_broker(invocation).await?;
    let stats = broker.stats(&invocation.tenant).await?;
    let health = broker.health().await;

    println!("🏛️  Temple Status");
    println!("================");
    println!("  Config dir:   {}", AppConfig::config_dir().display());
    println!("  Data dir:     {}", broker.config().data_dir.display());
    println!("  Tenant:       {}", stats.tenant);
    println!(
        "  Project:      {}",
        stats.context.project.as_deref().unwrap_or("(none)")
    );
    println!(
        "  Session:      {}",
        stats
            .context
            .session
            .as_ref()
            .map_or("(none)", |s| s.id.as_str())
    );
    println!("  Vectors:      {}", stats.vector_backend);
    println!("  Graph:        {}", stats.graph_backend);
    println!("  Extraction:   {}", stats.extraction_backend);
    println!("  Embedder:     {}", stats.embedder);

    println!("\n  Partitions:");
    if stats.partitions.is_empty() {
        println!("    (none)");
    }
    for (partition, count) in &stats.partitions {
        println!("    {partition:<32} {count}");
    }
    println!("\n  Entities:     {}", stats.entities);
    println!("  Relations:    {}", stats.relations);

    println!("\n  Ingest:");
    for (state, count) in &stats.ingest {
        println!("    {state:<18} {count}");
    }
    println!("  Pending reviews: {}", stats.pending_reviews);

    if let Ok(Some(version)) = broker.graph_schema_version().await {
        println!("\n  Graph schema: {version}");
        if version == "legacy" {
            println!("  ⚠️  Legacy graph schema — run `temple graph migrate`");
        }
    }

    println!();
    for component in &health.components {
        match &component.error {
            None => println!("  ✅ {}", component.name),
            Some(e) => println!("  ❌ {}: {e}", component.name),
        }
    }

    Ok(())
}
