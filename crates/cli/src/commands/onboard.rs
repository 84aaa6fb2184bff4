//! `temple onboard` — First-time setup.

use std::path::Path;
use temple_config::AppConfig;

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"));

    println!("🏛️  Temple — First-Time Setup");
    println!("============================\n");

    if let Some(config_dir) = config_path.parent()
        && !config_dir.exists()
    {
        std::fs::create_dir_all(config_dir)?;
        println!("✅ Created config directory: {}", config_dir.display());
    }

    if config_path.exists() {
        println!("⚠️  Config already exists at: {}", config_path.display());
        println!("   Edit it manually or delete and re-run onboard.\n");
    } else {
        std::fs::write(&config_path, AppConfig::default_toml())?;
        println!("✅ Created config.toml at: {}", config_path.display());
    }

    let config = AppConfig::load_from(&config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    for dir in [config.data_dir.clone(), config.ingest_dir(), config.audit_dir()] {
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
            println!("✅ Created {}", dir.display());
        }
    }

    println!("\n📝 Next steps:");
    println!("   1. Set TEMPLE_LLM_API_KEY (or extraction.api_key) to enable LLM extraction");
    println!("   2. Run: temple daemon");
    println!("   3. Submit items with: temple ingest submit \"...\"\n");

    Ok(())
}
