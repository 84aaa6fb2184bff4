pub mod audit;
pub mod daemon;
pub mod graph;
pub mod ingest;
pub mod memory;
pub mod onboard;
pub mod review;
pub mod status;

use std::path::Path;
use temple_broker::{ContextUpdate, MemoryBroker};
use temple_config::AppConfig;

/// Resolved global flags shared by every command.
pub struct Invocation {
    pub config: AppConfig,
    pub tenant: String,
    pub project: Option<String>,
    pub session: Option<String>,
}

impl Invocation {
    fn context_update(&self) -> Option<ContextUpdate> {
        if self.project.is_none() && self.session.is_none() {
            return None;
        }
        Some(ContextUpdate {
            project: self.project.clone(),
            session: self.session.clone(),
            session_ttl_secs: None,
        })
    }
}

pub fn load_config(path: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => {
            let mut config =
                AppConfig::load_from(path).map_err(|e| format!("Failed to load config: {e}"))?;
            config.apply_env_overrides(|key| std::env::var(key).ok())?;
            config
        }
        None => AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?,
    };
    Ok(config)
}

/// Open the broker and activate the `--project`/`--session` context.
pub async fn open_broker(invocation: &Invocation) -> Result<MemoryBroker, Box<dyn std::error::Error>> {
    let broker = MemoryBroker::open(invocation.config.clone()).await?;
    if let Some(update) = invocation.context_update() {
        broker.set_context(&invocation.tenant, update).await?;
    }
    Ok(broker)
}

/// First `max` characters of `text` on one line.
pub fn preview(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        return flat;
    }
    let cut: String = flat.chars().take(max).collect();
    format!("{cut}…")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates_on_char_boundary() {
        assert_eq!(preview("héllo   wörld", 20), "héllo wörld");
        assert_eq!(preview("héllo wörld", 4), "héll…");
    }

    #[test]
    fn context_update_only_with_flags() {
        let mut invocation = Invocation {
            config: AppConfig::default(),
            tenant: "t".into(),
            project: None,
            session: None,
        };
        assert!(invocation.context_update().is_none());
        invocation.session = Some("s1".into());
        let update = invocation.context_update().unwrap();
        assert_eq!(update.session.as_deref(), Some("s1"));
        assert!(update.project.is_none());
    }
}
