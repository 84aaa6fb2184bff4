//! Builds the extraction chain from configuration.

use std::sync::Arc;
use std::time::Duration;
use temple_config::ExtractionConfig;
use temple_core::error::ExtractionError;
use tracing::{debug, warn};

use crate::anthropic::AnthropicExtractor;
use crate::fallback::ExtractionChain;
use crate::heuristic::HeuristicExtractor;

/// Assemble the ranked chain named by `config.backends`.
///
/// The anthropic backend is skipped when no API key is configured. Unknown
/// backend names are rejected so a typo cannot silently fall through to the
/// heuristic.
pub fn build_from_config(config: &ExtractionConfig) -> Result<ExtractionChain, ExtractionError> {
    let timeout = Duration::from_secs(config.timeout_secs.max(1));
    let mut chain = ExtractionChain::new("extraction");

    for backend in &config.backends {
        match backend.trim().to_lowercase().as_str() {
            "anthropic" | "llm" => {
                let Some(api_key) = config.api_key.as_deref().filter(|k| !k.is_empty()) else {
                    warn!("No LLM API key configured; skipping anthropic extraction backend");
                    continue;
                };
                let extractor = AnthropicExtractor::new(api_key)
                    .with_base_url(&config.api_url)
                    .with_model(&config.model)
                    .with_sampling(config.max_tokens, config.temperature);
                chain = chain.add(Arc::new(extractor), timeout);
            }
            "heuristic" => {
                chain = chain.add(Arc::new(HeuristicExtractor::new()?), timeout);
            }
            other => {
                return Err(ExtractionError::NotConfigured(format!(
                    "unknown extraction backend '{other}'"
                )));
            }
        }
    }

    if chain.is_empty() {
        return Err(ExtractionError::NotConfigured(
            "no usable extraction backend configured".into(),
        ));
    }
    debug!(backends = ?chain.backends(), "Extraction chain built");
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_without_key_is_heuristic_only() {
        let chain = build_from_config(&ExtractionConfig::default()).unwrap();
        assert_eq!(chain.backends(), vec!["heuristic"]);
    }

    #[test]
    fn key_enables_anthropic_first() {
        let config = ExtractionConfig {
            api_key: Some("sk-ant-test".into()),
            ..Default::default()
        };
        let chain = build_from_config(&config).unwrap();
        assert_eq!(chain.backends(), vec!["anthropic", "heuristic"]);
    }

    #[test]
    fn unknown_backend_rejected() {
        let config = ExtractionConfig {
            backends: vec!["heuristc".into()],
            ..Default::default()
        };
        assert!(build_from_config(&config).is_err());
    }

    #[test]
    fn empty_chain_rejected() {
        let config = ExtractionConfig {
            backends: vec!["anthropic".into()],
            ..Default::default()
        };
        assert!(matches!(
            build_from_config(&config),
            Err(ExtractionError::NotConfigured(_))
        ));
    }
}
