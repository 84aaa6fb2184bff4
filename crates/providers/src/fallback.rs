//! Extraction fallback — ranked backend chain with per-backend timeouts.
//!
//! When a backend fails (timeout, bad reply, missing credentials), the next
//! backend in the chain is tried. The first success is returned with the
//! errors of the backends skipped before it.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use temple_core::error::ExtractionError;
use temple_core::extraction::{ExtractionRequest, ExtractionResult, Extractor};
use tracing::{info, warn};

/// An extractor that wraps an ordered list of extractors and falls back on failure.
pub struct ExtractionChain {
    name: String,
    chain: Vec<ChainEntry>,
}

struct ChainEntry {
    extractor: Arc<dyn Extractor>,
    timeout: Duration,
}

impl ExtractionChain {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            chain: Vec::new(),
        }
    }

    /// Add a backend with a custom timeout.
    pub fn add(mut self, extractor: Arc<dyn Extractor>, timeout: Duration) -> Self {
        self.chain.push(ChainEntry { extractor, timeout });
        self
    }

    /// Add a backend with the default timeout (60s).
    pub fn add_default(self, extractor: Arc<dyn Extractor>) -> Self {
        self.add(extractor, Duration::from_secs(60))
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Backend names in rank order.
    pub fn backends(&self) -> Vec<String> {
        self.chain
            .iter()
            .map(|entry| entry.extractor.name().to_string())
            .collect()
    }
}

#[async_trait]
impl Extractor for ExtractionChain {
    fn name(&self) -> &str {
        &self.name
    }

    async fn extract(&self, request: &ExtractionRequest) -> Result<ExtractionResult, ExtractionError> {
        if self.chain.is_empty() {
            return Err(ExtractionError::NotConfigured(
                "No backends in extraction chain".into(),
            ));
        }

        let mut errors: Vec<String> = Vec::new();
        for (i, entry) in self.chain.iter().enumerate() {
            let backend = entry.extractor.name().to_string();

            info!(
                backend = %backend,
                attempt = i + 1,
                total = self.chain.len(),
                "Extraction: trying backend"
            );

            let error = match tokio::time::timeout(entry.timeout, entry.extractor.extract(request)).await {
                Ok(Ok(mut result)) => {
                    if result.method.is_empty() {
                        result.method = backend;
                    }
                    result.fallback_errors = errors;
                    return Ok(result);
                }
                Ok(Err(e)) => e,
                Err(_) => ExtractionError::Timeout {
                    backend: backend.clone(),
                    timeout_secs: entry.timeout.as_secs(),
                },
            };

            warn!(backend = %backend, error = %error, "Extraction: backend failed, trying next");
            errors.push(format!("{backend}: {error}"));
        }

        Err(ExtractionError::AllFailed(errors.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use temple_core::extraction::EntityCandidate;

    /// A mock backend that always fails.
    struct FailingExtractor {
        name: String,
        error: ExtractionError,
        call_count: Mutex<usize>,
    }

    impl FailingExtractor {
        fn new(name: &str, error: ExtractionError) -> Self {
            Self {
                name: name.into(),
                error,
                call_count: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.call_count.lock().unwrap()
        }
    }

    #[async_trait]
    impl Extractor for FailingExtractor {
        fn name(&self) -> &str {
            &self.name
        }

        async fn extract(&self, _request: &ExtractionRequest) -> Result<ExtractionResult, ExtractionError> {
            *self.call_count.lock().unwrap() += 1;
            Err(self.error.clone())
        }
    }

    /// A mock backend that always succeeds with one entity.
    struct SuccessExtractor {
        name: String,
        call_count: Mutex<usize>,
    }

    impl SuccessExtractor {
        fn new(name: &str) -> Self {
            Self {
                name: name.into(),
                call_count: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.call_count.lock().unwrap()
        }
    }

    #[async_trait]
    impl Extractor for SuccessExtractor {
        fn name(&self) -> &str {
            &self.name
        }

        async fn extract(&self, _request: &ExtractionRequest) -> Result<ExtractionResult, ExtractionError> {
            *self.call_count.lock().unwrap() += 1;
            Ok(ExtractionResult {
                entities: vec![EntityCandidate {
                    name: "Alice".into(),
                    entity_type: "person".into(),
                    confidence: 0.9,
                }],
                ..Default::default()
            })
        }
    }

    /// A mock backend that hangs forever (for timeout testing).
    struct HangingExtractor;

    #[async_trait]
    impl Extractor for HangingExtractor {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn extract(&self, _request: &ExtractionRequest) -> Result<ExtractionResult, ExtractionError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!()
        }
    }

    fn request() -> ExtractionRequest {
        ExtractionRequest::new("Alice works with Bob", "alice")
    }

    #[tokio::test]
    async fn first_backend_succeeds() {
        let b1 = Arc::new(SuccessExtractor::new("primary"));
        let b2 = Arc::new(SuccessExtractor::new("secondary"));

        let chain = ExtractionChain::new("test")
            .add_default(b1.clone())
            .add_default(b2.clone());

        let result = chain.extract(&request()).await.unwrap();
        assert_eq!(result.method, "primary");
        assert!(result.fallback_errors.is_empty());

        assert_eq!(b1.calls(), 1);
        assert_eq!(b2.calls(), 0);
    }

    #[tokio::test]
    async fn falls_back_and_records_errors() {
        let b1 = Arc::new(FailingExtractor::new(
            "primary",
            ExtractionError::InvalidResponse("not json".into()),
        ));
        let b2 = Arc::new(SuccessExtractor::new("secondary"));

        let chain = ExtractionChain::new("test")
            .add_default(b1.clone())
            .add_default(b2.clone());

        let result = chain.extract(&request()).await.unwrap();
        assert_eq!(result.method, "secondary");
        assert_eq!(result.fallback_errors.len(), 1);
        assert!(result.fallback_errors[0].starts_with("primary:"));
        assert_eq!(b1.calls(), 1);
        assert_eq!(b2.calls(), 1);
    }

    #[tokio::test]
    async fn all_backends_fail() {
        let chain = ExtractionChain::new("test")
            .add_default(Arc::new(FailingExtractor::new(
                "primary",
                ExtractionError::NotConfigured("no key".into()),
            )))
            .add_default(Arc::new(FailingExtractor::new(
                "secondary",
                ExtractionError::InvalidResponse("garbage".into()),
            )));

        match chain.extract(&request()).await.unwrap_err() {
            ExtractionError::AllFailed(message) => {
                assert!(message.contains("primary"));
                assert!(message.contains("garbage"));
            }
            other => panic!("Expected AllFailed, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_triggers_fallback() {
        let b2 = Arc::new(SuccessExtractor::new("secondary"));
        let chain = ExtractionChain::new("test")
            .add(Arc::new(HangingExtractor), Duration::from_millis(50))
            .add_default(b2.clone());

        let result = chain.extract(&request()).await.unwrap();
        assert_eq!(b2.calls(), 1);
        assert!(result.fallback_errors[0].contains("timed out"));
    }

    #[tokio::test]
    async fn empty_chain_returns_not_configured() {
        let chain = ExtractionChain::new("empty");
        assert!(chain.is_empty());
        assert!(matches!(
            chain.extract(&request()).await,
            Err(ExtractionError::NotConfigured(_))
        ));
    }

    #[test]
    fn backend_names_in_order() {
        let chain = ExtractionChain::new("test")
            .add_default(Arc::new(SuccessExtractor::new("a")))
            .add_default(Arc::new(SuccessExtractor::new("b")));
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.backends(), vec!["a", "b"]);
    }
}
