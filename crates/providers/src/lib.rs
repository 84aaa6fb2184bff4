//! Extraction backends for Temple.
//!
//! All backends implement the `temple_core::Extractor` trait. The router
//! assembles them into a ranked [`ExtractionChain`] from configuration.

pub mod anthropic;
pub mod fallback;
pub mod heuristic;
pub mod parse;
pub mod router;

pub use anthropic::AnthropicExtractor;
pub use fallback::ExtractionChain;
pub use heuristic::HeuristicExtractor;
pub use router::build_from_config;
