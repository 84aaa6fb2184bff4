//! Anthropic Messages API extractor.
//!
//! Sends the text as a single user turn under a fixed system prompt that asks
//! for JSON entities and relations, then validates the reply.
//!
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field

use async_trait::async_trait;
use serde::Deserialize;
use temple_core::error::ExtractionError;
use temple_core::extraction::{
    EntityCandidate, ExtractionRequest, ExtractionResult, ExtractionUsage, Extractor,
    ENTITY_TYPES, RELATION_TYPES,
};
use tracing::{debug, warn};

use crate::heuristic::{infer_entity_type, normalize_entity_name};
use crate::parse::{parse_llm_json, validate_entities, validate_relations};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";
const DEFAULT_MAX_TOKENS: u32 = 2048;

/// System prompt for structured extraction.
pub fn system_prompt() -> String {
    format!(
        r#"You are an entity and relation extractor. Given a text payload, extract structured entities and relations.

Return ONLY valid JSON (no markdown fences) with this exact schema:
{{
  "entities": [
    {{"name": "string", "type": "string", "confidence": 0.0}}
  ],
  "relations": [
    {{"source": "string", "target": "string", "type": "string", "confidence": 0.0}}
  ]
}}

Entity type must be one of: {}
Relation type must be one of: {}
Confidence is a float between 0.0 and 1.0.

Rules:
- Extract real named entities, not generic nouns or pronouns.
- Normalize names to title case (except all-caps acronyms).
- For each relation, both source and target must appear in the entities list.
- Assign confidence based on how explicitly the text supports the extraction.
- If no entities or relations are found, return empty lists.
"#,
        ENTITY_TYPES.join(", "),
        RELATION_TYPES.join(", ")
    )
}

pub struct AnthropicExtractor {
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl AnthropicExtractor {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: 0.0,
            client: reqwest::Client::new(),
        }
    }

    /// Custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_sampling(mut self, max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    fn backend_error(message: impl Into<String>) -> ExtractionError {
        ExtractionError::Backend {
            backend: "anthropic".into(),
            message: message.into(),
        }
    }

    /// Turn the model's text reply into a validated result.
    pub fn parse_reply(
        text: &str,
        actor_id: &str,
        max_entities: usize,
    ) -> Result<ExtractionResult, ExtractionError> {
        let parsed = parse_llm_json(text)?;
        let mut entities = validate_entities(&parsed["entities"]);
        entities.truncate(max_entities.max(1));
        let relations = validate_relations(&parsed["relations"], &entities);

        let actor = normalize_entity_name(actor_id);
        if !actor.is_empty() && entities.iter().all(|e| e.name != actor) {
            entities.insert(
                0,
                EntityCandidate {
                    entity_type: infer_entity_type(&actor).to_string(),
                    name: actor,
                    confidence: 1.0,
                },
            );
        }

        Ok(ExtractionResult {
            entities,
            relations,
            method: "llm".into(),
            fallback_errors: Vec::new(),
            usage: None,
        })
    }
}

#[async_trait]
impl Extractor for AnthropicExtractor {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn extract(&self, request: &ExtractionRequest) -> Result<ExtractionResult, ExtractionError> {
        if self.api_key.is_empty() {
            return Err(ExtractionError::NotConfigured(
                "no API key for the anthropic backend".into(),
            ));
        }

        let url = format!("{}/v1/messages", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "system": system_prompt(),
            "messages": [{"role": "user", "content": request.text}],
        });

        debug!(backend = "anthropic", model = %self.model, "Sending extraction request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::backend_error(e.to_string()))?;

        let status = response.status().as_u16();
        if status == 401 || status == 403 {
            return Err(Self::backend_error("Invalid Anthropic API key"));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Anthropic API error");
            return Err(Self::backend_error(format!("HTTP {status}: {error_body}")));
        }

        let api_resp: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| ExtractionError::InvalidResponse(format!("Failed to parse Anthropic response: {e}")))?;

        let text = api_resp
            .content
            .iter()
            .find_map(|block| match block {
                ResponseContentBlock::Text { text } => Some(text.as_str()),
                ResponseContentBlock::Other => None,
            })
            .ok_or_else(|| ExtractionError::InvalidResponse("reply has no text block".into()))?;

        let mut result = Self::parse_reply(text, &request.actor_id, request.max_entities)?;
        result.usage = Some(ExtractionUsage {
            input_tokens: api_resp.usage.input_tokens,
            output_tokens: api_resp.usage.output_tokens,
        });
        Ok(result)
    }
}

// --- Anthropic API types ---

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ResponseContentBlock>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}
