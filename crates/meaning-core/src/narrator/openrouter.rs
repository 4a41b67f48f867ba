//! OpenRouter narrator: OpenAI-compatible chat completion over reqwest.
//!
//! API key: `OPENROUTER_API_KEY`. Any transport, status or parse failure is a
//! `Narrator` error so the engine can fall back to the mechanical justification.

use super::{NarrationRequest, Narrator};
use crate::error::{MeaningError, MeaningResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const OPENROUTER_API_BASE: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "meta-llama/llama-3.3-70b-instruct";

const SYSTEM_PROMPT: &str = "You explain why two image meaning vectors match. \
    Use only the facts in the hint; do not invent features. \
    Answer in two or three plain sentences.";

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: String,
}

pub struct OpenRouterNarrator {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenRouterNarrator {
    /// `None` when `OPENROUTER_API_KEY` is unset or blank.
    pub fn from_env() -> Option<Self> {
        let key = std::env::var("OPENROUTER_API_KEY").ok()?.trim().to_string();
        if key.is_empty() {
            return None;
        }
        Some(Self::new(key))
    }

    pub fn new(api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            api_key: api_key.trim().to_string(),
            model: DEFAULT_MODEL.to_string(),
            base_url: OPENROUTER_API_BASE.to_string(),
            client,
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    /// Point at another OpenAI-compatible endpoint.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn user_prompt(request: &NarrationRequest) -> String {
        format!(
            "Query vector: {:?}\nMatched vector: {:?}\nSimilarity score: {:.3}\nHint: {}",
            request.vector_a, request.vector_b, request.score, request.hint
        )
    }
}

#[async_trait]
impl Narrator for OpenRouterNarrator {
    fn name(&self) -> &str {
        "openrouter"
    }

    async fn narrate(&self, request: &NarrationRequest) -> MeaningResult<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: Self::user_prompt(request),
                },
            ],
            temperature: Some(0.2),
            max_tokens: Some(400),
        };

        let res = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("X-Title", "meaning-engine")
            .json(&body)
            .send()
            .await
            .map_err(|e| MeaningError::Narrator(format!("request failed: {}", e)))?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(MeaningError::Narrator(format!("API error {}: {}", status, body)));
        }

        let parsed: ChatResponse = res
            .json()
            .await
            .map_err(|e| MeaningError::Narrator(format!("response parse failed: {}", e)))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| MeaningError::Narrator("empty completion".to_string()))?;
        debug!(target: "meaning::narrator", model = %self.model, chars = text.len(), "Narration received");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_carries_vectors_and_hint() {
        let req = NarrationRequest {
            vector_a: vec![1.0, 0.0],
            vector_b: vec![1.0, 0.5],
            score: 0.9,
            hint: "shared is_dog".to_string(),
        };
        let prompt = OpenRouterNarrator::user_prompt(&req);
        assert!(prompt.contains("[1.0, 0.0]"));
        assert!(prompt.contains("0.900"));
        assert!(prompt.ends_with("Hint: shared is_dog"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_narrator_error() {
        let narrator = OpenRouterNarrator::new("test-key".to_string())
            .with_base_url("http://127.0.0.1:9/v1/");
        let req = NarrationRequest {
            vector_a: vec![],
            vector_b: vec![],
            score: 0.0,
            hint: String::new(),
        };
        let err = narrator.narrate(&req).await.unwrap_err();
        assert!(matches!(err, MeaningError::Narrator(_)));
    }
}
