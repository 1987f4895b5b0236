//! Tongyi Qianwen via DashScope text generation.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value as JsonValue;

use super::{ChatMessage, ModelProvider, first_choice_content, post_json};
use crate::error::UpstreamError;
use crate::model::{ApiConfig, ProviderKind};

pub struct QianwenProvider {
    client: Client,
    config: ApiConfig,
}

#[derive(Serialize)]
struct GenerationRequest<'a> {
    model: &'a str,
    input: GenerationInput<'a>,
}

#[derive(Serialize)]
struct GenerationInput<'a> {
    messages: Vec<ChatMessage<'a>>,
}

impl QianwenProvider {
    pub fn new(config: ApiConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    pub fn with_client(client: Client, config: ApiConfig) -> Self {
        Self { client, config }
    }
}

/// DashScope nests the completion under `output`: either
/// `output.choices[0].message.content` (message format) or `output.text`.
pub(crate) fn extract_text(body: &JsonValue) -> Result<String, UpstreamError> {
    let output = body
        .get("output")
        .ok_or_else(|| UpstreamError::Shape("missing 'output' in qianwen reply".to_string()))?;
    if let Some(text) = first_choice_content(output) {
        return Ok(text);
    }
    output
        .get("text")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            UpstreamError::Shape("missing 'output.choices' and 'output.text' in qianwen reply".to_string())
        })
}

#[async_trait]
impl ModelProvider for QianwenProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Qianwen
    }

    async fn generate(&self, prompt: &str) -> Result<String, UpstreamError> {
        tracing::debug!(model = %self.config.model_name, "qianwen generate");
        let request = GenerationRequest {
            model: &self.config.model_name,
            input: GenerationInput {
                messages: vec![ChatMessage {
                    role: "user",
                    content: prompt,
                }],
            },
        };
        let body = post_json(
            &self.client,
            &self.config.api_url,
            Some(&self.config.api_key),
            &request,
        )
        .await?;
        extract_text(&body)
    }
}
