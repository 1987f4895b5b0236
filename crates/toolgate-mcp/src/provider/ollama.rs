//! Ollama local model server.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value as JsonValue;

use super::{ModelProvider, post_json};
use crate::error::UpstreamError;
use crate::model::{OllamaConfig, ProviderKind};

pub struct OllamaProvider {
    client: Client,
    config: OllamaConfig,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

impl OllamaProvider {
    pub fn new(config: OllamaConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    pub fn with_client(client: Client, config: OllamaConfig) -> Self {
        Self { client, config }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.config.base_url.trim_end_matches('/'))
    }
}

/// `{"response": "..."}`
pub(crate) fn extract_text(body: &JsonValue) -> Result<String, UpstreamError> {
    body.get("response")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| UpstreamError::Shape("missing 'response' in ollama reply".to_string()))
}

#[async_trait]
impl ModelProvider for OllamaProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    async fn generate(&self, prompt: &str) -> Result<String, UpstreamError> {
        let url = self.endpoint();
        tracing::debug!(model = %self.config.model_name, %url, "ollama generate");
        let request = GenerateRequest {
            model: &self.config.model_name,
            prompt,
            stream: false,
        };
        let body = post_json(&self.client, &url, None, &request).await?;
        extract_text(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testutil::{loopback_client, serve_once};
    use serde_json::json;

    #[test]
    fn extracts_response_field() {
        assert_eq!(extract_text(&json!({"response": "ok"})).unwrap(), "ok");
        assert!(matches!(
            extract_text(&json!({"message": "ok"})),
            Err(UpstreamError::Shape(_))
        ));
    }

    #[tokio::test]
    async fn posts_prompt_to_generate_endpoint() {
        let (base, stub) = serve_once(200, r#"{"model":"llama2","response":"Bonjour"}"#).await;
        let provider = OllamaProvider::with_client(
            loopback_client(),
            OllamaConfig {
                base_url: format!("{base}/"),
                model_name: "llama2".into(),
            },
        );
        let text = provider.generate("Say hello").await.expect("generate");
        assert_eq!(text, "Bonjour");

        let captured = stub.await.expect("stub");
        assert!(captured.head.starts_with("POST /api/generate"));
        let sent: JsonValue = serde_json::from_str(&captured.body).expect("json body");
        assert_eq!(sent["model"], "llama2");
        assert_eq!(sent["prompt"], "Say hello");
        assert_eq!(sent["stream"], false);
    }
}
