//! DeepSeek chat completions (OpenAI-compatible).

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value as JsonValue;

use super::{ChatMessage, ModelProvider, first_choice_content, post_json};
use crate::error::UpstreamError;
use crate::model::{ApiConfig, ProviderKind};

pub struct DeepSeekProvider {
    client: Client,
    config: ApiConfig,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

impl DeepSeekProvider {
    pub fn new(config: ApiConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    pub fn with_client(client: Client, config: ApiConfig) -> Self {
        Self { client, config }
    }
}

/// `{"choices": [{"message": {"content": "..."}}]}`
pub(crate) fn extract_text(body: &JsonValue) -> Result<String, UpstreamError> {
    first_choice_content(body).ok_or_else(|| {
        UpstreamError::Shape("missing 'choices[0].message.content' in deepseek reply".to_string())
    })
}

#[async_trait]
impl ModelProvider for DeepSeekProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::DeepSeek
    }

    async fn generate(&self, prompt: &str) -> Result<String, UpstreamError> {
        tracing::debug!(model = %self.config.model_name, "deepseek generate");
        let request = ChatRequest {
            model: &self.config.model_name,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testutil::{loopback_client, serve_once};
    use serde_json::json;

    fn provider(url: String) -> DeepSeekProvider {
        DeepSeekProvider::with_client(
            loopback_client(),
            ApiConfig {
                api_key: "sk-test".into(),
                model_name: "deepseek-chat".into(),
                api_url: url,
            },
        )
    }

    #[test]
    fn missing_choices_is_shape_error() {
        assert!(matches!(
            extract_text(&json!({"output": {}})),
            Err(UpstreamError::Shape(_))
        ));
    }

    #[tokio::test]
    async fn sends_bearer_and_reads_first_choice() {
        let (base, stub) = serve_once(
            200,
            r#"{"choices":[{"message":{"role":"assistant","content":"42"}}]}"#,
        )
        .await;
        let text = provider(format!("{base}/v1/chat/completions"))
            .generate("meaning of life?")
            .await
            .expect("generate");
        assert_eq!(text, "42");

        let captured = stub.await.expect("stub");
        let head = captured.head.to_ascii_lowercase();
        assert!(head.contains("authorization: bearer sk-test"));
        let sent: JsonValue = serde_json::from_str(&captured.body).expect("json body");
        assert_eq!(sent["messages"][0]["role"], "user");
        assert_eq!(sent["messages"][0]["content"], "meaning of life?");
    }

    #[tokio::test]
    async fn non_success_status_is_reported_with_body() {
        let (base, stub) = serve_once(401, r#"{"error":"bad key"}"#).await;
        let err = provider(base).generate("hi").await.unwrap_err();
        match err {
            UpstreamError::Status { status, body } => {
                assert_eq!(status, 401);
                assert!(body.contains("bad key"));
            }
            other => panic!("unexpected error: {other}"),
        }
        stub.await.expect("stub");
    }
}
