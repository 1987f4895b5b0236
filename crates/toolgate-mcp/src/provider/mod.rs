//! Model providers: one adapter per vendor behind a single `generate` call.
//!
//! Each adapter owns its request body and its response normalization so that
//! nothing above this module ever sees a vendor-specific JSON shape.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::error::UpstreamError;
use crate::model::ProviderKind;

pub mod deepseek;
pub mod factory;
pub mod ollama;
pub mod qianwen;

pub use deepseek::DeepSeekProvider;
pub use factory::create_provider;
pub use ollama::OllamaProvider;
pub use qianwen::QianwenProvider;

/// Text generation backend.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Send one prompt and return the generated text.
    async fn generate(&self, prompt: &str) -> Result<String, UpstreamError>;
}

/// Chat message in the OpenAI-compatible format both API-key vendors accept.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ChatMessage<'a> {
    pub role: &'a str,
    pub content: &'a str,
}

/// POST a JSON body and decode the JSON reply.
///
/// Non-2xx replies are reported with their body so the caller can surface
/// the vendor's own error text.
pub(crate) async fn post_json<B: Serialize + ?Sized>(
    client: &Client,
    url: &str,
    bearer: Option<&str>,
    body: &B,
) -> Result<JsonValue, UpstreamError> {
    let mut req = client.post(url).json(body);
    if let Some(key) = bearer {
        req = req.header("Authorization", format!("Bearer {key}"));
    }
    let response = req.send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(UpstreamError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.json::<JsonValue>().await?)
}

/// Read `choices[0].message.content` from an OpenAI-style completion object.
pub(crate) fn first_choice_content(v: &JsonValue) -> Option<String> {
    v.get("choices")?
        .as_array()?
        .first()?
        .get("message")?
        .get("content")?
        .as_str()
        .map(|s| s.to_string())
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_first_choice() {
        let v = json!({"choices": [{"message": {"role": "assistant", "content": "hi"}}]});
        assert_eq!(first_choice_content(&v).as_deref(), Some("hi"));
        assert!(first_choice_content(&json!({"choices": []})).is_none());
    }
}
