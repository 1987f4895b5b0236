//! One-shot chat against a stored model.

use serde::Serialize;

use crate::error::{Entity, Result, ToolgateError};
use crate::model::ModelManager;
use crate::provider::create_provider;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub text: String,
    pub model_id: String,
}

/// Build a provider for `model_id` and send it `message`.
pub async fn send_message(models: &ModelManager, model_id: &str, message: &str) -> Result<ChatReply> {
    let model = models
        .get_model(model_id)?
        .ok_or_else(|| ToolgateError::not_found(Entity::Model, model_id))?;
    let provider = create_provider(&model)?;
    tracing::debug!(model_id = %model_id, provider = %provider.kind(), "sending chat message");
    let text = provider
        .generate(message)
        .await
        .map_err(|source| ToolgateError::Upstream {
            provider: provider.kind().to_string(),
            source,
        })?;
    Ok(ChatReply {
        text,
        model_id: model_id.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelConfig, ProviderKind};
    use crate::store::{KvStore, MemoryStore};
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn unknown_model_is_not_found() {
        let models = ModelManager::new(Arc::new(MemoryStore::new()));
        let err = send_message(&models, "ghost", "hi").await.unwrap_err();
        assert!(matches!(err, ToolgateError::NotFound { entity: Entity::Model, ref id } if id == "ghost"));
    }

    #[tokio::test]
    async fn hand_edited_provider_tag_is_unsupported() {
        let store = Arc::new(MemoryStore::new());
        let mut cfg = ModelConfig::new("m", "M", ProviderKind::Ollama, json!({}));
        cfg.provider = "bogus".into();
        store.set("models", json!({ "m": cfg })).unwrap();

        let models = ModelManager::new(store);
        let err = send_message(&models, "m", "hi").await.unwrap_err();
        assert!(matches!(err, ToolgateError::UnsupportedProvider(ref p) if p == "bogus"));
    }

    #[tokio::test]
    async fn missing_payload_field_is_validation_error() {
        let store = Arc::new(MemoryStore::new());
        let cfg = ModelConfig::new("m", "M", ProviderKind::DeepSeek, json!({"modelName": "deepseek-coder"}));
        store.set("models", json!({ "m": cfg })).unwrap();

        let models = ModelManager::new(store);
        let err = send_message(&models, "m", "hi").await.unwrap_err();
        assert!(matches!(err, ToolgateError::Validation(_)));
    }
}
