//! Build a provider from its declarative [`ModelConfig`].

use std::sync::Arc;

use serde::de::DeserializeOwned;

use super::{DeepSeekProvider, ModelProvider, OllamaProvider, QianwenProvider};
use crate::error::ToolgateError;
use crate::model::{ApiConfig, ModelConfig, OllamaConfig, ProviderKind};

/// Dispatch on the provider tag and construct the matching adapter.
///
/// Unknown tags are `UnsupportedProvider`; a payload missing a required field
/// is `Validation`. No I/O happens here.
pub fn create_provider(model: &ModelConfig) -> Result<Arc<dyn ModelProvider>, ToolgateError> {
    let provider: Arc<dyn ModelProvider> = match model.provider_kind()? {
        ProviderKind::Ollama => Arc::new(OllamaProvider::new(parse_payload::<OllamaConfig>(model)?)),
        ProviderKind::DeepSeek => Arc::new(DeepSeekProvider::new(parse_payload::<ApiConfig>(model)?)),
        ProviderKind::Qianwen => Arc::new(QianwenProvider::new(parse_payload::<ApiConfig>(model)?)),
    };
    tracing::debug!(model_id = %model.id, provider = %provider.kind(), "provider created");
    Ok(provider)
}

/// Check that `model` names a known provider and carries the payload it needs.
pub fn validate_model_config(model: &ModelConfig) -> Result<(), ToolgateError> {
    match model.provider_kind()? {
        ProviderKind::Ollama => parse_payload::<OllamaConfig>(model).map(|_| ()),
        ProviderKind::DeepSeek | ProviderKind::Qianwen => {
            parse_payload::<ApiConfig>(model).map(|_| ())
        }
    }
}

fn parse_payload<T: DeserializeOwned>(model: &ModelConfig) -> Result<T, ToolgateError> {
    serde_json::from_value(model.config.clone()).map_err(|e| {
        ToolgateError::Validation(format!(
            "{} config for model '{}': {}",
            model.provider, model.id, e
        ))
    })
}
