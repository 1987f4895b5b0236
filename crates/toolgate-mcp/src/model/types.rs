use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::ToolgateError;

/// Closed set of model vendors the factory knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Ollama,
    DeepSeek,
    Qianwen,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Ollama => "ollama",
            ProviderKind::DeepSeek => "deepseek",
            ProviderKind::Qianwen => "qianwen",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ToolgateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(ProviderKind::Ollama),
            "deepseek" => Ok(ProviderKind::DeepSeek),
            "qianwen" => Ok(ProviderKind::Qianwen),
            _ => Err(ToolgateError::UnsupportedProvider(s.to_string())),
        }
    }
}

/// Declarative model configuration as persisted under the `models` key.
///
/// `provider` stays a free-form tag so that a stale or hand-edited entry
/// still loads; it is checked when a provider is built from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub id: String,
    pub name: String,
    pub provider: String,
    #[serde(default)]
    pub config: JsonValue,
}

impl ModelConfig {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        provider: ProviderKind,
        config: JsonValue,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            provider: provider.as_str().to_string(),
            config,
        }
    }

    pub fn provider_kind(&self) -> Result<ProviderKind, ToolgateError> {
        self.provider.parse()
    }

    /// Merge a partial update; fields left `None` keep their current value.
    pub fn apply(&mut self, patch: ModelPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(provider) = patch.provider {
            self.provider = provider;
        }
        if let Some(config) = patch.config {
            self.config = config;
        }
    }
}

/// Partial update for a [`ModelConfig`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub config: Option<JsonValue>,
}

/// Payload shape for the `ollama` provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OllamaConfig {
    pub base_url: String,
    pub model_name: String,
}

/// Payload shape for API-key based providers (`deepseek`, `qianwen`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    pub api_key: String,
    pub model_name: String,
    pub api_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn provider_tag_parses_case_insensitively() {
        assert_eq!("DeepSeek".parse::<ProviderKind>().unwrap(), ProviderKind::DeepSeek);
        assert_eq!(" ollama ".parse::<ProviderKind>().unwrap(), ProviderKind::Ollama);
        let err = "bogus".parse::<ProviderKind>().unwrap_err();
        assert!(matches!(err, ToolgateError::UnsupportedProvider(ref t) if t == "bogus"));
    }

    #[test]
    fn patch_preserves_unspecified_fields() {
        let mut m = ModelConfig::new(
            "m1",
            "Model",
            ProviderKind::Ollama,
            json!({"baseUrl": "http://localhost:11434", "modelName": "llama2"}),
        );
        m.apply(ModelPatch {
            name: Some("Renamed".into()),
            ..Default::default()
        });
        assert_eq!(m.name, "Renamed");
        assert_eq!(m.provider, "ollama");
        assert_eq!(m.config["modelName"], "llama2");
    }
}
