//! One tool-serving unit: its registries, its step map and an optional model.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;

use crate::engine::{ExecutionEngine, ExecutionResult, ExecutionStep};
use crate::error::{Result, ToolgateError};
use crate::model::ModelConfig;
use crate::provider::{ModelProvider, create_provider};
use crate::registry::Registry;
use crate::tool::{FieldSpec, ToolDefinition, ToolInfo, ToolSchema, WeatherTool};
use crate::tool::weather::WEATHER_RESOURCE_TYPE;

pub mod manager;

pub use manager::ServerManager;

/// Persisted description of a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Model backing `generate_completion`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelConfig>,
}

/// Runtime knobs applied to every server a manager builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    pub step_ttl: Option<Duration>,
    pub weather_latency: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            step_ttl: Some(Duration::from_secs(600)),
            weather_latency: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceTemplate {
    #[serde(rename = "type")]
    pub kind: String,
    pub schema: ToolSchema,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<JsonValue>,
}

pub struct ToolServer {
    config: ServerConfig,
    engine: ExecutionEngine,
    resources: Registry<Resource>,
    templates: Registry<ResourceTemplate>,
    prompts: Registry<Prompt>,
    provider: Option<Arc<dyn ModelProvider>>,
}

impl std::fmt::Debug for ToolServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolServer")
            .field("id", &self.config.id)
            .field("tools", &self.engine.list_tools().len())
            .field("has_provider", &self.provider.is_some())
            .finish_non_exhaustive()
    }
}

impl ToolServer {
    /// Build a server with the stock registrations. Fails only when the
    /// embedded model cannot be turned into a provider.
    pub fn build(config: ServerConfig, settings: &ServerSettings) -> Result<Self> {
        let provider = config.model.as_ref().map(create_provider).transpose()?;
        let server = Self {
            engine: ExecutionEngine::new(settings.step_ttl),
            resources: Registry::new(),
            templates: Registry::new(),
            prompts: Registry::new(),
            provider,
            config,
        };
        server.register_resource_template(ResourceTemplate {
            kind: WEATHER_RESOURCE_TYPE.to_string(),
            schema: ToolSchema::new()
                .field("location", FieldSpec::string())
                .field(
                    "units",
                    FieldSpec::string()
                        .one_of(["metric", "imperial"])
                        .default_value("metric"),
                ),
        });
        server.register_tool(WeatherTool::new(settings.weather_latency).definition());
        tracing::debug!(server_id = %server.config.id, "server built");
        Ok(server)
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn register_tool(&self, tool: ToolDefinition) {
        self.engine.register_tool(tool);
    }

    pub fn register_resource(&self, resource: Resource) {
        self.resources.register(resource.id.clone(), resource);
    }

    pub fn register_resource_template(&self, template: ResourceTemplate) {
        self.templates.register(template.kind.clone(), template);
    }

    pub fn register_prompt(&self, prompt: Prompt) {
        self.prompts.register(prompt.id.clone(), prompt);
    }

    pub fn list_tools(&self) -> Vec<ToolInfo> {
        self.engine.list_tools()
    }

    pub fn list_resources(&self) -> Vec<Resource> {
        self.resources.list()
    }

    pub fn list_resource_templates(&self) -> Vec<ResourceTemplate> {
        self.templates.list()
    }

    pub fn list_prompts(&self) -> Vec<Prompt> {
        self.prompts.list()
    }

    pub async fn invoke(&self, tool: &str, params: JsonValue) -> ExecutionResult {
        tracing::debug!(server_id = %self.config.id, tool = %tool, "invoke");
        self.engine.invoke(tool, params).await
    }

    pub async fn confirm(
        &self,
        step_id: &str,
        allowed: bool,
        params: Option<&JsonValue>,
    ) -> ExecutionResult {
        self.engine.confirm(step_id, allowed, params).await
    }

    pub fn pending_steps(&self) -> Vec<ExecutionStep> {
        self.engine.pending_steps()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionStep> {
        self.engine.subscribe()
    }

    pub fn purge_expired(&self) -> usize {
        self.engine.purge_expired()
    }

    /// Run `prompt` through the server's model.
    pub async fn generate_completion(&self, prompt: &str) -> Result<String> {
        let Some(provider) = &self.provider else {
            return Err(ToolgateError::Validation(format!(
                "server '{}' has no model configured",
                self.config.id
            )));
        };
        provider.generate(prompt).await.map_err(|source| {
            tracing::warn!(server_id = %self.config.id, "completion failed: {}", source);
            ToolgateError::Upstream {
                provider: provider.kind().to_string(),
                source,
            }
        })
    }
}
