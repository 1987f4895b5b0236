//! Tool definitions, their schemas and handlers.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map as JsonMap, Value as JsonValue};

pub mod schema;
pub mod weather;

pub use schema::{FieldSpec, FieldType, SchemaViolation, ToolSchema};
pub use weather::{WeatherCondition, WeatherData, WeatherTool, Units};

/// The side effect behind a tool.
///
/// Handlers receive parameters that already passed the tool's schema.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn run(&self, params: JsonMap<String, JsonValue>) -> anyhow::Result<JsonValue>;
}

/// A registered tool.
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub schema: ToolSchema,
    /// When set, invocation only records a pending step; the handler runs
    /// after a human approves it.
    pub requires_confirmation: bool,
    pub handler: Arc<dyn ToolHandler>,
}

impl std::fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("requires_confirmation", &self.requires_confirmation)
            .finish_non_exhaustive()
    }
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: ToolSchema,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            requires_confirmation: false,
            handler,
        }
    }

    pub fn gated(mut self) -> Self {
        self.requires_confirmation = true;
        self
    }

    pub fn info(&self) -> ToolInfo {
        ToolInfo {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.schema.clone(),
            requires_confirmation: self.requires_confirmation,
        }
    }
}

/// Serializable view of a tool for discovery.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: ToolSchema,
    pub requires_confirmation: bool,
}
