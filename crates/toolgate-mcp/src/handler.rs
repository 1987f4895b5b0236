//! MCP server handler exposing one tool server's registries.
//!
//! Standard requests (`tools/*`, `resources/*`, `prompts/list`) are answered
//! from the active server. Everything a model must not be able to trigger by
//! itself, confirmation in particular, is only reachable through custom
//! requests sent by the host UI.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_mcp_sdk::schema::{
    CallToolResult, ClientRequest, ListPromptsResult, ListResourceTemplatesResult,
    ListResourcesResult, ListToolsResult, RpcError, TextContent, Tool, ToolInputSchema,
    schema_utils::{NotificationFromClient, RequestFromClient, ResultFromServer},
};
use rust_mcp_sdk::{
    McpServer,
    mcp_server::{ServerHandlerCore, enforce_compatible_protocol_version},
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map as JsonMap, Value as JsonValue, json};

use crate::chat;
use crate::engine::ExecutionResult;
use crate::error::{Entity, ToolgateError};
use crate::model::{ModelConfig, ModelManager};
use crate::server::{ServerConfig, ServerManager, ToolServer};

const URI_SCHEME: &str = "toolgate";

/// Routes MCP requests to the model and server managers.
pub struct ToolgateHandler {
    models: Arc<ModelManager>,
    servers: Arc<ServerManager>,
    /// Server answering requests that do not name one.
    active: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmParams {
    step_id: String,
    allowed: bool,
    #[serde(default)]
    server_id: Option<String>,
    #[serde(default)]
    params: Option<JsonValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerScope {
    #[serde(default)]
    server_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatParams {
    model_id: String,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompleteParams {
    prompt: String,
    #[serde(default)]
    server_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SaveModelParams {
    model: ModelConfig,
}

#[derive(Debug, Deserialize)]
struct IdParams {
    id: String,
}

#[derive(Debug, Deserialize)]
struct AddServerParams {
    server: ServerConfig,
}

#[derive(Debug, Deserialize)]
struct UpdateServerParams {
    id: String,
    server: ServerConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FromModelParams {
    model_id: String,
}

fn parse<T: DeserializeOwned>(method: &str, params: JsonValue) -> Result<T, RpcError> {
    let params = if params.is_null() { json!({}) } else { params };
    serde_json::from_value(params).map_err(|e| {
        tracing::warn!("{}: bad params: {}", method, e);
        RpcError::invalid_params().with_message(format!("invalid params for '{method}': {e}"))
    })
}

fn rpc_error(err: ToolgateError) -> RpcError {
    tracing::warn!("request failed: {}", err);
    match err {
        ToolgateError::NotFound { .. }
        | ToolgateError::Validation(_)
        | ToolgateError::UnsupportedProvider(_) => {
            RpcError::invalid_params().with_message(err.to_string())
        }
        ToolgateError::Upstream { .. } | ToolgateError::Storage(_) => {
            RpcError::internal_error().with_message(err.to_string())
        }
    }
}

fn encode<T: serde::Serialize>(value: T) -> Result<JsonValue, RpcError> {
    serde_json::to_value(value)
        .map_err(|e| RpcError::internal_error().with_message(e.to_string()))
}

impl ToolgateHandler {
    pub fn new(models: Arc<ModelManager>, servers: Arc<ServerManager>, active: impl Into<String>) -> Self {
        let active = active.into();
        tracing::debug!(server_id = %active, "initialized ToolgateHandler");
        Self {
            models,
            servers,
            active,
        }
    }

    fn server(&self, id: Option<&str>) -> Result<Arc<ToolServer>, RpcError> {
        let id = id.unwrap_or(&self.active);
        self.servers
            .get_server(id)
            .ok_or_else(|| rpc_error(ToolgateError::not_found(Entity::Server, id)))
    }

    /// MCP tool list of the active server.
    fn tool_definitions(&self) -> Result<Vec<Tool>, RpcError> {
        let server = self.server(None)?;
        Ok(server
            .list_tools()
            .into_iter()
            .map(|info| {
                let props: HashMap<String, JsonMap<String, JsonValue>> =
                    info.parameters.properties().into_iter().collect();
                let description = if info.requires_confirmation {
                    format!("{} (requires user confirmation)", info.description)
                } else {
                    info.description.clone()
                };
                Tool {
                    annotations: None,
                    description: Some(description),
                    input_schema: ToolInputSchema::new(
                        info.parameters.required_fields(),
                        Some(props),
                    ),
                    meta: None,
                    name: info.name,
                    output_schema: None,
                    title: None,
                }
            })
            .collect())
    }

    async fn call_tool(&self, name: &str, args: Option<JsonMap<String, JsonValue>>) -> Result<ExecutionResult, RpcError> {
        let server = self.server(None)?;
        let params = args.map(JsonValue::Object).unwrap_or(JsonValue::Null);
        let result = server.invoke(name, params).await;
        tracing::info!(tool = %name, status = result.status(), "call_tool finished");
        Ok(result)
    }

    fn resources_json(&self) -> Result<JsonValue, RpcError> {
        let server = self.server(None)?;
        let resources: Vec<JsonValue> = server
            .list_resources()
            .into_iter()
            .map(|r| {
                json!({
                    "uri": format!("{URI_SCHEME}://{}/{}", r.kind, r.id),
                    "name": r.id,
                    "mimeType": "application/json",
                    "_meta": { "type": r.kind, "data": r.data },
                })
            })
            .collect();
        Ok(json!({ "resources": resources }))
    }

    fn resource_templates_json(&self) -> Result<JsonValue, RpcError> {
        let server = self.server(None)?;
        let templates: Vec<JsonValue> = server
            .list_resource_templates()
            .into_iter()
            .map(|t| {
                json!({
                    "uriTemplate": format!("{URI_SCHEME}://{}/{{id}}", t.kind),
                    "name": t.kind,
                    "mimeType": "application/json",
                    "_meta": { "schema": t.schema.to_json_schema() },
                })
            })
            .collect();
        Ok(json!({ "resourceTemplates": templates }))
    }

    fn prompts_json(&self) -> Result<JsonValue, RpcError> {
        let server = self.server(None)?;
        let prompts: Vec<JsonValue> = server
            .list_prompts()
            .into_iter()
            .map(|p| {
                let arguments: Vec<JsonValue> = p
                    .parameters
                    .as_ref()
                    .and_then(JsonValue::as_object)
                    .map(|o| o.keys().map(|k| json!({ "name": k })).collect())
                    .unwrap_or_default();
                json!({
                    "name": p.id,
                    "description": p.content,
                    "arguments": arguments,
                })
            })
            .collect();
        Ok(json!({ "prompts": prompts }))
    }

    /// Answer a host request. `params` is the request's `params` member.
    pub async fn handle_custom(&self, method: &str, params: JsonValue) -> Result<JsonValue, RpcError> {
        tracing::debug!("custom request: {}", method);
        match method {
            "execution/confirm" => {
                let p: ConfirmParams = parse(method, params)?;
                let server = self.server(p.server_id.as_deref())?;
                let result = server.confirm(&p.step_id, p.allowed, p.params.as_ref()).await;
                tracing::info!(
                    server_id = %server.id(),
                    step_id = %p.step_id,
                    allowed = p.allowed,
                    status = result.status(),
                    "confirmation handled"
                );
                encode(result)
            }
            "execution/pending" => {
                let p: ServerScope = parse(method, params)?;
                let server = self.server(p.server_id.as_deref())?;
                Ok(json!({ "steps": server.pending_steps() }))
            }
            "chat/send" => {
                let p: ChatParams = parse(method, params)?;
                let reply = chat::send_message(&self.models, &p.model_id, &p.message)
                    .await
                    .map_err(rpc_error)?;
                encode(reply)
            }
            "chat/complete" => {
                let p: CompleteParams = parse(method, params)?;
                let server = self.server(p.server_id.as_deref())?;
                let text = server.generate_completion(&p.prompt).await.map_err(rpc_error)?;
                Ok(json!({ "text": text, "serverId": server.id() }))
            }
            "models/list" => {
                let models = self.models.models().map_err(rpc_error)?;
                Ok(json!({ "models": models }))
            }
            "models/save" => {
                let p: SaveModelParams = parse(method, params)?;
                let saved = self.models.save_model(p.model).map_err(rpc_error)?;
                encode(saved)
            }
            "models/remove" => {
                let p: IdParams = parse(method, params)?;
                let removed = self.models.remove_model(&p.id).map_err(rpc_error)?;
                Ok(json!({ "removed": removed }))
            }
            "servers/list" => {
                let configs = self.servers.server_configs().map_err(rpc_error)?;
                let servers: Vec<JsonValue> = configs
                    .into_values()
                    .map(|c| {
                        let live = self.servers.get_server(&c.id).is_some();
                        let active = c.id == self.active;
                        json!({ "config": c, "live": live, "active": active })
                    })
                    .collect();
                Ok(json!({ "servers": servers }))
            }
            "servers/add" => {
                let p: AddServerParams = parse(method, params)?;
                let server = self.servers.create_server(p.server).map_err(rpc_error)?;
                encode(server.config())
            }
            "servers/update" => {
                let p: UpdateServerParams = parse(method, params)?;
                let server = self.servers.update_server(&p.id, p.server).map_err(rpc_error)?;
                encode(server.config())
            }
            "servers/remove" => {
                let p: IdParams = parse(method, params)?;
                let removed = self.servers.remove_server(&p.id).map_err(rpc_error)?;
                Ok(json!({ "removed": removed }))
            }
            "servers/from-model" => {
                let p: FromModelParams = parse(method, params)?;
                let model = self
                    .models
                    .get_model(&p.model_id)
                    .map_err(rpc_error)?
                    .ok_or_else(|| rpc_error(ToolgateError::not_found(Entity::Model, &p.model_id)))?;
                let server = self
                    .servers
                    .create_server_from_model_config(model)
                    .map_err(rpc_error)?;
                encode(server.config())
            }
            _ => {
                tracing::warn!("custom method not implemented: {}", method);
                Err(RpcError::method_not_found()
                    .with_message(format!("No handler is implemented for '{method}'.")))
            }
        }
    }
}

fn listing<T: DeserializeOwned>(value: JsonValue) -> Result<T, RpcError> {
    serde_json::from_value(value).map_err(|e| RpcError::internal_error().with_message(e.to_string()))
}

#[async_trait]
impl ServerHandlerCore for ToolgateHandler {
    async fn handle_request(
        &self,
        request: RequestFromClient,
        runtime: &dyn McpServer,
    ) -> std::result::Result<ResultFromServer, RpcError> {
        let method_name = request.method().to_owned();
        tracing::info!("handle_request: method={}", method_name);
        match request {
            RequestFromClient::ClientRequest(client_request) => match client_request {
                ClientRequest::InitializeRequest(initialize_request) => {
                    tracing::debug!(
                        "initialize_request: client_protocol={}",
                        initialize_request.params.protocol_version
                    );
                    let mut server_info = runtime.server_info().to_owned();
                    if let Some(updated_protocol_version) = enforce_compatible_protocol_version(
                        &initialize_request.params.protocol_version,
                        &server_info.protocol_version,
                    )
                    .map_err(|err| {
                        tracing::error!(
                            "incompatible protocol version (client={}, server={})",
                            initialize_request.params.protocol_version,
                            server_info.protocol_version
                        );
                        RpcError::internal_error().with_message(err.to_string())
                    })? {
                        server_info.protocol_version = updated_protocol_version;
                    }
                    tracing::info!("initialized (protocol={})", server_info.protocol_version);
                    Ok(server_info.into())
                }

                ClientRequest::ListToolsRequest(_) => {
                    let tools = self.tool_definitions()?;
                    tracing::info!("list_tools (count={})", tools.len());
                    Ok(ListToolsResult {
                        meta: None,
                        next_cursor: None,
                        tools,
                    }
                    .into())
                }

                ClientRequest::CallToolRequest(request) => {
                    let tool = request.tool_name().to_string();
                    let result = self.call_tool(&tool, request.params.arguments.clone()).await?;
                    let payload = encode(&result)?;
                    Ok(CallToolResult::text_content(vec![TextContent::from(payload.to_string())]).into())
                }

                ClientRequest::ListResourcesRequest(_) => {
                    let result: ListResourcesResult = listing(self.resources_json()?)?;
                    Ok(result.into())
                }

                ClientRequest::ListResourceTemplatesRequest(_) => {
                    let result: ListResourceTemplatesResult = listing(self.resource_templates_json()?)?;
                    Ok(result.into())
                }

                ClientRequest::ListPromptsRequest(_) => {
                    let result: ListPromptsResult = listing(self.prompts_json()?)?;
                    Ok(result.into())
                }

                _ => {
                    tracing::warn!("method not implemented: {}", method_name);
                    Err(RpcError::method_not_found()
                        .with_message(format!("No handler is implemented for '{method_name}'.")))
                }
            },
            RequestFromClient::CustomRequest(value) => {
                let params = value.get("params").cloned().unwrap_or(JsonValue::Null);
                let result = self.handle_custom(&method_name, params).await?;
                Ok(ResultFromServer::CustomResult(result))
            }
        }
    }

    async fn handle_notification(
        &self,
        notification: NotificationFromClient,
        _: &dyn McpServer,
    ) -> std::result::Result<(), RpcError> {
        match &notification {
            NotificationFromClient::ClientNotification(_) => {
                tracing::debug!("handle_notification: client notification")
            }
            NotificationFromClient::CustomNotification(_) => {
                tracing::debug!("handle_notification: custom notification")
            }
        }
        Ok(())
    }

    async fn handle_error(
        &self,
        error: &RpcError,
        _: &dyn McpServer,
    ) -> std::result::Result<(), RpcError> {
        tracing::error!(
            "handle_error from client (code={:?}, message={:?})",
            error.code,
            error.message
        );
        Ok(())
    }
}
