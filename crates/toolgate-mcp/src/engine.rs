//! Tool dispatch and the human-confirmation protocol.
//!
//! Invoking a gated tool records an [`ExecutionStep`] and returns
//! `pending` at once. The step lives in a map keyed by its id until exactly
//! one `confirm` call consumes it, runs (or skips) the side effect with the
//! parameters captured at invocation time, and returns a terminal result.
//! Nothing waits between the two calls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use tokio::sync::broadcast;

use crate::error::{Entity, ToolgateError};
use crate::registry::Registry;
use crate::tool::{ToolDefinition, ToolHandler, ToolInfo};

const EVENT_CAPACITY: usize = 64;

/// One in-flight confirmation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStep {
    pub id: String,
    pub tool: String,
    pub params: JsonValue,
}

/// Outcome of an invocation or a confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ExecutionResult {
    Success { data: JsonValue },
    Error { message: String },
    Pending { step: ExecutionStep },
    Rejected { message: String },
}

impl ExecutionResult {
    pub fn error(message: impl Into<String>) -> Self {
        ExecutionResult::Error {
            message: message.into(),
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            ExecutionResult::Success { .. } => "success",
            ExecutionResult::Error { .. } => "error",
            ExecutionResult::Pending { .. } => "pending",
            ExecutionResult::Rejected { .. } => "rejected",
        }
    }
}

struct PendingEntry {
    step: ExecutionStep,
    /// Parameters as the caller sent them, before defaults were filled in.
    requested: JsonValue,
    params: JsonMap<String, JsonValue>,
    /// Handler as registered when the step was issued; a later re-registration
    /// of the tool does not change what the human approved.
    handler: Arc<dyn ToolHandler>,
    created: Instant,
}

/// Per-server tool registry, step map and step event channel.
pub struct ExecutionEngine {
    tools: Registry<ToolDefinition>,
    steps: Mutex<HashMap<String, PendingEntry>>,
    events: broadcast::Sender<ExecutionStep>,
    step_ttl: Option<Duration>,
}

impl ExecutionEngine {
    /// `step_ttl` of `None` keeps unconfirmed steps forever.
    pub fn new(step_ttl: Option<Duration>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            tools: Registry::new(),
            steps: Mutex::new(HashMap::new()),
            events,
            step_ttl,
        }
    }

    pub fn register_tool(&self, tool: ToolDefinition) {
        let name = tool.name.clone();
        if self.tools.register(name.clone(), tool) {
            tracing::debug!(tool = %name, "tool replaced");
        } else {
            tracing::debug!(tool = %name, "tool registered");
        }
    }

    pub fn list_tools(&self) -> Vec<ToolInfo> {
        self.tools.list().iter().map(ToolDefinition::info).collect()
    }

    /// Receive every step created from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionStep> {
        self.events.subscribe()
    }

    /// Dispatch `name` with `params`. Never fails; every problem is folded
    /// into an `error` result.
    pub async fn invoke(&self, name: &str, params: JsonValue) -> ExecutionResult {
        self.purge_expired();

        let Some(tool) = self.tools.get(name) else {
            let err = ToolgateError::not_found(Entity::Tool, name);
            tracing::warn!(tool = %name, "invoke: {}", err);
            return ExecutionResult::error(err.to_string());
        };
        let requested = params;
        let params = match tool.schema.validate(&requested) {
            Ok(p) => p,
            Err(violation) => {
                tracing::warn!(tool = %name, %violation, "invoke: parameters rejected");
                return ExecutionResult::error(format!(
                    "Invalid parameters for tool '{name}': {violation}"
                ));
            }
        };

        if !tool.requires_confirmation {
            return dispatch(name, tool.handler, params).await;
        }

        let step = ExecutionStep {
            id: uuid::Uuid::new_v4().to_string(),
            tool: name.to_string(),
            params: JsonValue::Object(params.clone()),
        };
        {
            let mut steps = self.steps.lock().unwrap_or_else(|e| e.into_inner());
            steps.insert(
                step.id.clone(),
                PendingEntry {
                    step: step.clone(),
                    requested,
                    params,
                    handler: tool.handler,
                    created: Instant::now(),
                },
            );
        }
        tracing::info!(step_id = %step.id, tool = %name, "execution step awaiting confirmation");
        if self.events.send(step.clone()).is_err() {
            tracing::debug!(step_id = %step.id, "no step subscribers");
        }
        ExecutionResult::Pending { step }
    }

    /// Resolve a pending step. `supplied` parameters, if any, are ignored in
    /// favour of the ones captured when the step was issued.
    pub async fn confirm(
        &self,
        step_id: &str,
        allowed: bool,
        supplied: Option<&JsonValue>,
    ) -> ExecutionResult {
        let entry = {
            let mut steps = self.steps.lock().unwrap_or_else(|e| e.into_inner());
            steps.remove(step_id)
        };
        let Some(entry) = entry else {
            let err = ToolgateError::not_found(Entity::Step, step_id);
            tracing::warn!(step_id = %step_id, "confirm: {}", err);
            return ExecutionResult::error(format!("{err} or already resolved"));
        };
        if self.is_expired(&entry) {
            tracing::warn!(step_id = %step_id, tool = %entry.step.tool, "confirm: step expired");
            return ExecutionResult::error(format!("execution step '{step_id}' expired"));
        }
        if let Some(p) = supplied
            && substitutes(p, &entry)
        {
            tracing::warn!(
                step_id = %step_id,
                "confirm: ignoring parameters that differ from the issued step"
            );
        }

        if !allowed {
            tracing::info!(step_id = %step_id, tool = %entry.step.tool, "execution rejected");
            return ExecutionResult::Rejected {
                message: "User rejected execution".to_string(),
            };
        }
        tracing::info!(step_id = %step_id, tool = %entry.step.tool, "execution approved");
        dispatch(&entry.step.tool, entry.handler, entry.params).await
    }

    /// Outstanding steps, oldest first.
    pub fn pending_steps(&self) -> Vec<ExecutionStep> {
        let steps = self.steps.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries: Vec<&PendingEntry> = steps.values().collect();
        entries.sort_by_key(|e| e.created);
        entries.into_iter().map(|e| e.step.clone()).collect()
    }

    /// Drop steps older than the TTL. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        if self.step_ttl.is_none() {
            return 0;
        }
        let mut steps = self.steps.lock().unwrap_or_else(|e| e.into_inner());
        let before = steps.len();
        steps.retain(|_, e| !self.is_expired(e));
        let dropped = before - steps.len();
        if dropped > 0 {
            tracing::info!(dropped, "expired unconfirmed execution steps");
        }
        dropped
    }

    fn is_expired(&self, entry: &PendingEntry) -> bool {
        self.step_ttl
            .is_some_and(|ttl| entry.created.elapsed() > ttl)
    }
}

/// True when `supplied` names different parameters than the step was issued
/// with. Matching either the caller's original bag or the defaulted one is
/// not a substitution.
fn substitutes(supplied: &JsonValue, entry: &PendingEntry) -> bool {
    !supplied.is_null() && *supplied != entry.requested && *supplied != entry.step.params
}

/// Run a handler on its own task so that an error or a panic becomes an
/// `error` result instead of reaching the caller.
async fn dispatch(
    name: &str,
    handler: Arc<dyn ToolHandler>,
    params: JsonMap<String, JsonValue>,
) -> ExecutionResult {
    let joined = tokio::spawn(async move { handler.run(params).await }).await;
    match joined {
        Ok(Ok(data)) => {
            tracing::debug!(tool = %name, "tool succeeded");
            ExecutionResult::Success { data }
        }
        Ok(Err(e)) => {
            tracing::warn!(tool = %name, "tool failed: {:#}", e);
            ExecutionResult::error(format!("Error executing tool '{name}': {e:#}"))
        }
        Err(join) => {
            tracing::error!(tool = %name, "tool task aborted: {}", join);
            ExecutionResult::error(format!("Error executing tool '{name}': handler panicked"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{FieldSpec, ToolSchema, WeatherTool};
    use async_trait::async_trait;
    use proptest::prelude::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Echoes its parameters and counts how often it actually ran.
    struct Counting {
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ToolHandler for Counting {
        async fn run(&self, params: JsonMap<String, JsonValue>) -> anyhow::Result<JsonValue> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(JsonValue::Object(params))
        }
    }

    struct Failing;

    #[async_trait]
    impl ToolHandler for Failing {
        async fn run(&self, _params: JsonMap<String, JsonValue>) -> anyhow::Result<JsonValue> {
            anyhow::bail!("backend unavailable")
        }
    }

    struct Panicking;

    #[async_trait]
    impl ToolHandler for Panicking {
        async fn run(&self, _params: JsonMap<String, JsonValue>) -> anyhow::Result<JsonValue> {
            panic!("boom")
        }
    }

    fn echo_schema() -> ToolSchema {
        ToolSchema::new().field("location", FieldSpec::string().required())
    }

    fn engine_with_counter(gated: bool) -> (ExecutionEngine, Arc<AtomicUsize>) {
        let engine = ExecutionEngine::new(None);
        let runs = Arc::new(AtomicUsize::new(0));
        let mut def = ToolDefinition::new(
            "echo",
            "echo",
            echo_schema(),
            Arc::new(Counting { runs: runs.clone() }),
        );
        if gated {
            def = def.gated();
        }
        engine.register_tool(def);
        (engine, runs)
    }

    fn step_of(result: ExecutionResult) -> ExecutionStep {
        match result {
            ExecutionResult::Pending { step } => step,
            other => panic!("expected pending, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_error_result() {
        let engine = ExecutionEngine::new(None);
        let r = engine.invoke("nope", json!({})).await;
        assert_eq!(r, ExecutionResult::error("tool 'nope' not found"));
    }

    #[tokio::test]
    async fn ungated_tool_runs_immediately() {
        let (engine, runs) = engine_with_counter(false);
        let r = engine.invoke("echo", json!({"location": "Rome"})).await;
        assert_eq!(r, ExecutionResult::Success { data: json!({"location": "Rome"}) });
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(engine.pending_steps().is_empty());
    }

    #[tokio::test]
    async fn gated_tool_waits_for_approval() {
        let (engine, runs) = engine_with_counter(true);
        let mut rx = engine.subscribe();

        let step = step_of(engine.invoke("echo", json!({"location": "Paris"})).await);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(rx.recv().await.expect("event"), step);
        assert_eq!(engine.pending_steps(), vec![step.clone()]);

        let r = engine.confirm(&step.id, true, None).await;
        assert_eq!(r, ExecutionResult::Success { data: json!({"location": "Paris"}) });
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        let again = engine.confirm(&step.id, true, None).await;
        assert!(matches!(again, ExecutionResult::Error { ref message } if message.contains("not found")));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejection_consumes_the_step() {
        let (engine, runs) = engine_with_counter(true);
        let step = step_of(engine.invoke("echo", json!({"location": "Paris"})).await);

        let r = engine.confirm(&step.id, false, None).await;
        assert!(matches!(r, ExecutionResult::Rejected { .. }));
        let after = engine.confirm(&step.id, true, None).await;
        assert!(matches!(after, ExecutionResult::Error { ref message } if message.contains("not found")));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn confirmation_uses_captured_params() {
        let (engine, _) = engine_with_counter(true);
        let step = step_of(engine.invoke("echo", json!({"location": "Paris"})).await);
        let substituted = json!({"location": "New York"});
        let r = engine.confirm(&step.id, true, Some(&substituted)).await;
        assert_eq!(r, ExecutionResult::Success { data: json!({"location": "Paris"}) });
    }

    #[tokio::test]
    async fn echoed_params_are_not_a_substitution() {
        let engine = ExecutionEngine::new(None);
        let schema = ToolSchema::new()
            .field("location", FieldSpec::string().required())
            .field("units", FieldSpec::string().default_value("metric"));
        engine.register_tool(
            ToolDefinition::new(
                "echo",
                "echo",
                schema,
                Arc::new(Counting { runs: Arc::new(AtomicUsize::new(0)) }),
            )
            .gated(),
        );
        let step = step_of(engine.invoke("echo", json!({"location": "Paris"})).await);
        assert_eq!(step.params, json!({"location": "Paris", "units": "metric"}));

        let steps = engine.steps.lock().unwrap();
        let entry = steps.get(&step.id).expect("entry");
        assert!(!substitutes(&json!({"location": "Paris"}), entry));
        assert!(!substitutes(&json!({"location": "Paris", "units": "metric"}), entry));
        assert!(!substitutes(&JsonValue::Null, entry));
        assert!(substitutes(&json!({"location": "New York"}), entry));
    }

    #[tokio::test]
    async fn concurrent_steps_do_not_cross_talk() {
        let (engine, runs) = engine_with_counter(true);
        let a = step_of(engine.invoke("echo", json!({"location": "A"})).await);
        let b = step_of(engine.invoke("echo", json!({"location": "B"})).await);
        assert_ne!(a.id, b.id);
        assert_eq!(engine.pending_steps().len(), 2);

        let rb = engine.confirm(&b.id, true, None).await;
        assert_eq!(rb, ExecutionResult::Success { data: json!({"location": "B"}) });
        let ra = engine.confirm(&a.id, false, None).await;
        assert!(matches!(ra, ExecutionResult::Rejected { .. }));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(engine.pending_steps().is_empty());
    }

    #[tokio::test]
    async fn invalid_params_never_create_a_step() {
        let (engine, _) = engine_with_counter(true);
        let r = engine.invoke("echo", json!({"city": "Paris"})).await;
        assert!(
            matches!(r, ExecutionResult::Error { ref message } if message.contains("missing required field 'location'"))
        );
        assert!(engine.pending_steps().is_empty());
    }

    #[tokio::test]
    async fn handler_failures_become_error_results() {
        let engine = ExecutionEngine::new(None);
        engine.register_tool(ToolDefinition::new("fail", "", ToolSchema::new(), Arc::new(Failing)));
        engine.register_tool(ToolDefinition::new("panic", "", ToolSchema::new(), Arc::new(Panicking)));

        let r = engine.invoke("fail", JsonValue::Null).await;
        assert!(matches!(r, ExecutionResult::Error { ref message } if message.contains("backend unavailable")));
        let r = engine.invoke("panic", JsonValue::Null).await;
        assert!(matches!(r, ExecutionResult::Error { ref message } if message.contains("panicked")));
    }

    #[tokio::test]
    async fn expired_steps_are_refused_and_purged() {
        let engine = ExecutionEngine::new(Some(Duration::from_millis(1)));
        engine.register_tool(WeatherTool::new(Duration::ZERO).definition());
        let first = step_of(engine.invoke("getWeather", json!({"location": "Paris"})).await);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let r = engine.confirm(&first.id, true, None).await;
        assert!(matches!(r, ExecutionResult::Error { ref message } if message.contains("expired")));

        let _ = step_of(engine.invoke("getWeather", json!({"location": "Paris"})).await);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(engine.purge_expired(), 1);
        assert!(engine.pending_steps().is_empty());
    }

    #[test]
    fn results_serialize_with_status_tag() {
        let pending = ExecutionResult::Pending {
            step: ExecutionStep {
                id: "1".into(),
                tool: "getWeather".into(),
                params: json!({"location": "Paris"}),
            },
        };
        let v = serde_json::to_value(&pending).unwrap();
        assert_eq!(v["status"], "pending");
        assert_eq!(v["step"]["tool"], "getWeather");
        let rejected = serde_json::to_value(ExecutionResult::Rejected {
            message: "no".into(),
        })
        .unwrap();
        assert_eq!(rejected, json!({"status": "rejected", "message": "no"}));
    }

    proptest! {
        #[test]
        fn unregistered_names_always_error(name in "[a-zA-Z_][a-zA-Z0-9_]{0,24}") {
            prop_assume!(name != "getWeather");
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime");
            let engine = ExecutionEngine::new(None);
            engine.register_tool(WeatherTool::new(Duration::ZERO).definition());
            let r = rt.block_on(engine.invoke(&name, json!({"location": "Paris"})));
            prop_assert_eq!(r.status(), "error");
            prop_assert!(engine.pending_steps().is_empty());
        }
    }
}
