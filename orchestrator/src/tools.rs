//! Orchestrator tool surface.

use std::sync::Arc;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use servis_rpc::{input_schema_for, ErrorCode, RpcError, Tool, ToolError, ToolServer};

use crate::intent::{schema_for, IntentKind};
use crate::pipeline::processor::CommandProcessor;
use crate::pipeline::{Command, CommandPriority, PipelineError};

impl From<PipelineError> for ToolError {
    fn from(err: PipelineError) -> Self {
        let code = match err {
            PipelineError::QueueFull => ErrorCode::QueueFull,
            PipelineError::Stopped => ErrorCode::ServiceUnavailable,
        };
        ToolError::new(code, err.to_string())
    }
}

fn rpc_to_tool(err: RpcError) -> ToolError {
    ToolError::new(err.code(), err.to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProcessCommandParams {
    pub text: String,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub auth_token: Option<String>,
    /// voice, text, web or mobile.
    pub interface_type: Option<String>,
    pub context: Option<Map<String, Value>>,
    pub priority: Option<CommandPriority>,
    pub timeout_seconds: Option<u64>,
    /// Caller-chosen id; repeated ids within the cache TTL return the
    /// cached result.
    pub command_id: Option<String>,
}

impl ProcessCommandParams {
    fn into_command(self, default_timeout: Duration) -> Command {
        let mut command = Command::new(self.text);
        if let Some(id) = self.command_id {
            command = command.with_id(id);
        }
        if let Some(priority) = self.priority {
            command = command.with_priority(priority);
        }
        command.timeout = self
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(default_timeout);
        command.session_id = self.session_id;
        command.user_id = self.user_id;
        command.auth_token = self.auth_token;
        command.interface_type = self.interface_type;
        command.context = self.context.unwrap_or_default();
        command
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CreateSessionParams {
    pub user_id: String,
    pub interface_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AnalyzeIntentParams {
    pub text: String,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RouteCommandParams {
    pub intent: String,
    pub parameters: Map<String, Value>,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CommandIdParams {
    pub command_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TrainingExample {
    pub text: String,
    pub intent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TrainClassifierParams {
    pub examples: Vec<TrainingExample>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct NoParams {}

fn parse<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, ToolError> {
    serde_json::from_value(params).map_err(|err| ToolError::invalid_params(err.to_string()))
}

/// Register the orchestrator tools onto a server.
pub fn register_tools(
    server: &mut ToolServer,
    processor: Arc<CommandProcessor>,
) -> Result<(), ToolError> {
    let proc = processor.clone();
    server.register(Tool::new(
        "process_command",
        "Process a natural-language command end to end",
        input_schema_for::<ProcessCommandParams>(),
        move |params| {
            let processor = proc.clone();
            async move {
                let p: ProcessCommandParams = parse(params)?;
                let command = p.into_command(processor.default_timeout());
                let result = processor.process_command(command).await;
                serde_json::to_value(result).map_err(|err| ToolError::handler(err.to_string()))
            }
        },
    ))?;

    let proc = processor.clone();
    server.register(Tool::new(
        "submit_command",
        "Queue a command; poll its status by id",
        input_schema_for::<ProcessCommandParams>(),
        move |params| {
            let processor = proc.clone();
            async move {
                let p: ProcessCommandParams = parse(params)?;
                let command = p.into_command(processor.default_timeout());
                let id = processor.submit(command)?;
                Ok(json!({"command_id": id, "status": "queued"}))
            }
        },
    ))?;

    let proc = processor.clone();
    server.register(Tool::new(
        "create_session",
        "Create a user session for context-aware commands",
        input_schema_for::<CreateSessionParams>(),
        move |params| {
            let processor = proc.clone();
            async move {
                let p: CreateSessionParams = parse(params)?;
                let session_id = processor
                    .sessions()
                    .create_session(&p.user_id, &p.interface_type);
                Ok(json!({
                    "session_id": session_id,
                    "user_id": p.user_id,
                    "interface_type": p.interface_type,
                }))
            }
        },
    ))?;

    let proc = processor.clone();
    server.register(Tool::new(
        "analyze_intent",
        "Classify text and extract parameters without executing",
        input_schema_for::<AnalyzeIntentParams>(),
        move |params| {
            let processor = proc.clone();
            async move {
                let p: AnalyzeIntentParams = parse(params)?;
                let output = processor.classifier().classify(&p.text);
                let alternatives: Vec<Value> = output
                    .alternatives
                    .iter()
                    .map(|(intent, score)| json!([intent.as_str(), score]))
                    .collect();
                Ok(json!({
                    "intent": output.intent,
                    "confidence": output.confidence,
                    "parameters": output.parameters,
                    "alternatives": alternatives,
                    "original_text": p.text,
                }))
            }
        },
    ))?;

    let proc = processor.clone();
    server.register(Tool::new(
        "route_command",
        "Dispatch an already-classified intent to its service",
        input_schema_for::<RouteCommandParams>(),
        move |params| {
            let processor = proc.clone();
            async move {
                let p: RouteCommandParams = parse(params)?;
                let intent = IntentKind::parse(&p.intent)
                    .ok_or_else(|| ToolError::invalid_params(format!("unknown intent '{}'", p.intent)))?;
                let schema = schema_for(intent).ok_or_else(|| {
                    ToolError::not_found(format!("intent {intent} maps to no service"))
                })?;
                let (mut validated, errors) = schema.validate(&p.parameters);
                if !errors.is_empty() {
                    return Err(ToolError::new(
                        ErrorCode::ValidationError,
                        errors.join("; "),
                    ));
                }
                if let Some(session_id) = &p.session_id {
                    validated.insert("session_id".into(), json!(session_id));
                }
                if let Some(user_id) = &p.user_id {
                    validated.insert("user_id".into(), json!(user_id));
                }
                let timeout = p
                    .timeout_seconds
                    .map(Duration::from_secs)
                    .unwrap_or(processor.default_timeout());
                let reply = processor
                    .router()
                    .dispatch(schema.service, schema.tool, Value::Object(validated), timeout)
                    .await
                    .map_err(rpc_to_tool)?;
                Ok(json!({
                    "intent": intent,
                    "service": schema.service,
                    "tool": schema.tool,
                    "result": reply,
                }))
            }
        },
    ))?;

    let proc = processor.clone();
    server.register(Tool::new(
        "get_command_status",
        "Queued position, processing snapshot or terminal state of a command",
        input_schema_for::<CommandIdParams>(),
        move |params| {
            let processor = proc.clone();
            async move {
                let p: CommandIdParams = parse(params)?;
                processor
                    .command_status(&p.command_id)
                    .ok_or_else(|| ToolError::not_found(format!("command {} not known", p.command_id)))
            }
        },
    ))?;

    let proc = processor.clone();
    server.register(Tool::new(
        "cancel_command",
        "Cancel a queued or processing command",
        input_schema_for::<CommandIdParams>(),
        move |params| {
            let processor = proc.clone();
            async move {
                let p: CommandIdParams = parse(params)?;
                let cancelled = processor.cancel_command(&p.command_id);
                Ok(json!({"command_id": p.command_id, "cancelled": cancelled}))
            }
        },
    ))?;

    let proc = processor.clone();
    server.register(Tool::new(
        "get_processing_stats",
        "Pipeline metrics, queue depth, cache and session counts",
        input_schema_for::<NoParams>(),
        move |_params| {
            let processor = proc.clone();
            async move { Ok(processor.stats()) }
        },
    ))?;

    let proc = processor;
    server.register(Tool::new(
        "train_classifier",
        "Feed (utterance, intent) pairs to the trained signal",
        input_schema_for::<TrainClassifierParams>(),
        move |params| {
            let processor = proc.clone();
            async move {
                let p: TrainClassifierParams = parse(params)?;
                let pairs: Vec<(String, String)> = p
                    .examples
                    .into_iter()
                    .map(|example| (example.text, example.intent))
                    .collect();
                let count = processor
                    .classifier()
                    .train(&pairs)
                    .map_err(|err| ToolError::invalid_params(err.to_string()))?;
                Ok(json!({"trained_examples": count}))
            }
        },
    ))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::classifier::IntentClassifier;
    use crate::pipeline::PipelineConfig;
    use crate::router::ServiceRouter;
    use crate::session::SessionManager;
    use servis_registry::ServiceRegistry;

    #[test]
    fn all_orchestrator_tools_register() {
        let registry = Arc::new(ServiceRegistry::default());
        let processor = Arc::new(CommandProcessor::new(
            PipelineConfig::default(),
            Arc::new(IntentClassifier::new(None)),
            Arc::new(ServiceRouter::new(registry)),
            Arc::new(SessionManager::new(Duration::from_secs(60))),
            None,
        ));
        let mut server = ToolServer::new("ai-servis-core", "0.3.0");
        register_tools(&mut server, processor).unwrap();
        let names = server.tool_names();
        for expected in [
            "process_command",
            "submit_command",
            "create_session",
            "analyze_intent",
            "route_command",
            "get_command_status",
            "cancel_command",
            "get_processing_stats",
            "train_classifier",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
    }
}
