//! The command processor: workers, timeouts, cancellation, caching and
//! dispatch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use servis_rpc::{ErrorCode, RpcError};

use super::cache::ResultCache;
use super::metrics::CommandMetrics;
use super::queue::CommandQueue;
use super::{
    Command, CommandResult, CommandStatus, PipelineConfig, PipelineError, ProcessingSnapshot,
};
use crate::auth::AuthVerifier;
use crate::intent::classifier::IntentClassifier;
use crate::intent::{schema_for, IntentKind};
use crate::router::ServiceRouter;
use crate::session::SessionManager;

/// Reply for a follow-up with no session context, verbatim.
pub const FOLLOW_UP_NO_CONTEXT: &str =
    "I don't have context for a follow-up. Please be more specific.";

struct ProcessingEntry {
    intent: IntentKind,
    confidence: f64,
    started_at: DateTime<Utc>,
    deadline: Instant,
    token: CancellationToken,
    timed_out: Arc<AtomicBool>,
}

pub struct CommandProcessor {
    config: PipelineConfig,
    classifier: Arc<IntentClassifier>,
    router: Arc<ServiceRouter>,
    sessions: Arc<SessionManager>,
    auth: Option<Arc<dyn AuthVerifier>>,
    queue: CommandQueue,
    cache: ResultCache,
    metrics: CommandMetrics,
    processing: Mutex<HashMap<String, ProcessingEntry>>,
    cancel: CancellationToken,
}

impl CommandProcessor {
    pub fn new(
        config: PipelineConfig,
        classifier: Arc<IntentClassifier>,
        router: Arc<ServiceRouter>,
        sessions: Arc<SessionManager>,
        auth: Option<Arc<dyn AuthVerifier>>,
    ) -> Self {
        let queue = CommandQueue::new(config.max_queue_size);
        let cache = ResultCache::new(config.cache_capacity, config.cache_ttl);
        Self {
            config,
            classifier,
            router,
            sessions,
            auth,
            queue,
            cache,
            metrics: CommandMetrics::new(),
            processing: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn classifier(&self) -> &Arc<IntentClassifier> {
        &self.classifier
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn router(&self) -> &Arc<ServiceRouter> {
        &self.router
    }

    pub fn default_timeout(&self) -> Duration {
        self.config.default_timeout
    }

    /// Queue a command for the worker pool.
    pub fn submit(&self, command: Command) -> Result<String, PipelineError> {
        let id = command.id.clone();
        self.queue.push(command)?;
        debug!(command = %id, "command queued");
        Ok(id)
    }

    /// Start workers, the timeout monitor and the maintenance sweep.
    pub fn start(self: &Arc<Self>) {
        for worker_id in 0..self.config.worker_count {
            let processor = Arc::clone(self);
            tokio::spawn(async move {
                debug!(worker_id, "pipeline worker started");
                loop {
                    if processor.cancel.is_cancelled() {
                        break;
                    }
                    match processor.queue.pop() {
                        Some(command) => {
                            processor.process_command(command).await;
                        }
                        None => tokio::time::sleep(Duration::from_millis(100)).await,
                    }
                }
                debug!(worker_id, "pipeline worker stopped");
            });
        }

        let processor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = processor.cancel.cancelled() => break,
                    _ = ticker.tick() => processor.expire_overdue(),
                }
            }
        });

        let processor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(processor.config.maintenance_interval);
            ticker.tick().await; // immediate first tick is a no-op
            loop {
                tokio::select! {
                    _ = processor.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        processor.cache.clear();
                        if processor
                            .metrics
                            .reset_if_large(processor.config.metrics_reset_threshold)
                        {
                            info!("pipeline metrics reset after growth");
                        }
                        info!("result cache cleared by maintenance sweep");
                    }
                }
            }
        });
        info!(workers = self.config.worker_count, "command pipeline started");
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Mark overdue commands; their dispatch observes the cancellation at
    /// the next suspension point.
    fn expire_overdue(&self) {
        let now = Instant::now();
        let processing = self.processing.lock().expect("processing lock");
        for (id, entry) in processing.iter() {
            if now > entry.deadline && !entry.token.is_cancelled() {
                warn!(command = %id, "command timed out");
                entry.timed_out.store(true, Ordering::SeqCst);
                entry.token.cancel();
            }
        }
    }

    /// Cancel a queued or in-flight command. No-op (false) when it already
    /// reached a terminal state.
    pub fn cancel_command(&self, command_id: &str) -> bool {
        if self.queue.remove(command_id) {
            let mut result = CommandResult::failure(command_id, "Command cancelled", "cancelled");
            result.timestamp = Utc::now();
            self.metrics
                .record(IntentKind::Unknown, CommandStatus::Cancelled, false, 0.0);
            self.cache.put(result);
            info!(command = %command_id, "queued command cancelled");
            return true;
        }
        let processing = self.processing.lock().expect("processing lock");
        if let Some(entry) = processing.get(command_id) {
            if !entry.token.is_cancelled() {
                entry.token.cancel();
                info!(command = %command_id, "processing command cancelled");
                return true;
            }
        }
        false
    }

    /// Queued position, processing snapshot, or cached terminal state.
    pub fn command_status(&self, command_id: &str) -> Option<Value> {
        if let Some(position) = self.queue.position(command_id) {
            return Some(json!({
                "id": command_id,
                "status": "queued",
                "queue_position": position,
            }));
        }
        {
            let processing = self.processing.lock().expect("processing lock");
            if let Some(entry) = processing.get(command_id) {
                let snapshot = ProcessingSnapshot {
                    command_id: command_id.to_string(),
                    intent: entry.intent,
                    confidence: entry.confidence,
                    started_at: entry.started_at,
                };
                let mut value = serde_json::to_value(snapshot).unwrap_or(Value::Null);
                if let Some(map) = value.as_object_mut() {
                    map.insert("status".into(), json!("processing"));
                }
                return Some(value);
            }
        }
        self.cache.get(command_id).map(|result| {
            json!({
                "id": command_id,
                "status": if result.success { "completed" } else { "failed" },
                "success": result.success,
                "completed_at": result.timestamp,
            })
        })
    }

    pub fn stats(&self) -> Value {
        json!({
            "metrics": self.metrics.snapshot(),
            "queue_depth": self.queue.len(),
            "active_commands": self.processing.lock().expect("processing lock").len(),
            "worker_count": self.config.worker_count,
            "cache": self.cache.stats(),
            "sessions": self.sessions.len(),
        })
    }

    /// Run one command through the whole pipeline and produce its single
    /// terminal result.
    pub async fn process_command(&self, command: Command) -> CommandResult {
        let started = Instant::now();

        // Boundary validation never reaches a handler.
        let text = command.text.trim().to_string();
        if text.is_empty() {
            return self.finalize(
                &command,
                IntentKind::Unknown,
                CommandStatus::Failed,
                CommandResult::failure(&command.id, "Invalid command: empty text", "validation_error"),
                started,
            );
        }
        if command.text.len() > self.config.max_command_length {
            return self.finalize(
                &command,
                IntentKind::Unknown,
                CommandStatus::Failed,
                CommandResult::failure(
                    &command.id,
                    "Invalid command: text too long",
                    "validation_error",
                ),
                started,
            );
        }

        // Result cache, keyed by command id.
        if let Some(hit) = self.cache.get(&command.id) {
            debug!(command = %command.id, "returning cached result");
            return hit;
        }

        // Authentication boundary.
        let mut user_info: Option<Value> = None;
        if let Some(token) = &command.auth_token {
            match &self.auth {
                Some(auth) => match auth.verify_token(token).await {
                    Some(info) => user_info = Some(info),
                    None => {
                        return self.finalize(
                            &command,
                            IntentKind::Unknown,
                            CommandStatus::Failed,
                            CommandResult::failure(
                                &command.id,
                                "Authentication failed",
                                ErrorCode::Unauthorized.as_str(),
                            ),
                            started,
                        );
                    }
                },
                None => {
                    return self.finalize(
                        &command,
                        IntentKind::Unknown,
                        CommandStatus::Failed,
                        CommandResult::failure(
                            &command.id,
                            "No authentication service is configured",
                            ErrorCode::Unauthorized.as_str(),
                        ),
                        started,
                    );
                }
            }
        }

        // Sessions: reuse a live one or create (anonymous when no user).
        let user_id = command
            .user_id
            .clone()
            .or_else(|| {
                user_info
                    .as_ref()
                    .and_then(|info| info.get("username"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "anonymous".to_string());
        let interface = command.interface_type.clone().unwrap_or_else(|| "text".to_string());
        let session_id = match &command.session_id {
            Some(id) if self.sessions.touch(id).is_some() => id.clone(),
            _ => self.sessions.create_session(&user_id, &interface),
        };

        // Classification and parameter extraction.
        let mut output = self.classifier.classify(&text);

        // Follow-up resolution from session context.
        if output.intent == IntentKind::FollowUp {
            let context = self
                .sessions
                .get(&session_id)
                .and_then(|s| s.last_intent.map(|intent| (intent, s.last_parameters)));
            match context {
                Some((intent, mut merged)) => {
                    for (key, value) in output.parameters.clone() {
                        merged.insert(key, value);
                    }
                    output.intent = intent;
                    output.parameters = merged;
                    output.confidence = 0.8;
                    debug!(command = %command.id, %intent, "follow-up resolved from session");
                }
                None => {
                    let mut result = CommandResult::success(&command.id, FOLLOW_UP_NO_CONTEXT);
                    result.data = json!({"session_id": session_id});
                    self.sessions.add_history(&session_id, &text, FOLLOW_UP_NO_CONTEXT);
                    return self.finalize(
                        &command,
                        IntentKind::FollowUp,
                        CommandStatus::Completed,
                        result,
                        started,
                    );
                }
            }
        }

        // Unknown or unroutable intent: tell the user what exists instead.
        let Some(schema) = schema_for(output.intent) else {
            let services = self.router.available_services();
            let mut result = CommandResult::failure(
                &command.id,
                format!(
                    "No service available for intent: {}. Available services: {}",
                    output.intent,
                    services.join(", ")
                ),
                "unknown_intent",
            );
            result.suggestions = services;
            result.data = json!({"session_id": session_id});
            self.sessions.add_history(&session_id, &text, &result.response);
            return self.finalize(
                &command,
                output.intent,
                CommandStatus::Failed,
                result,
                started,
            );
        };

        // Low confidence: surface the alternatives, do not dispatch.
        if output.confidence < self.config.confidence_floor {
            let alternatives: Vec<String> = output
                .alternatives
                .iter()
                .take(2)
                .map(|(intent, _)| intent.to_string())
                .collect();
            let response = format!(
                "I'm not sure what you meant. Did you mean: {}? (confidence: {:.2})",
                alternatives.join(", "),
                output.confidence
            );
            let mut result = CommandResult::failure(
                &command.id,
                response,
                ErrorCode::LowConfidence.as_str(),
            );
            result.suggestions = alternatives;
            result.data = json!({"session_id": session_id});
            self.sessions.add_history(&session_id, &text, &result.response);
            return self.finalize(
                &command,
                output.intent,
                CommandStatus::Failed,
                result,
                started,
            );
        }

        // Typed parameter validation against the intent schema.
        let (validated, errors) = schema.validate(&output.parameters);
        if !errors.is_empty() {
            let mut result = CommandResult::failure(
                &command.id,
                format!("Invalid parameters: {}", errors.join("; ")),
                "validation_error",
            );
            result.data = json!({"errors": errors, "session_id": session_id});
            self.sessions.add_history(&session_id, &text, &result.response);
            return self.finalize(
                &command,
                output.intent,
                CommandStatus::Failed,
                result,
                started,
            );
        }

        // Permission gate for sensitive intents.
        if matches!(
            output.intent,
            IntentKind::SystemControl | IntentKind::HardwareControl
        ) {
            if let (Some(token), Some(auth)) = (&command.auth_token, &self.auth) {
                let prefix = output.intent.as_str().split('_').next().unwrap_or_default();
                let permission = format!("service:{prefix}");
                if !auth.check_permission(token, &permission).await {
                    let result = CommandResult::failure(
                        &command.id,
                        format!("Permission denied for {}", output.intent),
                        ErrorCode::Unauthorized.as_str(),
                    );
                    self.sessions.add_history(&session_id, &text, &result.response);
                    return self.finalize(
                        &command,
                        output.intent,
                        CommandStatus::Failed,
                        result,
                        started,
                    );
                }
            }
        }

        // Register as processing; the timeout monitor now watches it.
        let token = CancellationToken::new();
        let timed_out = Arc::new(AtomicBool::new(false));
        {
            let mut processing = self.processing.lock().expect("processing lock");
            processing.insert(
                command.id.clone(),
                ProcessingEntry {
                    intent: output.intent,
                    confidence: output.confidence,
                    started_at: Utc::now(),
                    deadline: Instant::now() + command.timeout,
                    token: token.clone(),
                    timed_out: timed_out.clone(),
                },
            );
        }

        // Dispatch parameters carry the session identity.
        let mut params = validated.clone();
        params.insert("session_id".into(), json!(session_id));
        params.insert("user_id".into(), json!(user_id));
        if let Some(info) = &user_info {
            params.insert("user_info".into(), json!(info.to_string()));
        }

        let dispatch =
            self.router
                .dispatch(schema.service, schema.tool, Value::Object(params), command.timeout);
        let outcome = tokio::select! {
            _ = token.cancelled() => None,
            result = dispatch => Some(result),
        };

        self.processing
            .lock()
            .expect("processing lock")
            .remove(&command.id);

        let (status, mut result) = match outcome {
            None => {
                // Cancelled cooperatively, by the monitor or by a caller.
                if timed_out.load(Ordering::SeqCst) {
                    (
                        CommandStatus::Timeout,
                        CommandResult::failure(
                            &command.id,
                            format!("Command timed out after {:.0?}", command.timeout),
                            ErrorCode::Timeout.as_str(),
                        ),
                    )
                } else {
                    (
                        CommandStatus::Cancelled,
                        CommandResult::failure(&command.id, "Command cancelled", "cancelled"),
                    )
                }
            }
            Some(Ok(value)) => {
                let mut result = interpret_service_reply(&command.id, schema.service, &value);
                result.data = match value.get("data") {
                    Some(data) => data.clone(),
                    None => value.clone(),
                };
                let status = if result.success {
                    CommandStatus::Completed
                } else {
                    CommandStatus::Failed
                };
                (status, result)
            }
            Some(Err(err)) => {
                let (status, kind, response) = match &err {
                    RpcError::Timeout => (
                        CommandStatus::Timeout,
                        ErrorCode::Timeout.as_str(),
                        format!("Command timed out after {:.0?}", command.timeout),
                    ),
                    RpcError::Remote {
                        code: ErrorCode::ServiceUnavailable,
                        ..
                    } => (
                        CommandStatus::Failed,
                        ErrorCode::ServiceUnavailable.as_str(),
                        format!(
                            "Service {} not available. Available services: {}",
                            schema.service,
                            self.router.available_services().join(", ")
                        ),
                    ),
                    other => (
                        CommandStatus::Failed,
                        ErrorCode::HandlerError.as_str(),
                        format!("Error calling service {}: {other}", schema.service),
                    ),
                };
                let mut result = CommandResult::failure(&command.id, response, kind);
                result.error_details =
                    Some(json!({"type": kind, "error": err.to_string()}));
                (status, result)
            }
        };

        result.service_used = Some(schema.service.to_string());
        self.sessions
            .record_command(&session_id, output.intent, &validated, Some(schema.service));
        self.sessions.add_history(&session_id, &text, &result.response);
        if let Some(map) = result.data.as_object_mut() {
            map.entry("session_id").or_insert(json!(session_id));
        }

        self.finalize(&command, output.intent, status, result, started)
    }

    /// Stamp timing, cache, and record metrics exactly once.
    fn finalize(
        &self,
        command: &Command,
        intent: IntentKind,
        status: CommandStatus,
        mut result: CommandResult,
        started: Instant,
    ) -> CommandResult {
        result.execution_time = started.elapsed().as_secs_f64();
        result.timestamp = Utc::now();
        self.metrics
            .record(intent, status, result.success, result.execution_time);
        if result.success {
            self.cache.put(result.clone());
        }
        debug!(
            command = %command.id,
            %intent,
            success = result.success,
            execution_time = result.execution_time,
            "command finished"
        );
        result
    }
}

/// Shape a downstream tool reply into the command result fields.
fn interpret_service_reply(command_id: &str, service: &str, value: &Value) -> CommandResult {
    let success = value
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    let response = value
        .get("response")
        .or_else(|| value.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("Service {service} completed the command"));
    let suggestions = value
        .get("suggestions")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let mut result = if success {
        CommandResult::success(command_id, response)
    } else {
        CommandResult::failure(command_id, response, ErrorCode::HandlerError.as_str())
    };
    result.suggestions = suggestions;
    result
}
