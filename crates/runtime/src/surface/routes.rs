//! Route handlers for the diagnostics/stream surface. Response shapes follow SPEC_FULL §6
//! bit-exactly: tool run/list/executions, context tail/stream, and chat/chat-stream.

use super::AppState;
use crate::error::ToolExecutionError;
use crate::events::{Event, ParamSchema, ParamType, ToolDescriptor};
use crate::mode_heuristic::Mode;
use crate::orchestrator::{TurnContext, TurnRequest};
use crate::rate_limiter;
use crate::registry::ToolRegistry;
use crate::tool_executor::ExecutionContext;
use crate::upstream::{CompletionRequest, Message, StopReason as UpstreamStopReason, ToolSpec};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::atomic::Ordering;
use std::time::Duration;
use uuid::Uuid;

// ---- GET /api/tools ----

#[derive(Serialize)]
pub struct ListToolsResponse {
    names: Vec<String>,
    descriptors: Vec<crate::events::ToolDescriptor>,
}

pub async fn list_tools(State(state): State<AppState>) -> Json<ListToolsResponse> {
    state.metrics.total_requests.fetch_add(1, Ordering::Relaxed);
    let descriptors: Vec<crate::events::ToolDescriptor> = state.registry.list().into_iter().cloned().collect();
    let names = descriptors.iter().map(|d| d.name.clone()).collect();
    Json(ListToolsResponse { names, descriptors })
}

// ---- POST /api/tools/run ----

#[derive(Deserialize)]
pub struct RunToolRequest {
    name: String,
    #[serde(default)]
    args: serde_json::Value,
    conv_id: Option<Uuid>,
    trace_id: Option<Uuid>,
}

pub async fn run_tool(State(state): State<AppState>, Json(body): Json<RunToolRequest>) -> Response {
    state.metrics.total_requests.fetch_add(1, Ordering::Relaxed);
    state.metrics.total_tool_calls.fetch_add(1, Ordering::Relaxed);

    let conv_id = body.conv_id.unwrap_or_else(Uuid::new_v4);
    let ctx = ExecutionContext {
        conv_id,
        trace_id: body.trace_id.unwrap_or_else(Uuid::new_v4),
        iter: None,
    };

    let scope_key = rate_limiter::scope_key(state.rate_limit_scope, Some(&conv_id.to_string()), None);
    let result = state.tool_executor.run_tool(&body.name, body.args, ctx).await;
    let rate_headers = rate_limit_headers(&state, &scope_key).await;

    match result {
        Ok(result) => (rate_headers, Json(json!({"ok": true, "result": result}))).into_response(),
        Err(err) => {
            if matches!(err, ToolExecutionError::RateLimited { .. }) {
                state.metrics.total_rate_limited.fetch_add(1, Ordering::Relaxed);
            }
            tool_error_response(err, rate_headers)
        }
    }
}

/// `X-RateLimit-*` headers (SPEC_FULL §6) reflecting the bucket this request was charged
/// against, read back after the charge so `Remaining` accounts for the current request.
async fn rate_limit_headers(state: &AppState, key: &str) -> HeaderMap {
    let bucket = state.rate_limiter.state(key).await;
    let mut headers = HeaderMap::new();
    if let Ok(v) = HeaderValue::from_str(&(bucket.capacity as u64).to_string()) {
        headers.insert("X-RateLimit-Limit", v);
    }
    if let Ok(v) = HeaderValue::from_str(&(bucket.current_tokens.floor().max(0.0) as u64).to_string()) {
        headers.insert("X-RateLimit-Remaining", v);
    }
    let reset_secs = if bucket.refill_per_second > 0.0 {
        ((bucket.capacity - bucket.current_tokens).max(0.0) / bucket.refill_per_second).ceil() as u64
    } else {
        0
    };
    if let Ok(v) = HeaderValue::from_str(&reset_secs.to_string()) {
        headers.insert("X-RateLimit-Reset", v);
    }
    headers
}

fn tool_error_response(err: ToolExecutionError, mut headers: HeaderMap) -> Response {
    let kind = err.kind();
    let body = json!({"ok": false, "error": {"kind": kind, "message": err.to_string()}});
    // Every tool-execution error rides back as a normal 200 `{ok: false}` response; only
    // `RateLimited` deviates with its own status (SPEC_FULL §6).
    let status = match &err {
        ToolExecutionError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        ToolExecutionError::ToolUnknown { .. }
        | ToolExecutionError::ToolGated { .. }
        | ToolExecutionError::ValidationError { .. }
        | ToolExecutionError::Timeout { .. }
        | ToolExecutionError::OutputTooLarge { .. }
        | ToolExecutionError::ExecutionError { .. }
        | ToolExecutionError::Cancelled => StatusCode::OK,
    };
    if let ToolExecutionError::RateLimited { retry_after_secs } = &err {
        if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
            headers.insert("Retry-After", value);
        }
    }
    (status, headers, Json(body)).into_response()
}

// ---- GET /api/tools/executions & /api/ctx/tail ----

#[derive(Deserialize)]
pub struct TailQuery {
    n: Option<usize>,
    conv_id: Option<Uuid>,
    acts: Option<String>,
}

const TOOL_EXECUTION_ACTS: &[&str] = &["tool_execution_start", "tool_execution_finish", "tool_execution_error"];

pub async fn tool_executions(
    State(state): State<AppState>,
    Query(query): Query<TailQuery>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    state.metrics.total_requests.fetch_add(1, Ordering::Relaxed);
    let acts: Vec<String> = TOOL_EXECUTION_ACTS.iter().map(|s| s.to_string()).collect();
    let events = state
        .event_store
        .tail(query.n.unwrap_or(50), query.conv_id, Some(&acts))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(json!({"events": events})))
}

pub async fn ctx_tail(
    State(state): State<AppState>,
    Query(query): Query<TailQuery>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    state.metrics.total_requests.fetch_add(1, Ordering::Relaxed);
    let acts = query.acts.as_ref().map(|raw| raw.split(',').map(|s| s.trim().to_string()).collect::<Vec<_>>());
    let events = state
        .event_store
        .tail(query.n.unwrap_or(50), query.conv_id, acts.as_deref())
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(json!({"events": events})))
}

// ---- GET /api/ctx/stream ----

#[derive(Deserialize)]
pub struct StreamQuery {
    conv_id: Option<Uuid>,
}

/// Replays recent history first, then the live broadcast tail, deduping by event id across the
/// small overlap window — the same "durable write first, best-effort forward" contract
/// `EventStore::subscribe` documents.
pub async fn ctx_stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    state.metrics.total_requests.fetch_add(1, Ordering::Relaxed);
    state.metrics.total_streams.fetch_add(1, Ordering::Relaxed);

    let mut receiver = state.event_store.subscribe();
    let history = state.event_store.tail(200, query.conv_id, None).await.unwrap_or_default();
    let mut history: Vec<Event> = history.into_iter().rev().collect();
    let conv_filter = query.conv_id;

    let stream = async_stream::stream! {
        let mut seen: HashSet<Uuid> = HashSet::with_capacity(256);
        for event in history.drain(..) {
            seen.insert(event.id);
            if let Ok(frame) = serde_json::to_string(&event) {
                yield Ok(SseEvent::default().data(frame));
            }
        }

        loop {
            tokio::select! {
                received = receiver.recv() => {
                    match received {
                        Ok(event) => {
                            if let Some(conv_id) = conv_filter {
                                if event.conv_id != conv_id {
                                    continue;
                                }
                            }
                            if !seen.insert(event.id) {
                                continue;
                            }
                            if let Ok(frame) = serde_json::to_string(&event) {
                                yield Ok(SseEvent::default().data(frame));
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text(""))
}

/// Builds the catalog handed to the model (§2's "UI → … → F ↔ E tool calls" path): every
/// currently-allowlisted descriptor, reshaped into the JSON-Schema `parameters` object the
/// upstream chat-completions API expects.
fn tool_specs(registry: &ToolRegistry) -> Vec<ToolSpec> {
    registry
        .list()
        .into_iter()
        .filter(|d| registry.is_allowed(&d.name))
        .map(descriptor_to_spec)
        .collect()
}

fn descriptor_to_spec(descriptor: &ToolDescriptor) -> ToolSpec {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    for param in &descriptor.params {
        properties.insert(param.name.clone(), param_schema_to_json(param));
        if param.required {
            required.push(json!(param.name));
        }
    }
    let parameters = json!({
        "type": "object",
        "properties": Value::Object(properties),
        "required": required,
        "additionalProperties": descriptor.allow_extra_args,
    });
    ToolSpec {
        name: descriptor.name.clone(),
        description: descriptor.description.clone(),
        parameters,
    }
}

fn param_schema_to_json(param: &ParamSchema) -> Value {
    let mut obj = serde_json::Map::new();
    obj.insert("type".to_string(), json!(param_type_name(param.param_type)));
    if let Some(max_length) = param.max_length {
        obj.insert("maxLength".to_string(), json!(max_length));
    }
    if let Some(max_items) = param.max_items {
        obj.insert("maxItems".to_string(), json!(max_items));
    }
    if let Some(min) = param.min {
        obj.insert("minimum".to_string(), json!(min));
    }
    if let Some(max) = param.max {
        obj.insert("maximum".to_string(), json!(max));
    }
    if let Some(enum_values) = &param.enum_values {
        obj.insert("enum".to_string(), json!(enum_values));
    }
    if let Some(items) = &param.items {
        obj.insert("items".to_string(), param_schema_to_json(items));
    }
    Value::Object(obj)
}

fn param_type_name(param_type: ParamType) -> &'static str {
    match param_type {
        ParamType::String => "string",
        ParamType::Number => "number",
        ParamType::Integer => "integer",
        ParamType::Boolean => "boolean",
        ParamType::Array => "array",
        ParamType::Object => "object",
    }
}

// ---- POST /api/chat ----

#[derive(Deserialize)]
pub struct ChatRequest {
    messages: Vec<ChatMessage>,
    model: Option<String>,
    mode: Option<Mode>,
    conv_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct ChatMessage {
    role: String,
    content: String,
}

impl From<ChatMessage> for Message {
    fn from(m: ChatMessage) -> Self {
        match m.role.as_str() {
            "system" => Message::system(m.content),
            "assistant" => Message::assistant(m.content),
            _ => Message::user(m.content),
        }
    }
}

pub async fn chat(State(state): State<AppState>, Json(body): Json<ChatRequest>) -> Response {
    state.metrics.total_requests.fetch_add(1, Ordering::Relaxed);

    let conv_id = body.conv_id.unwrap_or_else(Uuid::new_v4);
    let trace_id = Uuid::new_v4();
    let user_text = body
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.clone())
        .unwrap_or_default();

    let mode = state.mode_heuristic.decide(&user_text, conv_id, trace_id, body.mode).await;

    let mut messages: Vec<Message> = body.messages.into_iter().map(Into::into).collect();
    let hint = state.telemetry_hints.hint(conv_id, trace_id).await;
    if !hint.is_empty() {
        messages.insert(0, Message::system(hint));
    }
    let _ = body.model;

    let request = TurnRequest {
        messages,
        tools: tool_specs(&state.registry),
        conv_id,
        trace_id,
    };
    let ctx = TurnContext::new();

    let orchestrator = match mode {
        Mode::Standard => &state.orchestrators.standard,
        Mode::Review => &state.orchestrators.review,
        Mode::Chunked => &state.orchestrators.chunked,
        Mode::Combined => &state.orchestrators.combined,
    };

    let result = orchestrator.run(request, ctx).await;
    Json(json!({
        "content": result.content,
        "reasoning": result.reasoning,
        "debug": result.debug,
        "conv_id": result.conv_id,
        "trace_id": result.trace_id,
    }))
    .into_response()
}

// ---- POST /api/chat/stream ----

/// Streams raw upstream token deltas for `standard` mode. Multi-phase modes (review, chunked,
/// combined) run to completion internally and are surfaced as a single `event`/`done` pair,
/// since there is no well-defined token-level stream across multiple completions.
pub async fn chat_stream(
    State(state): State<AppState>,
    Json(body): Json<ChatRequest>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    state.metrics.total_requests.fetch_add(1, Ordering::Relaxed);
    state.metrics.total_streams.fetch_add(1, Ordering::Relaxed);

    let conv_id = body.conv_id.unwrap_or_else(Uuid::new_v4);
    let trace_id = Uuid::new_v4();
    let user_text = body
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.clone())
        .unwrap_or_default();
    let mode = state.mode_heuristic.decide(&user_text, conv_id, trace_id, body.mode).await;
    let messages: Vec<Message> = body.messages.into_iter().map(Into::into).collect();
    let model = body.model;

    if mode != Mode::Standard {
        let orchestrator = match mode {
            Mode::Review => &state.orchestrators.review,
            Mode::Chunked => &state.orchestrators.chunked,
            Mode::Combined => &state.orchestrators.combined,
            Mode::Standard => unreachable!(),
        };
        let request = TurnRequest {
            messages,
            tools: tool_specs(&state.registry),
            conv_id,
            trace_id,
        };
        let result = orchestrator.run(request, TurnContext::new()).await;
        let frame = json!({"event": "result", "contentDelta": result.content, "done": true});
        let single = stream::once(async move { Ok(SseEvent::default().data(frame.to_string())) });
        return Sse::new(Box::pin(single) as std::pin::Pin<Box<dyn Stream<Item = Result<SseEvent, Infallible>> + Send>>)
            .keep_alive(KeepAlive::default());
    }

    let completion_request = CompletionRequest {
        messages,
        tools: tool_specs(&state.registry),
        max_tokens: 2048,
        temperature: 0.7,
        model,
    };
    let cancel = TurnContext::new().cancel;
    let upstream = state.upstream.clone();

    let stream = async_stream::stream! {
        match upstream.complete_stream(&completion_request, cancel).await {
            Ok(mut deltas) => {
                use futures::StreamExt;
                loop {
                    match deltas.next().await {
                        Some(Ok(delta)) => {
                            let done = matches!(delta.stop_reason, Some(UpstreamStopReason::Stop) | Some(UpstreamStopReason::Length));
                            let frame = json!({
                                "contentDelta": delta.content_delta,
                                "reasoningDelta": delta.reasoning_delta,
                                "done": done,
                            });
                            yield Ok(SseEvent::default().data(frame.to_string()));
                            if done {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            let frame = json!({"event": "error", "message": e.to_string(), "done": true});
                            yield Ok(SseEvent::default().data(frame.to_string()));
                            break;
                        }
                        None => break,
                    }
                }
            }
            Err(e) => {
                let frame = json!({"event": "error", "message": e.to_string(), "done": true});
                yield Ok(SseEvent::default().data(frame.to_string()));
            }
        }
    };

    Sse::new(Box::pin(stream) as std::pin::Pin<Box<dyn Stream<Item = Result<SseEvent, Infallible>> + Send>>)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text(""))
}
