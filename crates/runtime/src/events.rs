//! The shared data model: the immutable `Event` record written to the append-only store,
//! plus the tagged-union types each orchestrator produces.
//!
//! Every field that can carry user- or tool-supplied text is redacted before it reaches an
//! `Event` (see `crate::redactor`); `Event` itself never mutates once constructed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who originated an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    User,
    Assistant,
    System,
    Tool,
    Autonomous,
}

/// Outcome status carried by act-specific events (tool results, review passes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Ok,
    Error,
}

/// A single immutable record in the event log.
///
/// `act` names the occurrence (`tool_execution_start`, `chunk_write`, `review_cycle`, ...);
/// the remaining fields are a superset covering every act's payload, left `None` where unused
/// by a given act. This mirrors the journal's tagged-entry shape but flattened to one JSON
/// object per line, which is what the wire format and `tail`/`stream` queries expect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub ts: DateTime<Utc>,
    pub actor: Actor,
    pub act: String,
    pub conv_id: Uuid,
    pub trace_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iter: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<EventStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    /// Act-specific payload. Kept as a loose JSON object rather than an enum so new acts
    /// don't require a schema migration of every already-written segment.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl Event {
    pub fn new(actor: Actor, act: impl Into<String>, conv_id: Uuid, trace_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            ts: Utc::now(),
            actor,
            act: act.into(),
            conv_id,
            trace_id,
            iter: None,
            name: None,
            status: None,
            elapsed_ms: None,
            payload: serde_json::Map::new(),
        }
    }

    pub fn with_iter(mut self, iter: u32) -> Self {
        self.iter = Some(iter);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_status(mut self, status: EventStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_elapsed_ms(mut self, elapsed_ms: u64) -> Self {
        self.elapsed_ms = Some(elapsed_ms);
        self
    }

    pub fn with_payload(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.payload.insert(key.into(), v);
        }
        self
    }
}

/// A registered tool's shape, as handed to the model and to `GET /api/tools`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSchema>,
    /// When `true`, argument keys not named by `params` are passed through instead of
    /// rejected (SPEC_FULL §4.D: "unless the schema opts into pass-through"). Defaults to
    /// `false`, matching every built-in tool.
    #[serde(default)]
    pub allow_extra_args: bool,
    /// Safety category this tool belongs to, if any. Tools in a category are excluded from
    /// the effective allowlist whenever the matching `ExecutionConfig` gate is off, on top of
    /// the ordinary allowlist check (SPEC_FULL §4.E "safety tools").
    #[serde(default)]
    pub safety_class: Option<SafetyClass>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyClass {
    Shell,
    FileWrite,
    Git,
    Restart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<ParamSchema>>,
}

/// Outcome of one completed turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorResult {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    pub stop_reason: StopReason,
    pub debug: serde_json::Value,
    pub conv_id: Uuid,
    pub trace_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Stop,
    Length,
    ToolCalls,
    Error,
    Cancelled,
}

/// One scored critique pass, as recorded by the Review Orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewCycleRecord {
    pub pass: u32,
    pub quality_score: f64,
    pub threshold: f64,
    pub accepted: bool,
    pub critique: String,
}

/// The ordered outline and the chunks written against it so far.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkManifest {
    pub outline: Vec<String>,
    pub chunks: Vec<Chunk>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub label: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_tokens: Option<u32>,
}

impl ChunkManifest {
    /// A manifest is complete iff its chunk indices are a dense `0..outline.len()` prefix.
    pub fn is_complete(&self) -> bool {
        !self.outline.is_empty()
            && self.chunks.len() == self.outline.len()
            && self
                .chunks
                .iter()
                .enumerate()
                .all(|(i, c)| c.index == i && c.label == self.outline[i])
    }

    pub fn merged(&self) -> String {
        self.chunks
            .iter()
            .map(|c| format!("## {}\n\n{}", c.label, c.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Result of classifying a generated text as complete or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletenessReport {
    pub complete: bool,
    pub reason: Option<IncompleteReason>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncompleteReason {
    Fence,
    Punct,
    Short,
    Length,
    Stop,
}

/// Snapshot of a token bucket's observable state, per SPEC_FULL §3 invariant 6.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TokenBucketState {
    pub capacity: f64,
    pub refill_per_second: f64,
    pub current_tokens: f64,
}
