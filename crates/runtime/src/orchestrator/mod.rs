//! The `Orchestrator` capability and the shared request/context shape composed by H/I/J/K, per
//! SPEC_FULL §9's "interface abstraction over duck-typed orchestrators": implementations
//! compose by value, never by patching shared mutable state.

pub mod chunked;
pub mod combined;
pub mod review;
pub mod tool_loop;

use crate::cancellation::CancellationHandle;
use crate::events::OrchestratorResult;
use crate::upstream::{Message, ToolSpec};
use async_trait::async_trait;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    pub conv_id: Uuid,
    pub trace_id: Uuid,
}

#[derive(Clone)]
pub struct TurnContext {
    pub cancel: CancellationHandle,
}

impl TurnContext {
    pub fn new() -> Self {
        Self {
            cancel: CancellationHandle::new(),
        }
    }
}

impl Default for TurnContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn run(&self, request: TurnRequest, ctx: TurnContext) -> OrchestratorResult;
}

/// Derives a per-tool-call `trace_id` from the turn's parent trace, so that every tool
/// invocation within one assistant turn is independently correlatable while still traceable
/// back to its parent (SPEC_FULL §4.H ordering guarantee).
pub(crate) fn derive_trace_id(parent: Uuid, iter: u32, call_index: usize) -> Uuid {
    Uuid::new_v5(&parent, format!("{iter}:{call_index}").as_bytes())
}
