//! `assistant-runtime` — the tool execution plane, reasoning orchestrator, and append-only
//! event store backing the `assistant-core` server.
//!
//! The crate is organized as a small stack of independently testable components (see
//! `DESIGN.md` at the workspace root for the full grounding ledger):
//!
//! - [`settings`] / [`error`] — configuration and the per-subsystem error taxonomy.
//! - [`events`] / [`event_store`] — the data model and the append-only JSONL log.
//! - [`redactor`] / [`rate_limiter`] / [`registry`] / [`tool_executor`] — the tool execution
//!   plane: validate, rate-limit, redact, dispatch, and audit every tool call.
//! - [`upstream`] / [`completeness`] / [`cancellation`] / [`orchestrator`] — the reasoning
//!   orchestrator: a tool-use loop plus review/chunked/combined compositions over it.
//! - [`mode_heuristic`] / [`telemetry_hints`] — ambient turn-shaping: which orchestrator to
//!   run, and what steering hint to prepend.
//! - [`surface`] (feature `http-api`) — the diagnostics/stream HTTP surface.

pub mod cancellation;
pub mod completeness;
pub mod error;
pub mod event_store;
pub mod events;
pub mod mode_heuristic;
pub mod orchestrator;
pub mod rate_limiter;
pub mod redactor;
pub mod registry;
pub mod settings;
pub mod telemetry_hints;
pub mod tool_executor;
pub mod upstream;

#[cfg(feature = "http-api")]
pub mod surface;

pub use error::CoreError;
pub use events::{Actor, Event, OrchestratorResult, ToolDescriptor};
pub use settings::Config;

use crate::event_store::{EventStore, EventStoreConfig};
use crate::mode_heuristic::ModeHeuristic;
use crate::orchestrator::chunked::{ChunkedConfig, ChunkedOrchestrator};
use crate::orchestrator::combined::CombinedOrchestrator;
use crate::orchestrator::review::{ReviewConfig, ReviewOrchestrator};
use crate::orchestrator::tool_loop::{ToolLoopConfig, ToolLoopOrchestrator};
use crate::orchestrator::Orchestrator;
use crate::rate_limiter::RateLimiter;
use crate::registry::ToolRegistry;
use crate::telemetry_hints::TelemetryHintConfig;
use crate::telemetry_hints::TelemetryHintInjector;
use crate::tool_executor::{ToolBody, ToolExecutor};
use crate::upstream::{UpstreamClient, UpstreamConfig};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Every long-lived component assembled from a [`Config`], wired together the way
/// `main.rs`'s `serve` subcommand needs them. Tool bodies and descriptors are supplied by the
/// caller since they are deployment-specific (SPEC_FULL §4.D treats the tool set as an input,
/// not something this crate invents).
pub struct Runtime {
    pub event_store: Arc<EventStore>,
    pub registry: Arc<ToolRegistry>,
    pub rate_limiter: Arc<RateLimiter>,
    pub tool_executor: Arc<ToolExecutor>,
    pub upstream: Arc<UpstreamClient>,
    pub mode_heuristic: Arc<ModeHeuristic>,
    pub telemetry_hints: Arc<TelemetryHintInjector>,
    pub standard: Arc<dyn Orchestrator>,
    pub review: Arc<dyn Orchestrator>,
    pub chunked: Arc<dyn Orchestrator>,
    pub combined: Arc<dyn Orchestrator>,
    pub config: Config,
}

impl Runtime {
    /// Assembles the full component stack from a frozen [`Config`] plus the caller's tool
    /// descriptors and bodies. Tool execution, rate limiting, and the event log all share the
    /// same `config` values; orchestrators compose in the fixed H → I/J → K order.
    pub fn new(
        config: Config,
        tool_descriptors: Vec<ToolDescriptor>,
        tool_bodies: HashMap<String, Arc<dyn ToolBody>>,
    ) -> Self {
        let event_store = Arc::new(EventStore::new(EventStoreConfig::from(&config.event_store)));

        let registry = Arc::new(ToolRegistry::with_gates(
            tool_descriptors,
            config.execution.tool_allow.clone(),
            &config.execution,
        ));

        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));

        let tool_executor = Arc::new(ToolExecutor::new(
            registry.clone(),
            tool_bodies,
            rate_limiter.clone(),
            event_store.clone(),
            config.execution.clone(),
            redactor::RedactorConfig {
                aggressive_mode: config.redactor.aggressive_mode,
                max_recursion_depth: config.redactor.max_recursion_depth,
            },
            config.rate_limit.scope,
            config.logging.redact_max_preview_bytes,
        ));

        let upstream = Arc::new(UpstreamClient::new(UpstreamConfig {
            base_url: config.api.upstream_base_url.clone(),
            api_key: config.api.upstream_api_key.clone(),
            default_model: config.api.upstream_model.clone(),
            max_continuation_attempts: config.continuation.max_continuation_attempts,
            request_timeout: Duration::from_secs(120),
        }));

        let tool_loop = Arc::new(ToolLoopOrchestrator::new(
            upstream.clone(),
            tool_executor.clone(),
            event_store.clone(),
            ToolLoopConfig::default(),
        ));

        let review_config = ReviewConfig {
            iterations: config.orchestrators.review_iterations,
            threshold: config.orchestrators.review_threshold,
            max_regenerations: config.orchestrators.review_max_regenerations,
        };
        let review: Arc<dyn Orchestrator> = Arc::new(ReviewOrchestrator::new(
            tool_loop.clone(),
            upstream.clone(),
            event_store.clone(),
            review_config.clone(),
        ));

        let chunked_config = ChunkedConfig {
            max_chunks: config.orchestrators.chunked_max_chunks,
            tokens_per_chunk: config.orchestrators.chunked_tokens_per_chunk,
            ..ChunkedConfig::default()
        };
        let chunked_orchestrator = Arc::new(ChunkedOrchestrator::new(
            upstream.clone(),
            event_store.clone(),
            chunked_config.clone(),
        ));
        let chunked: Arc<dyn Orchestrator> = chunked_orchestrator.clone();

        let combined: Arc<dyn Orchestrator> = Arc::new(CombinedOrchestrator::new(
            chunked_orchestrator,
            upstream.clone(),
            event_store.clone(),
            chunked_config,
            review_config,
            config.orchestrators.combined_strategy,
        ));

        let mode_heuristic = Arc::new(ModeHeuristic::new(event_store.clone(), config.orchestrators.clone()));

        let telemetry_hints = Arc::new(TelemetryHintInjector::new(
            event_store.clone(),
            TelemetryHintConfig {
                window: Duration::from_secs((config.telemetry_hints.window_minutes.max(0) as u64) * 60),
                min_samples: config.telemetry_hints.min_samples,
                trigger_fraction: config.telemetry_hints.threshold,
                sample_size: 200,
            },
        ));

        Self {
            event_store,
            registry,
            rate_limiter,
            tool_executor,
            upstream,
            mode_heuristic,
            telemetry_hints,
            standard: tool_loop,
            review,
            chunked,
            combined,
            config,
        }
    }
}
