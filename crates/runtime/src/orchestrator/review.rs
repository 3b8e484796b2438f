//! Component I — wraps H with iterative self-critique and regeneration against a quality
//! threshold. Grounded on `reasoning/critic_audit.rs`'s `AuditChain`: an ordered, monotonically
//! increasing sequence of scored passes. The hash-chain/signing fields there have no
//! counterpart here (Non-goal: cryptographic signing of events).

use crate::cancellation::CancellationHandle;
use crate::event_store::EventStore;
use crate::events::{Actor, Event, OrchestratorResult, StopReason};
use crate::orchestrator::tool_loop::ToolLoopOrchestrator;
use crate::orchestrator::{Orchestrator, TurnContext, TurnRequest};
use crate::upstream::{CompletionRequest, Message, UpstreamClient};
use regex::Regex;
use serde_json::json;
use std::sync::{Arc, OnceLock};

#[derive(Debug, Clone)]
pub struct ReviewConfig {
    pub iterations: u32,
    pub threshold: f64,
    pub max_regenerations: u32,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            iterations: 3,
            threshold: 0.7,
            max_regenerations: 2,
        }
    }
}

const RUBRIC: &str = "You are a strict reviewer. Score the draft from 0 to 1 on correctness, \
completeness, and clarity. Respond with a line `Score: <number>` followed by a short critique.";

pub struct ReviewOrchestrator {
    inner: Arc<ToolLoopOrchestrator>,
    upstream: Arc<UpstreamClient>,
    event_store: Arc<EventStore>,
    config: ReviewConfig,
}

impl ReviewOrchestrator {
    pub fn new(
        inner: Arc<ToolLoopOrchestrator>,
        upstream: Arc<UpstreamClient>,
        event_store: Arc<EventStore>,
        config: ReviewConfig,
    ) -> Self {
        Self {
            inner,
            upstream,
            event_store,
            config,
        }
    }

    pub async fn run(&self, request: TurnRequest, ctx: TurnContext) -> OrchestratorResult {
        let mut draft = self.inner.run(request.clone(), ctx.clone()).await;
        let mut best = draft.clone();
        let mut best_score: f64 = -1.0;
        let mut regen_budget = self.config.max_regenerations;

        for pass in 1..=self.config.iterations {
            if ctx.cancel.is_cancelled() {
                self.emit_aborted(&request, pass).await;
                return best;
            }

            let critique_request = CompletionRequest {
                messages: vec![
                    Message::system(RUBRIC),
                    Message::user(critique_prompt(&request, &draft.content)),
                ],
                tools: vec![],
                max_tokens: 512,
                temperature: 0.0,
                model: None,
            };

            let response = match self.upstream.complete(&critique_request).await {
                Ok(r) => r,
                Err(e) => {
                    best.debug = json!({"mode": "review", "error": e.to_string(), "best_score": best_score});
                    return best;
                }
            };

            let (score, critique) = extract_score(&response.content);
            let accepted = score >= self.config.threshold;

            self.emit_review_cycle(&request, pass, score, accepted, &critique).await;

            if score >= best_score {
                best_score = score;
                best = draft.clone();
            }

            if accepted {
                draft.debug = json!({"mode": "review", "pass": pass, "quality_score": score, "accepted": true});
                return draft;
            }

            if regen_budget == 0 {
                break;
            }
            regen_budget -= 1;
            self.emit_regeneration(&request, pass).await;

            let mut regen_request = request.clone();
            regen_request.messages.push(Message::system(format!(
                "Revise your previous answer to address this critique: {critique}"
            )));
            draft = self.inner.run(regen_request, ctx.clone()).await;
        }

        self.emit_summary(&request, best_score).await;
        best.stop_reason = if best.stop_reason == StopReason::Error {
            StopReason::Error
        } else {
            best.stop_reason
        };
        best.debug = json!({"mode": "review", "accepted": false, "best_score": best_score});
        best
    }

    async fn emit_review_cycle(&self, request: &TurnRequest, pass: u32, score: f64, accepted: bool, critique: &str) {
        let preview: String = critique.chars().take(500).collect();
        let event = Event::new(Actor::System, "review_cycle", request.conv_id, request.trace_id)
            .with_iter(pass)
            .with_payload("pass", pass)
            .with_payload("quality_score", score)
            .with_payload("threshold", self.config.threshold)
            .with_payload("accepted", accepted)
            .with_payload("critique", preview);
        let _ = self.event_store.append(&event).await;
    }

    async fn emit_regeneration(&self, request: &TurnRequest, pass: u32) {
        let event = Event::new(Actor::System, "regeneration", request.conv_id, request.trace_id)
            .with_iter(pass);
        let _ = self.event_store.append(&event).await;
    }

    async fn emit_summary(&self, request: &TurnRequest, best_score: f64) {
        let event = Event::new(Actor::System, "review_summary", request.conv_id, request.trace_id)
            .with_payload("best_score", best_score)
            .with_payload("accepted", false);
        let _ = self.event_store.append(&event).await;
    }

    async fn emit_aborted(&self, request: &TurnRequest, pass: u32) {
        let event = Event::new(Actor::System, "turn_aborted", request.conv_id, request.trace_id)
            .with_iter(pass)
            .with_payload("phase", "review");
        let _ = self.event_store.append(&event).await;
    }
}

fn critique_prompt(request: &TurnRequest, draft: &str) -> String {
    let user_request = request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .and_then(|m| m.content.clone())
        .unwrap_or_default();
    format!("User request:\n{user_request}\n\nDraft:\n{draft}")
}

pub(crate) fn score_patterns() -> &'static (Regex, Regex, Regex) {
    static PATTERNS: OnceLock<(Regex, Regex, Regex)> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        (
            Regex::new(r"(?i)score\s*[:=]\s*([01](?:\.\d+)?|\.\d+)").unwrap(),
            Regex::new(r"(?i)quality\s*[:=]\s*([01](?:\.\d+)?|\.\d+)").unwrap(),
            Regex::new(r"(?m)^\s*([01](?:\.\d+)?|\.\d+)\s*$").unwrap(),
        )
    })
}

/// Tolerant score extraction accepting `Score: 0.78`, `quality=0.78`, or a bare number on its
/// own line, per SPEC_FULL §4.I. Falls back to 0.0 when no number is found (treated as a
/// rejected pass rather than a crash).
pub(crate) fn extract_score(text: &str) -> (f64, String) {
    let (score_re, quality_re, bare_re) = score_patterns();
    let score = score_re
        .captures(text)
        .or_else(|| quality_re.captures(text))
        .or_else(|| bare_re.captures(text))
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);
    (score, text.to_string())
}

#[async_trait::async_trait]
impl Orchestrator for ReviewOrchestrator {
    async fn run(&self, request: TurnRequest, ctx: TurnContext) -> OrchestratorResult {
        ReviewOrchestrator::run(self, request, ctx).await
    }
}
