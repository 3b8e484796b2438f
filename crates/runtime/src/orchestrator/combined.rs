//! Component K — composes the Review Orchestrator (I) over the Chunked Orchestrator (J) under
//! one of three strategies. State machine mirrors the teacher's `TerminationReason`/
//! `LoopContinuation` runtime-enum style in `reasoning/loop_types.rs`, generalized from a
//! tool-loop's termination states to the chunked/review phase sequence in SPEC_FULL §4.K.

use crate::event_store::EventStore;
use crate::events::{Actor, Chunk, ChunkManifest, Event, OrchestratorResult, StopReason};
use crate::orchestrator::chunked::{ChunkedConfig, ChunkedOrchestrator};
use crate::orchestrator::review::{extract_score, ReviewConfig};
use crate::orchestrator::{Orchestrator, TurnContext, TurnRequest};
use crate::settings::CombinedStrategy;
use crate::upstream::{CompletionRequest, Message, UpstreamClient};
use serde_json::json;
use std::sync::Arc;

pub struct CombinedOrchestrator {
    chunked: Arc<ChunkedOrchestrator>,
    upstream: Arc<UpstreamClient>,
    event_store: Arc<EventStore>,
    chunked_config: ChunkedConfig,
    review_config: ReviewConfig,
    strategy: CombinedStrategy,
}

impl CombinedOrchestrator {
    pub fn new(
        chunked: Arc<ChunkedOrchestrator>,
        upstream: Arc<UpstreamClient>,
        event_store: Arc<EventStore>,
        chunked_config: ChunkedConfig,
        review_config: ReviewConfig,
        strategy: CombinedStrategy,
    ) -> Self {
        Self {
            chunked,
            upstream,
            event_store,
            chunked_config,
            review_config,
            strategy,
        }
    }

    pub async fn run(&self, request: TurnRequest, ctx: TurnContext) -> OrchestratorResult {
        match self.strategy {
            CombinedStrategy::FinalOnly => self.run_final_only(request, ctx).await,
            CombinedStrategy::PerChunk => self.run_per_chunk(request, ctx, false).await,
            CombinedStrategy::Both => self.run_per_chunk(request, ctx, true).await,
        }
    }

    /// `final_only`: generate the whole answer via J, then review the merged result via I;
    /// rejected reviews regenerate the entire answer (a fresh J pass).
    async fn run_final_only(&self, request: TurnRequest, ctx: TurnContext) -> OrchestratorResult {
        let mut result = self.chunked.run(request.clone(), ctx.clone()).await;
        let mut regen_budget = self.review_config.max_regenerations;

        for pass in 1..=self.review_config.iterations {
            if ctx.cancel.is_cancelled() {
                return result;
            }
            let (score, critique) = self.score(&request, &result.content).await;
            self.emit_review(&request, pass, score, score >= self.review_config.threshold, &critique, None)
                .await;
            if score >= self.review_config.threshold {
                return result;
            }
            if regen_budget == 0 {
                break;
            }
            regen_budget -= 1;
            let mut regen_request = request.clone();
            regen_request
                .messages
                .push(Message::system(format!("Revise to address this critique: {critique}")));
            result = self.chunked.run(regen_request, ctx.clone()).await;
        }
        result
    }

    /// `per_chunk` / `both`: review each chunk right after it is written, regenerating just
    /// that chunk on rejection; `both` additionally runs one final review over the merged
    /// result. SPEC_FULL §9 Open Question: continuations belong to J alone, never triggered
    /// from within a review pass here.
    async fn run_per_chunk(&self, request: TurnRequest, ctx: TurnContext, final_pass: bool) -> OrchestratorResult {
        let user_text = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .and_then(|m| m.content.clone())
            .unwrap_or_default();

        let outline = match self.chunked.outline_phase(&request, &user_text).await {
            Ok(o) => o,
            Err(message) => {
                return OrchestratorResult {
                    content: String::new(),
                    reasoning: None,
                    stop_reason: StopReason::Error,
                    debug: json!({"mode": "combined", "error": message}),
                    conv_id: request.conv_id,
                    trace_id: request.trace_id,
                };
            }
        };

        let mut manifest = ChunkManifest {
            outline: outline.clone(),
            chunks: Vec::new(),
        };

        for (index, label) in outline.iter().enumerate() {
            if ctx.cancel.is_cancelled() {
                self.chunked.emit_aborted(&request, index).await;
                return self.chunked.partial_result(manifest, &request, StopReason::Cancelled, None);
            }

            let mut chunk = match self.chunked.write_chunk(&request, &user_text, &manifest, index, label).await {
                Ok(c) => c,
                Err(e) => match self.chunked.write_chunk(&request, &user_text, &manifest, index, label).await {
                    Ok(c) => c,
                    Err(e2) => {
                        let _ = e;
                        return self.chunked.partial_result(manifest, &request, StopReason::Error, Some((index, e2)));
                    }
                },
            };

            let mut regen_budget = self.review_config.max_regenerations;
            for pass in 1..=self.review_config.iterations {
                let (score, critique) = self.score(&request, &chunk.content).await;
                self.emit_review(
                    &request,
                    pass,
                    score,
                    score >= self.review_config.threshold,
                    &critique,
                    Some(index),
                )
                .await;
                if score >= self.review_config.threshold || regen_budget == 0 {
                    break;
                }
                regen_budget -= 1;
                if let Ok(revised) = self
                    .rewrite_chunk(&request, &user_text, &manifest, index, label, &chunk.content, &critique)
                    .await
                {
                    chunk = revised;
                }
            }

            manifest.chunks.push(chunk);
        }

        let mut content = manifest.merged();

        if final_pass {
            let mut regen_budget = self.review_config.max_regenerations;
            for pass in 1..=self.review_config.iterations {
                let (score, critique) = self.score(&request, &content).await;
                self.emit_review(&request, pass, score, score >= self.review_config.threshold, &critique, None)
                    .await;
                if score >= self.review_config.threshold || regen_budget == 0 {
                    break;
                }
                regen_budget -= 1;
                let mut regen_request = request.clone();
                regen_request
                    .messages
                    .push(Message::system(format!("Revise to address this critique: {critique}")));
                let regenerated = self.chunked.run(regen_request, ctx.clone()).await;
                content = regenerated.content;
            }
        }

        OrchestratorResult {
            content,
            reasoning: None,
            stop_reason: StopReason::Stop,
            debug: json!({
                "mode": "combined",
                "strategy": if final_pass { "both" } else { "per_chunk" },
                "chunked": manifest,
            }),
            conv_id: request.conv_id,
            trace_id: request.trace_id,
        }
    }

    async fn rewrite_chunk(
        &self,
        request: &TurnRequest,
        user_text: &str,
        manifest: &ChunkManifest,
        index: usize,
        label: &str,
        prior: &str,
        critique: &str,
    ) -> Result<Chunk, String> {
        let mut prompt = self.chunked.chunk_prompt(user_text, manifest, label);
        prompt.push_str(&format!(
            "\n\nYour previous draft of this section was:\n{prior}\n\nAddress this critique: {critique}"
        ));
        let completion_request = CompletionRequest {
            messages: vec![Message::user(prompt)],
            tools: vec![],
            max_tokens: self.chunked_config.tokens_per_chunk,
            temperature: 0.7,
            model: None,
        };
        let response = self.upstream.complete(&completion_request).await.map_err(|e| e.to_string())?;
        let _ = request;
        Ok(Chunk {
            index,
            label: label.to_string(),
            content: response.content,
            reasoning_tokens: None,
            content_tokens: None,
        })
    }

    async fn score(&self, request: &TurnRequest, content: &str) -> (f64, String) {
        let user_text = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .and_then(|m| m.content.clone())
            .unwrap_or_default();
        let prompt = format!(
            "Score this draft from 0 to 1 against the request, replying `Score: <number>` then a \
             short critique.\n\nRequest: {user_text}\n\nDraft: {content}"
        );
        let completion_request = CompletionRequest {
            messages: vec![Message::user(prompt)],
            tools: vec![],
            max_tokens: 256,
            temperature: 0.0,
            model: None,
        };
        match self.upstream.complete(&completion_request).await {
            Ok(response) => extract_score(&response.content),
            Err(e) => (0.0, e.to_string()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn emit_review(
        &self,
        request: &TurnRequest,
        pass: u32,
        score: f64,
        accepted: bool,
        critique: &str,
        chunk_index: Option<usize>,
    ) {
        let preview: String = critique.chars().take(500).collect();
        let mut event = Event::new(Actor::System, "review_cycle", request.conv_id, request.trace_id)
            .with_iter(pass)
            .with_payload("pass", pass)
            .with_payload("quality_score", score)
            .with_payload("threshold", self.review_config.threshold)
            .with_payload("accepted", accepted)
            .with_payload("critique", preview);
        if let Some(index) = chunk_index {
            event = event.with_payload("chunk_index", index);
        }
        let _ = self.event_store.append(&event).await;
    }
}

#[async_trait::async_trait]
impl Orchestrator for CombinedOrchestrator {
    async fn run(&self, request: TurnRequest, ctx: TurnContext) -> OrchestratorResult {
        CombinedOrchestrator::run(self, request, ctx).await
    }
}
