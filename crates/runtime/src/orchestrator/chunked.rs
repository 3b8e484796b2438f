//! Component J — plans an outline, writes labeled chunks sequentially, merges. Manifests are
//! ordered vectors keyed by dense integer indices (SPEC_FULL §9's "arenas + indices over weak
//! references"), generalizing the teacher's ordered-`Vec`-of-records journal shape
//! (`reasoning/loop_types.rs`) to a chunk manifest instead of a loop-event log.

use crate::event_store::EventStore;
use crate::events::{Actor, Chunk, ChunkManifest, Event, OrchestratorResult, StopReason};
use crate::orchestrator::{Orchestrator, TurnContext, TurnRequest};
use crate::upstream::{CompletionRequest, Message, UpstreamClient};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct ChunkedConfig {
    pub max_chunks: usize,
    pub tokens_per_chunk: u32,
    pub outline_parse_retries: u32,
    /// Once the running transcript exceeds this many characters, later chunk prompts receive
    /// summaries of earlier chunks instead of their full text.
    pub summarize_after_chars: usize,
}

impl Default for ChunkedConfig {
    fn default() -> Self {
        Self {
            max_chunks: 5,
            tokens_per_chunk: 1024,
            outline_parse_retries: 2,
            summarize_after_chars: 6000,
        }
    }
}

pub struct ChunkedOrchestrator {
    upstream: Arc<UpstreamClient>,
    event_store: Arc<EventStore>,
    config: ChunkedConfig,
}

impl ChunkedOrchestrator {
    pub fn new(upstream: Arc<UpstreamClient>, event_store: Arc<EventStore>, config: ChunkedConfig) -> Self {
        Self {
            upstream,
            event_store,
            config,
        }
    }

    pub async fn run(&self, request: TurnRequest, ctx: TurnContext) -> OrchestratorResult {
        let user_text = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .and_then(|m| m.content.clone())
            .unwrap_or_default();

        let outline = match self.outline_phase(&request, &user_text).await {
            Ok(outline) => outline,
            Err(message) => {
                return OrchestratorResult {
                    content: String::new(),
                    reasoning: None,
                    stop_reason: StopReason::Error,
                    debug: json!({"mode": "chunked", "error": message}),
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
                self.emit_aborted(&request, index).await;
                return self.partial_result(manifest, &request, StopReason::Cancelled, None);
            }

            match self.write_chunk(&request, &user_text, &manifest, index, label).await {
                Ok(chunk) => manifest.chunks.push(chunk),
                Err(_first_err) => match self.write_chunk(&request, &user_text, &manifest, index, label).await {
                    Ok(chunk) => manifest.chunks.push(chunk),
                    Err(second_err) => {
                        return self.partial_result(manifest, &request, StopReason::Error, Some((index, second_err)));
                    }
                },
            }
        }

        let content = manifest.merged();
        OrchestratorResult {
            content,
            reasoning: None,
            stop_reason: StopReason::Stop,
            debug: json!({"mode": "chunked", "chunked": manifest}),
            conv_id: request.conv_id,
            trace_id: request.trace_id,
        }
    }

    pub(crate) async fn outline_phase(&self, request: &TurnRequest, user_text: &str) -> Result<Vec<String>, String> {
        let started = Instant::now();
        let prompt = format!(
            "Produce an outline of between 1 and {} section labels for a long-form answer to: \
             {user_text}\n\nRespond as a numbered list, one label per line.",
            self.config.max_chunks
        );

        let mut attempts = 0;
        loop {
            let completion_request = CompletionRequest {
                messages: vec![Message::user(prompt.clone())],
                tools: vec![],
                max_tokens: 256,
                temperature: 0.3,
                model: None,
            };
            let response = self
                .upstream
                .complete(&completion_request)
                .await
                .map_err(|e| e.to_string())?;

            if let Some(outline) = parse_outline(&response.content, self.config.max_chunks) {
                let event = Event::new(Actor::System, "chunk_outline", request.conv_id, request.trace_id)
                    .with_payload("outline", &outline)
                    .with_payload("chunk_count", outline.len())
                    .with_elapsed_ms(started.elapsed().as_millis() as u64);
                let _ = self.event_store.append(&event).await;
                return Ok(outline);
            }

            attempts += 1;
            if attempts > self.config.outline_parse_retries {
                return Err("failed to parse an outline after retrying".to_string());
            }
        }
    }

    pub(crate) async fn write_chunk(
        &self,
        request: &TurnRequest,
        user_text: &str,
        manifest: &ChunkManifest,
        index: usize,
        label: &str,
    ) -> Result<Chunk, String> {
        let started = Instant::now();
        let prompt = self.chunk_prompt(user_text, manifest, label);

        let completion_request = CompletionRequest {
            messages: vec![Message::user(prompt)],
            tools: vec![],
            max_tokens: self.config.tokens_per_chunk,
            temperature: 0.7,
            model: None,
        };
        let response = self
            .upstream
            .complete(&completion_request)
            .await
            .map_err(|e| e.to_string())?;

        let reasoning_tokens = response.reasoning.as_ref().map(|r| estimate_tokens(r));
        let content_tokens = Some(estimate_tokens(&response.content));

        let event = Event::new(Actor::System, "chunk_write", request.conv_id, request.trace_id)
            .with_payload("chunk_index", index)
            .with_payload("chunk_label", label)
            .with_payload("reasoning_tokens", reasoning_tokens.unwrap_or(0))
            .with_payload("content_tokens", content_tokens.unwrap_or(0))
            .with_elapsed_ms(started.elapsed().as_millis() as u64);
        let _ = self.event_store.append(&event).await;

        Ok(Chunk {
            index,
            label: label.to_string(),
            content: response.content,
            reasoning_tokens,
            content_tokens,
        })
    }

    pub(crate) fn chunk_prompt(&self, user_text: &str, manifest: &ChunkManifest, label: &str) -> String {
        let outline_text = manifest.outline.join(", ");
        let written: String = manifest
            .chunks
            .iter()
            .map(|c| format!("## {}\n{}", c.label, c.content))
            .collect::<Vec<_>>()
            .join("\n\n");

        let written_section = if written.len() > self.config.summarize_after_chars {
            format!(
                "Previously written sections (summarized — {} chars total):\n{}",
                written.len(),
                summarize(&written, self.config.summarize_after_chars)
            )
        } else if written.is_empty() {
            String::new()
        } else {
            format!("Previously written sections:\n{written}")
        };

        format!(
            "User request: {user_text}\n\nFull outline: {outline_text}\n\n{written_section}\n\n\
             Write the section labeled \"{label}\" now. Do not repeat other sections."
        )
    }

    pub(crate) fn partial_result(
        &self,
        manifest: ChunkManifest,
        request: &TurnRequest,
        stop_reason: StopReason,
        failed: Option<(usize, String)>,
    ) -> OrchestratorResult {
        let content = manifest.merged();
        let mut debug = json!({"mode": "chunked", "chunked": manifest});
        if let Some((index, message)) = failed {
            debug["failed_index"] = json!(index);
            debug["error"] = json!(message);
        }
        OrchestratorResult {
            content,
            reasoning: None,
            stop_reason,
            debug,
            conv_id: request.conv_id,
            trace_id: request.trace_id,
        }
    }

    pub(crate) async fn emit_aborted(&self, request: &TurnRequest, index: usize) {
        let event = Event::new(Actor::System, "turn_aborted", request.conv_id, request.trace_id)
            .with_payload("phase", "chunked")
            .with_payload("chunk_index", index);
        let _ = self.event_store.append(&event).await;
    }
}

fn estimate_tokens(text: &str) -> u32 {
    (text.split_whitespace().count() as u32).max(if text.is_empty() { 0 } else { 1 })
}

fn summarize(text: &str, max_chars: usize) -> String {
    let truncated: String = text.chars().take(max_chars / 2).collect();
    format!("{truncated}...")
}

/// Tolerant outline parsing: numbered lists (`1. Foo`), bulleted lists (`- Foo`, `* Foo`), or a
/// JSON array of strings. Returns `None` when nothing usable is found, so the caller can retry.
fn parse_outline(text: &str, max_chunks: usize) -> Option<Vec<String>> {
    if let Ok(serde_json::Value::Array(items)) = serde_json::from_str::<serde_json::Value>(text.trim()) {
        let labels: Vec<String> = items.into_iter().filter_map(|v| v.as_str().map(str::to_string)).collect();
        if !labels.is_empty() {
            return Some(truncate_outline(labels, max_chunks));
        }
    }

    let mut labels = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let stripped = strip_list_marker(trimmed);
        if let Some(label) = stripped {
            if !label.is_empty() {
                labels.push(label.to_string());
            }
        }
    }

    if labels.is_empty() {
        None
    } else {
        Some(truncate_outline(labels, max_chunks))
    }
}

fn truncate_outline(labels: Vec<String>, max_chunks: usize) -> Vec<String> {
    labels.into_iter().take(max_chunks.max(1)).collect()
}

fn strip_list_marker(line: &str) -> Option<&str> {
    let line = line.trim_start_matches(['-', '*', '•']).trim();
    if let Some(dot_idx) = line.find('.') {
        let (prefix, rest) = line.split_at(dot_idx);
        if prefix.chars().all(|c| c.is_ascii_digit()) && !prefix.is_empty() {
            return Some(rest.trim_start_matches('.').trim());
        }
    }
    if line.is_empty() {
        None
    } else {
        Some(line)
    }
}

#[async_trait::async_trait]
impl Orchestrator for ChunkedOrchestrator {
    async fn run(&self, request: TurnRequest, ctx: TurnContext) -> OrchestratorResult {
        ChunkedOrchestrator::run(self, request, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numbered_list() {
        let text = "1. Overview\n2. Steps\n3. Pitfalls";
        let outline = parse_outline(text, 5).unwrap();
        assert_eq!(outline, vec!["Overview", "Steps", "Pitfalls"]);
    }

    #[test]
    fn parses_bulleted_list() {
        let text = "- Overview\n- Steps\n- Pitfalls";
        let outline = parse_outline(text, 5).unwrap();
        assert_eq!(outline, vec!["Overview", "Steps", "Pitfalls"]);
    }

    #[test]
    fn parses_json_array() {
        let text = r#"["Overview", "Steps", "Pitfalls"]"#;
        let outline = parse_outline(text, 5).unwrap();
        assert_eq!(outline, vec!["Overview", "Steps", "Pitfalls"]);
    }

    #[test]
    fn truncates_to_max_chunks() {
        let text = "1. A\n2. B\n3. C\n4. D\n5. E\n6. F";
        let outline = parse_outline(text, 3).unwrap();
        assert_eq!(outline.len(), 3);
    }

    #[test]
    fn empty_text_fails_to_parse() {
        assert!(parse_outline("", 5).is_none());
    }

    #[test]
    fn manifest_merge_includes_all_labels_in_order() {
        let manifest = ChunkManifest {
            outline: vec!["A".to_string(), "B".to_string()],
            chunks: vec![
                Chunk { index: 0, label: "A".to_string(), content: "first".to_string(), reasoning_tokens: None, content_tokens: None },
                Chunk { index: 1, label: "B".to_string(), content: "second".to_string(), reasoning_tokens: None, content_tokens: None },
            ],
        };
        let merged = manifest.merged();
        assert!(merged.find("## A").unwrap() < merged.find("## B").unwrap());
        assert!(manifest.is_complete());
    }
}
