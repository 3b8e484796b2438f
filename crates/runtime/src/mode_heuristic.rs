//! Component L — classifies free-form user input into an orchestrator mode before a turn
//! starts. Grounded on `routing/confidence.rs`'s signal-to-score evaluation shape and
//! `routing/engine.rs`'s precedence rule that an explicit caller choice always wins over the
//! heuristic, carried over unchanged to mode selection.

use crate::event_store::EventStore;
use crate::events::{Actor, Event};
use crate::settings::OrchestratorConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Standard,
    Review,
    Chunked,
    Combined,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModeDecision {
    pub mode: Mode,
    pub confidence: f64,
    pub chunked_score: f64,
    pub review_score: f64,
}

const CHUNKED_SIGNALS: &[&str] = &[
    "step by step",
    "step-by-step",
    "in detail",
    "comprehensive",
    "guide",
    "walkthrough",
    "thoroughly",
    "all the details",
];

const REVIEW_SIGNALS: &[&str] = &["verify", "production", "correctness", "critical", "double-check", "audit"];

const LONG_TEXT_CHARS: usize = 400;

pub struct ModeHeuristic {
    event_store: Arc<EventStore>,
    config: OrchestratorConfig,
}

impl ModeHeuristic {
    pub fn new(event_store: Arc<EventStore>, config: OrchestratorConfig) -> Self {
        Self { event_store, config }
    }

    pub fn classify(&self, user_text: &str) -> ModeDecision {
        let lower = user_text.to_lowercase();

        let mut chunked_score = signal_fraction(&lower, CHUNKED_SIGNALS);
        if lower.len() > LONG_TEXT_CHARS {
            chunked_score += 0.2;
        }
        if lower.matches(" and ").count() >= 2 {
            chunked_score += 0.1;
        }
        chunked_score = chunked_score.min(1.0);

        let review_score = signal_fraction(&lower, REVIEW_SIGNALS).min(1.0);

        let wants_chunked = chunked_score >= self.config.chunked_threshold;
        let wants_review = review_score >= self.config.review_threshold_signal;

        let mode = match (wants_chunked, wants_review) {
            (true, true) => Mode::Combined,
            (true, false) => Mode::Chunked,
            (false, true) => Mode::Review,
            (false, false) => Mode::Standard,
        };
        let confidence = chunked_score.max(review_score);

        ModeDecision {
            mode,
            confidence,
            chunked_score,
            review_score,
        }
    }

    /// Classifies and emits a `mode_decision` event. A caller-supplied `override_mode` wins
    /// unconditionally — the heuristic is never allowed to override an explicit choice.
    pub async fn decide(
        &self,
        user_text: &str,
        conv_id: Uuid,
        trace_id: Uuid,
        override_mode: Option<Mode>,
    ) -> Mode {
        let decision = self.classify(user_text);
        let resolved = override_mode.unwrap_or(decision.mode);

        let event = Event::new(Actor::System, "mode_decision", conv_id, trace_id)
            .with_payload("heuristic_mode", decision.mode)
            .with_payload("resolved_mode", resolved)
            .with_payload("confidence", decision.confidence)
            .with_payload("chunked_score", decision.chunked_score)
            .with_payload("review_score", decision.review_score)
            .with_payload("overridden", override_mode.is_some());
        let _ = self.event_store.append(&event).await;

        resolved
    }
}

fn signal_fraction(lower_text: &str, signals: &[&str]) -> f64 {
    let hits = signals.iter().filter(|s| lower_text.contains(*s)).count();
    if signals.is_empty() {
        0.0
    } else {
        (hits as f64 / 2.0).min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heuristic() -> ModeHeuristic {
        let tmp = tempfile::tempdir().unwrap();
        let event_store = Arc::new(EventStore::new(crate::event_store::EventStoreConfig {
            dir: tmp.path().to_path_buf(),
            segment_max_bytes: 1024 * 1024,
            retention_days: 7,
        }));
        ModeHeuristic::new(event_store, OrchestratorConfig::default())
    }

    #[test]
    fn plain_request_is_standard() {
        let decision = heuristic().classify("what's the capital of France?");
        assert_eq!(decision.mode, Mode::Standard);
    }

    #[test]
    fn comprehensive_guide_request_prefers_chunked() {
        let decision = heuristic().classify(
            "Write me a comprehensive step by step guide, in detail, covering every aspect thoroughly",
        );
        assert_eq!(decision.mode, Mode::Chunked);
    }

    #[test]
    fn verification_request_prefers_review() {
        let decision = heuristic().classify("please verify this is correct for a production, critical deployment");
        assert_eq!(decision.mode, Mode::Review);
    }

    #[test]
    fn both_signal_sets_trigger_combined() {
        let decision = heuristic().classify(
            "Write a comprehensive step by step guide, in detail, and verify it is correct and production \
             ready and critical",
        );
        assert_eq!(decision.mode, Mode::Combined);
    }

    #[tokio::test]
    async fn explicit_override_always_wins() {
        let h = heuristic();
        let resolved = h
            .decide("write a comprehensive step by step guide", Uuid::new_v4(), Uuid::new_v4(), Some(Mode::Standard))
            .await;
        assert_eq!(resolved, Mode::Standard);
    }
}
