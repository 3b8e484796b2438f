//! Component M — a query-only consumer of the event log that turns a recent burst of
//! `auto_continue` events into a short hint appended to the system prompt. Styled after the
//! teacher's `metrics/` modules, which scan a rolling window of samples and compute fractions
//! for dashboards; here the "dashboard" is a single steering string.

use crate::event_store::EventStore;
use crate::events::{Actor, Event, IncompleteReason};
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct TelemetryHintConfig {
    pub window: Duration,
    pub min_samples: usize,
    pub trigger_fraction: f64,
    pub sample_size: usize,
}

impl Default for TelemetryHintConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(600),
            min_samples: 5,
            trigger_fraction: 0.15,
            sample_size: 200,
        }
    }
}

pub struct TelemetryHintInjector {
    event_store: Arc<EventStore>,
    config: TelemetryHintConfig,
}

impl TelemetryHintInjector {
    pub fn new(event_store: Arc<EventStore>, config: TelemetryHintConfig) -> Self {
        Self { event_store, config }
    }

    /// Computes the current hint, emitting a `mip_applied` event when one fires. Returns an
    /// empty string when the window holds too few samples or the fraction is under threshold.
    pub async fn hint(&self, conv_id: Uuid, trace_id: Uuid) -> String {
        let acts = vec!["auto_continue".to_string(), "turn_completed".to_string()];
        let events = match self.event_store.tail(self.config.sample_size, None, Some(&acts)).await {
            Ok(events) => events,
            Err(_) => return String::new(),
        };

        let cutoff = Utc::now() - ChronoDuration::from_std(self.config.window).unwrap_or(ChronoDuration::seconds(600));
        let windowed: Vec<&Event> = events.iter().filter(|e| e.ts >= cutoff).collect();

        if windowed.len() < self.config.min_samples {
            return String::new();
        }

        let auto_continues: Vec<&Event> = windowed.iter().filter(|e| e.act == "auto_continue").copied().collect();
        let fraction = auto_continues.len() as f64 / windowed.len() as f64;

        if fraction < self.config.trigger_fraction {
            return String::new();
        }

        let reason = dominant_reason(&auto_continues);
        let hint = hint_text(reason);

        let event = Event::new(Actor::System, "mip_applied", conv_id, trace_id)
            .with_payload("reason", reason)
            .with_payload("fraction", fraction)
            .with_payload("sample_size", windowed.len())
            .with_payload("hint", &hint);
        let _ = self.event_store.append(&event).await;

        hint
    }
}

fn dominant_reason(events: &[&Event]) -> Option<IncompleteReason> {
    use std::collections::HashMap;
    let mut counts: HashMap<String, usize> = HashMap::new();
    for event in events {
        if let Some(reason) = event.payload.get("reason").and_then(|v| v.as_str()) {
            *counts.entry(reason.to_string()).or_insert(0) += 1;
        }
    }
    let best = counts.into_iter().max_by_key(|(_, count)| *count).map(|(k, _)| k)?;
    match best.as_str() {
        "fence" => Some(IncompleteReason::Fence),
        "punct" => Some(IncompleteReason::Punct),
        "short" => Some(IncompleteReason::Short),
        "length" => Some(IncompleteReason::Length),
        "stop" => Some(IncompleteReason::Stop),
        _ => None,
    }
}

fn hint_text(reason: Option<IncompleteReason>) -> String {
    match reason {
        Some(IncompleteReason::Fence) => "Close any open code fences before ending your response.".to_string(),
        Some(IncompleteReason::Punct) => "End each response on a complete sentence with terminal punctuation.".to_string(),
        Some(IncompleteReason::Short) => "Make sure your response fully answers the request before stopping.".to_string(),
        Some(IncompleteReason::Length) => "Keep your response concise enough to finish within the token budget.".to_string(),
        Some(IncompleteReason::Stop) | None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::EventStoreConfig;

    fn store() -> Arc<EventStore> {
        let tmp = tempfile::tempdir().unwrap();
        Arc::new(EventStore::new(EventStoreConfig {
            dir: tmp.path().to_path_buf(),
            segment_max_bytes: 1024 * 1024,
            retention_days: 7,
        }))
    }

    #[tokio::test]
    async fn below_min_samples_returns_empty_hint() {
        let injector = TelemetryHintInjector::new(store(), TelemetryHintConfig::default());
        let hint = injector.hint(Uuid::new_v4(), Uuid::new_v4()).await;
        assert!(hint.is_empty());
    }

    #[tokio::test]
    async fn fence_dominant_reason_produces_fence_hint() {
        let event_store = store();
        let conv_id = Uuid::new_v4();
        for _ in 0..6 {
            let event = Event::new(Actor::System, "auto_continue", conv_id, Uuid::new_v4())
                .with_payload("attempt", 1)
                .with_payload("reason", "fence");
            event_store.append(&event).await.unwrap();
        }
        let injector = TelemetryHintInjector::new(
            event_store,
            TelemetryHintConfig {
                min_samples: 3,
                trigger_fraction: 0.1,
                ..Default::default()
            },
        );
        let hint = injector.hint(conv_id, Uuid::new_v4()).await;
        assert!(hint.contains("code fences"));
    }

    #[tokio::test]
    async fn low_fraction_below_threshold_returns_empty() {
        let event_store = store();
        let conv_id = Uuid::new_v4();
        let event = Event::new(Actor::System, "auto_continue", conv_id, Uuid::new_v4()).with_payload("reason", "fence");
        event_store.append(&event).await.unwrap();
        for _ in 0..10 {
            let event = Event::new(Actor::System, "turn_completed", conv_id, Uuid::new_v4());
            event_store.append(&event).await.unwrap();
        }
        let injector = TelemetryHintInjector::new(
            event_store,
            TelemetryHintConfig {
                min_samples: 3,
                trigger_fraction: 0.5,
                ..Default::default()
            },
        );
        let hint = injector.hint(conv_id, Uuid::new_v4()).await;
        assert!(hint.is_empty());
    }
}
