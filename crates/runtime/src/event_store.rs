//! Component A — the append-only event log. Hour-bucketed JSONL segments under a configured
//! directory, rotated by size and pruned by age. A single writer lock serializes appends the
//! way the teacher's journal serializes them with a `tokio::sync::Mutex`; readers never block
//! on it.

use crate::error::EventStoreError;
use crate::events::Event;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventStoreConfig {
    pub dir: PathBuf,
    pub segment_max_bytes: u64,
    pub retention_days: u32,
}

impl From<&crate::settings::EventStoreConfig> for EventStoreConfig {
    fn from(c: &crate::settings::EventStoreConfig) -> Self {
        Self {
            dir: PathBuf::from(&c.dir),
            segment_max_bytes: c.segment_max_bytes,
            retention_days: c.retention_days,
        }
    }
}

struct WriterState {
    current_path: Option<PathBuf>,
    current_bytes: u64,
}

/// Append-only JSONL event store. Cheap to clone (wraps an `Arc` internally via its fields).
pub struct EventStore {
    config: EventStoreConfig,
    writer: Mutex<WriterState>,
    /// Broadcast of every appended event, for `stream()`. Lagging receivers drop old events
    /// rather than blocking the writer — mirrors `StreamingJournal`'s non-blocking forward.
    tx: broadcast::Sender<Event>,
}

impl EventStore {
    pub fn new(config: EventStoreConfig) -> Self {
        let (tx, _rx) = broadcast::channel(1024);
        Self {
            config,
            writer: Mutex::new(WriterState {
                current_path: None,
                current_bytes: 0,
            }),
            tx,
        }
    }

    fn segment_path_for(&self, ts: DateTime<Utc>) -> PathBuf {
        self.config
            .dir
            .join(format!("ctx-{}.jsonl", ts.format("%Y%m%d-%H")))
    }

    /// Append an event, rotating the current segment first if it would exceed the size cap.
    /// `ts` ordering for events appended within one segment follows the order this function
    /// is called, matching SPEC_FULL §4.A's ordering guarantee.
    pub async fn append(&self, event: &Event) -> Result<(), EventStoreError> {
        fs::create_dir_all(&self.config.dir)
            .await
            .map_err(|source| EventStoreError::Io {
                path: self.config.dir.display().to_string(),
                source,
            })?;

        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let mut state = self.writer.lock().await;
        let target = self.segment_path_for(event.ts);

        let needs_rotate = state
            .current_path
            .as_ref()
            .map(|p| *p != target || state.current_bytes + line.len() as u64 > self.config.segment_max_bytes)
            .unwrap_or(false);

        let path = if needs_rotate {
            self.rotate_path(&target).await?
        } else {
            target
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| EventStoreError::Io {
                path: path.display().to_string(),
                source,
            })?;
        file.write_all(&line)
            .await
            .map_err(|source| EventStoreError::Io {
                path: path.display().to_string(),
                source,
            })?;

        let new_len = file
            .metadata()
            .await
            .map(|m| m.len())
            .unwrap_or(state.current_bytes + line.len() as u64);
        state.current_path = Some(path);
        state.current_bytes = new_len;
        drop(state);

        // Best-effort forward to live stream subscribers; never blocks, never fails the append.
        let _ = self.tx.send(event.clone());

        self.prune_old_segments().await;

        Ok(())
    }

    /// When the target hour-file already exceeds the cap, disambiguate with a numeric suffix.
    async fn rotate_path(&self, target: &Path) -> Result<PathBuf, EventStoreError> {
        if let Ok(meta) = fs::metadata(target).await {
            if meta.len() < self.config.segment_max_bytes {
                return Ok(target.to_path_buf());
            }
        } else {
            return Ok(target.to_path_buf());
        }

        let stem = target
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("ctx")
            .to_string();
        let ext = target.extension().and_then(|s| s.to_str()).unwrap_or("jsonl");
        for suffix in 1..=9999u32 {
            let candidate = target.with_file_name(format!("{stem}-{suffix}.{ext}"));
            match fs::metadata(&candidate).await {
                Ok(meta) if meta.len() >= self.config.segment_max_bytes => continue,
                _ => return Ok(candidate),
            }
        }
        Ok(target.to_path_buf())
    }

    async fn prune_old_segments(&self) {
        let cutoff = Utc::now() - ChronoDuration::days(self.config.retention_days as i64);
        let Ok(mut entries) = fs::read_dir(&self.config.dir).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(meta) = entry.metadata().await else { continue };
            let Ok(modified) = meta.modified() else { continue };
            let modified: DateTime<Utc> = modified.into();
            if modified < cutoff {
                let _ = fs::remove_file(entry.path()).await;
            }
        }
    }

    /// Returns the most recent `n` events matching `conv_id`/`acts`, newest first.
    pub async fn tail(
        &self,
        n: usize,
        conv_id: Option<Uuid>,
        acts: Option<&[String]>,
    ) -> Result<Vec<Event>, EventStoreError> {
        let mut segments = self.list_segments().await?;
        segments.sort();
        segments.reverse();

        let mut results: Vec<Event> = Vec::new();
        for path in segments {
            let events = self.read_segment(&path).await?;
            for event in events.into_iter().rev() {
                if let Some(cid) = conv_id {
                    if event.conv_id != cid {
                        continue;
                    }
                }
                if let Some(filters) = acts {
                    if !filters.iter().any(|a| a == &event.act) {
                        continue;
                    }
                }
                results.push(event);
                if results.len() >= n {
                    return Ok(results);
                }
            }
        }
        Ok(results)
    }

    /// Subscribe to events appended from this point forward. Matches `StreamingJournal`'s
    /// "durable write first, best-effort forward" ordering: callers should `tail` first to
    /// pick up history, then `subscribe` for the live tail, accepting the small window where
    /// an event could appear in both (consumers dedupe by `id`).
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    async fn list_segments(&self) -> Result<Vec<PathBuf>, EventStoreError> {
        let mut out = Vec::new();
        let Ok(mut entries) = fs::read_dir(&self.config.dir).await else {
            return Ok(out);
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
                out.push(path);
            }
        }
        Ok(out)
    }

    /// Reads one segment, silently dropping a trailing partial line (a line with no final
    /// newline, e.g. from a crash mid-write).
    async fn read_segment(&self, path: &Path) -> Result<Vec<Event>, EventStoreError> {
        let mut file = match File::open(path).await {
            Ok(f) => f,
            Err(_) => return Ok(Vec::new()),
        };
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .await
            .map_err(|source| EventStoreError::Io {
                path: path.display().to_string(),
                source,
            })?;

        let complete = if contents.ends_with('\n') {
            &contents[..]
        } else {
            match contents.rfind('\n') {
                Some(idx) => &contents[..idx + 1],
                None => "",
            }
        };

        let mut out = Vec::new();
        for line in complete.lines() {
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(event) = serde_json::from_str::<Event>(line) {
                out.push(event);
            }
        }
        Ok(out)
    }
}

pub type SharedEventStore = Arc<EventStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Actor;

    fn test_store(dir: &Path) -> EventStore {
        EventStore::new(EventStoreConfig {
            dir: dir.to_path_buf(),
            segment_max_bytes: 10 * 1024 * 1024,
            retention_days: 7,
        })
    }

    #[tokio::test]
    async fn append_then_tail_returns_newest_first() {
        let tmp = tempfile::tempdir().unwrap();
        let store = test_store(tmp.path());
        let conv = Uuid::new_v4();

        for i in 0..5 {
            let e = Event::new(Actor::System, "noop", conv, Uuid::new_v4()).with_iter(i);
            store.append(&e).await.unwrap();
        }

        let tail = store.tail(3, Some(conv), None).await.unwrap();
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[0].iter, Some(4));
        assert_eq!(tail[1].iter, Some(3));
        assert_eq!(tail[2].iter, Some(2));
    }

    #[tokio::test]
    async fn tail_filters_by_conv_id_and_act() {
        let tmp = tempfile::tempdir().unwrap();
        let store = test_store(tmp.path());
        let conv_a = Uuid::new_v4();
        let conv_b = Uuid::new_v4();

        store
            .append(&Event::new(Actor::Tool, "tool_execution_start", conv_a, Uuid::new_v4()))
            .await
            .unwrap();
        store
            .append(&Event::new(Actor::Tool, "tool_execution_finish", conv_a, Uuid::new_v4()))
            .await
            .unwrap();
        store
            .append(&Event::new(Actor::Tool, "tool_execution_start", conv_b, Uuid::new_v4()))
            .await
            .unwrap();

        let acts = vec!["tool_execution_start".to_string()];
        let tail = store.tail(10, Some(conv_a), Some(&acts)).await.unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].act, "tool_execution_start");
    }

    #[tokio::test]
    async fn rotates_segment_when_size_cap_exceeded() {
        let tmp = tempfile::tempdir().unwrap();
        let store = EventStore::new(EventStoreConfig {
            dir: tmp.path().to_path_buf(),
            segment_max_bytes: 200,
            retention_days: 7,
        });
        let conv = Uuid::new_v4();
        for _ in 0..20 {
            let e = Event::new(Actor::System, "noop", conv, Uuid::new_v4());
            store.append(&e).await.unwrap();
        }
        let segments = store.list_segments().await.unwrap();
        assert!(segments.len() > 1, "expected rotation to produce >1 segment");
    }

    #[tokio::test]
    async fn subscribe_receives_newly_appended_events() {
        let tmp = tempfile::tempdir().unwrap();
        let store = test_store(tmp.path());
        let mut rx = store.subscribe();
        let conv = Uuid::new_v4();
        let e = Event::new(Actor::User, "chat_message", conv, Uuid::new_v4());
        store.append(&e).await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.id, e.id);
    }

    #[tokio::test]
    async fn read_segment_ignores_partial_trailing_line() {
        let tmp = tempfile::tempdir().unwrap();
        let store = test_store(tmp.path());
        let conv = Uuid::new_v4();
        let e = Event::new(Actor::System, "noop", conv, Uuid::new_v4());
        store.append(&e).await.unwrap();

        let segments = store.list_segments().await.unwrap();
        let path = &segments[0];
        let mut file = OpenOptions::new().append(true).open(path).await.unwrap();
        file.write_all(b"{\"incomplete\":").await.unwrap();

        let events = store.read_segment(path).await.unwrap();
        assert_eq!(events.len(), 1);
    }
}
