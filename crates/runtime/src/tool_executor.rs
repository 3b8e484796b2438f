//! Component E — the tool executor. Sequences rate limiting, validation, redaction, and event
//! emission around a bounded, cancellable call into a tool body, mirroring the teacher's
//! `ActionExecutor` (`reasoning/executor.rs`): a `tokio::time::timeout` wrapped call per
//! action, with start/finish/error bracketing events.

use crate::error::ToolExecutionError;
use crate::event_store::EventStore;
use crate::events::{Actor, Event, EventStatus};
use crate::rate_limiter::{self, RateLimiter};
use crate::redactor::{self, RedactorConfig};
use crate::registry::{validate, ToolRegistry, ValidationOutcome};
use crate::settings::{ExecutionConfig, RateLimitScope};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// A single executable tool. Implementations own their side effects; the executor only
/// bounds and observes them.
#[async_trait]
pub trait ToolBody: Send + Sync {
    async fn call(&self, args: Value) -> Result<Value, String>;
}

#[derive(Debug, Clone, Copy)]
pub struct ExecutionContext {
    pub conv_id: Uuid,
    pub trace_id: Uuid,
    pub iter: Option<u32>,
}

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    bodies: std::collections::HashMap<String, Arc<dyn ToolBody>>,
    rate_limiter: Arc<RateLimiter>,
    event_store: Arc<EventStore>,
    execution: ExecutionConfig,
    redactor_config: RedactorConfig,
    rate_limit_scope: RateLimitScope,
    max_preview_bytes: usize,
}

impl ToolExecutor {
    pub fn new(
        registry: Arc<ToolRegistry>,
        bodies: std::collections::HashMap<String, Arc<dyn ToolBody>>,
        rate_limiter: Arc<RateLimiter>,
        event_store: Arc<EventStore>,
        execution: ExecutionConfig,
        redactor_config: RedactorConfig,
        rate_limit_scope: RateLimitScope,
        max_preview_bytes: usize,
    ) -> Self {
        Self {
            registry,
            bodies,
            rate_limiter,
            event_store,
            execution,
            redactor_config,
            rate_limit_scope,
            max_preview_bytes,
        }
    }

    pub async fn run_tool(
        &self,
        name: &str,
        args: Value,
        ctx: ExecutionContext,
    ) -> Result<Value, ToolExecutionError> {
        let key = rate_limiter::scope_key(
            self.rate_limit_scope,
            Some(ctx.conv_id.to_string().as_str()),
            None,
        );
        if let Err(rejection) = self.rate_limiter.try_acquire(&key).await {
            self.emit_rate_limited(name, ctx, rejection.retry_after_secs).await;
            return Err(ToolExecutionError::RateLimited {
                retry_after_secs: rejection.retry_after_secs,
            });
        }

        match validate(&self.registry, name, &args) {
            ValidationOutcome::Unknown => {
                self.emit_error(name, ctx, "unknown tool").await;
                return Err(ToolExecutionError::ToolUnknown {
                    name: name.to_string(),
                });
            }
            ValidationOutcome::Gated { allowlist } => {
                self.emit_error(name, ctx, "gated").await;
                return Err(ToolExecutionError::ToolGated {
                    name: name.to_string(),
                    allowlist,
                });
            }
            ValidationOutcome::Invalid { violations } => {
                self.emit_error(name, ctx, "validation failed").await;
                return Err(ToolExecutionError::ValidationError { violations });
            }
            ValidationOutcome::Ok => {}
        }

        let args_preview = redactor::redact_for_logging(&args, &self.redactor_config, self.max_preview_bytes);
        let mut start_event = Event::new(Actor::Tool, "tool_execution_start", ctx.conv_id, ctx.trace_id)
            .with_name(name)
            .with_payload("args_preview", &args_preview);
        if let Some(iter) = ctx.iter {
            start_event = start_event.with_iter(iter);
        }
        let _ = self.event_store.append(&start_event).await;

        let Some(body) = self.bodies.get(name).cloned() else {
            self.emit_error(name, ctx, "no implementation registered").await;
            return Err(ToolExecutionError::ExecutionError {
                name: name.to_string(),
                message: "no implementation registered".to_string(),
            });
        };

        let started = Instant::now();
        let timeout = self.execution.tool_timeout;
        let result = tokio::time::timeout(timeout, body.call(args)).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Err(_) => {
                self.finish_error(name, ctx, elapsed_ms, "timed out").await;
                Err(ToolExecutionError::Timeout {
                    name: name.to_string(),
                    elapsed: Duration::from_millis(elapsed_ms),
                })
            }
            Ok(Err(message)) => {
                self.finish_error(name, ctx, elapsed_ms, &message).await;
                Err(ToolExecutionError::ExecutionError {
                    name: name.to_string(),
                    message,
                })
            }
            Ok(Ok(value)) => {
                let serialized = serde_json::to_vec(&value).unwrap_or_default();
                if serialized.len() > self.execution.tool_max_output_bytes {
                    self.finish_error(name, ctx, elapsed_ms, "output too large").await;
                    return Err(ToolExecutionError::OutputTooLarge {
                        name: name.to_string(),
                        max_bytes: self.execution.tool_max_output_bytes,
                    });
                }

                let result_preview =
                    redactor::redact_for_logging(&value, &self.redactor_config, self.max_preview_bytes);
                let mut finish = Event::new(Actor::Tool, "tool_execution_finish", ctx.conv_id, ctx.trace_id)
                    .with_name(name)
                    .with_status(EventStatus::Ok)
                    .with_elapsed_ms(elapsed_ms)
                    .with_payload("result_preview", &result_preview);
                if let Some(iter) = ctx.iter {
                    finish = finish.with_iter(iter);
                }
                let _ = self.event_store.append(&finish).await;
                Ok(value)
            }
        }
    }

    async fn emit_rate_limited(&self, name: &str, ctx: ExecutionContext, retry_after_secs: u64) {
        let mut event = Event::new(Actor::Tool, "rate_limited", ctx.conv_id, ctx.trace_id)
            .with_name(name)
            .with_status(EventStatus::Error)
            .with_payload("retry_after_secs", retry_after_secs);
        if let Some(iter) = ctx.iter {
            event = event.with_iter(iter);
        }
        let _ = self.event_store.append(&event).await;
    }

    async fn emit_error(&self, name: &str, ctx: ExecutionContext, message: &str) {
        let mut event = Event::new(Actor::Tool, "tool_execution_error", ctx.conv_id, ctx.trace_id)
            .with_name(name)
            .with_status(EventStatus::Error)
            .with_payload("error", message);
        if let Some(iter) = ctx.iter {
            event = event.with_iter(iter);
        }
        let _ = self.event_store.append(&event).await;
    }

    async fn finish_error(&self, name: &str, ctx: ExecutionContext, elapsed_ms: u64, message: &str) {
        let mut event = Event::new(Actor::Tool, "tool_execution_error", ctx.conv_id, ctx.trace_id)
            .with_name(name)
            .with_status(EventStatus::Error)
            .with_elapsed_ms(elapsed_ms)
            .with_payload("error", message);
        if let Some(iter) = ctx.iter {
            event = event.with_iter(iter);
        }
        let _ = self.event_store.append(&event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::EventStoreConfig;
    use crate::events::{ParamSchema, ParamType, ToolDescriptor};
    use crate::settings::RateLimitConfig;
    use std::collections::HashMap;

    struct Echo;

    #[async_trait]
    impl ToolBody for Echo {
        async fn call(&self, args: Value) -> Result<Value, String> {
            Ok(args)
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl ToolBody for AlwaysFails {
        async fn call(&self, _args: Value) -> Result<Value, String> {
            Err("boom".to_string())
        }
    }

    struct Hangs;

    #[async_trait]
    impl ToolBody for Hangs {
        async fn call(&self, _args: Value) -> Result<Value, String> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(Value::Null)
        }
    }

    fn build_executor(
        descriptors: Vec<ToolDescriptor>,
        allowlist: Option<Vec<String>>,
        bodies: HashMap<String, Arc<dyn ToolBody>>,
        tmp: &std::path::Path,
    ) -> ToolExecutor {
        let registry = Arc::new(ToolRegistry::new(descriptors, allowlist));
        let rate_limiter = Arc::new(RateLimiter::new(RateLimitConfig {
            enabled: true,
            capacity: 100.0,
            refill_per_second: 10.0,
            cost_per_request: 1.0,
            scope: RateLimitScope::Process,
        }));
        let event_store = Arc::new(EventStore::new(EventStoreConfig {
            dir: tmp.to_path_buf(),
            segment_max_bytes: 10 * 1024 * 1024,
            retention_days: 7,
        }));
        let mut execution = ExecutionConfig::default();
        execution.tool_timeout = Duration::from_millis(100);
        ToolExecutor::new(
            registry,
            bodies,
            rate_limiter,
            event_store,
            execution,
            RedactorConfig::default(),
            RateLimitScope::Process,
            4096,
        )
    }

    fn echo_descriptor() -> ToolDescriptor {
        ToolDescriptor {
            name: "echo".to_string(),
            description: "echo".to_string(),
            params: vec![ParamSchema {
                name: "text".to_string(),
                param_type: ParamType::String,
                required: true,
                max_length: None,
                max_items: None,
                min: None,
                max: None,
                enum_values: None,
                items: None,
            }],
            allow_extra_args: false,
            safety_class: None,
        }
    }

    #[tokio::test]
    async fn gated_tool_writes_exactly_one_error_event_and_no_side_effect() {
        let tmp = tempfile::tempdir().unwrap();
        let mut bodies: HashMap<String, Arc<dyn ToolBody>> = HashMap::new();
        bodies.insert("write_file".to_string(), Arc::new(Echo));
        let write_descriptor = ToolDescriptor {
            name: "write_file".to_string(),
            description: "writes a file".to_string(),
            params: vec![],
            allow_extra_args: false,
            safety_class: None,
        };
        let executor = build_executor(
            vec![echo_descriptor(), write_descriptor],
            Some(vec!["echo".to_string()]),
            bodies,
            tmp.path(),
        );
        let ctx = ExecutionContext {
            conv_id: Uuid::new_v4(),
            trace_id: Uuid::new_v4(),
            iter: None,
        };
        let err = executor
            .run_tool("write_file", serde_json::json!({}), ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolExecutionError::ToolGated { .. }));

        let events = executor.event_store.tail(10, Some(ctx.conv_id), None).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].act, "tool_execution_error");
    }

    #[tokio::test]
    async fn successful_call_brackets_start_and_finish_events() {
        let tmp = tempfile::tempdir().unwrap();
        let mut bodies: HashMap<String, Arc<dyn ToolBody>> = HashMap::new();
        bodies.insert("echo".to_string(), Arc::new(Echo));
        let executor = build_executor(vec![echo_descriptor()], None, bodies, tmp.path());
        let ctx = ExecutionContext {
            conv_id: Uuid::new_v4(),
            trace_id: Uuid::new_v4(),
            iter: Some(0),
        };
        let result = executor
            .run_tool("echo", serde_json::json!({"text": "hi"}), ctx)
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!({"text": "hi"}));

        let events = executor.event_store.tail(10, Some(ctx.conv_id), None).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].act, "tool_execution_finish");
        assert_eq!(events[1].act, "tool_execution_start");
    }

    #[tokio::test]
    async fn timeout_is_surfaced_as_timeout_error() {
        let tmp = tempfile::tempdir().unwrap();
        let descriptor = ToolDescriptor {
            name: "hangs".to_string(),
            description: "never returns".to_string(),
            params: vec![],
            allow_extra_args: false,
            safety_class: None,
        };
        let mut bodies: HashMap<String, Arc<dyn ToolBody>> = HashMap::new();
        bodies.insert("hangs".to_string(), Arc::new(Hangs));
        let executor = build_executor(vec![descriptor], None, bodies, tmp.path());
        let ctx = ExecutionContext {
            conv_id: Uuid::new_v4(),
            trace_id: Uuid::new_v4(),
            iter: None,
        };
        let err = executor
            .run_tool("hangs", serde_json::json!({}), ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolExecutionError::Timeout { .. }));
    }

    #[tokio::test]
    async fn execution_failure_is_surfaced_as_execution_error() {
        let tmp = tempfile::tempdir().unwrap();
        let descriptor = ToolDescriptor {
            name: "fails".to_string(),
            description: "always fails".to_string(),
            params: vec![],
            allow_extra_args: false,
            safety_class: None,
        };
        let mut bodies: HashMap<String, Arc<dyn ToolBody>> = HashMap::new();
        bodies.insert("fails".to_string(), Arc::new(AlwaysFails));
        let executor = build_executor(vec![descriptor], None, bodies, tmp.path());
        let ctx = ExecutionContext {
            conv_id: Uuid::new_v4(),
            trace_id: Uuid::new_v4(),
            iter: None,
        };
        let err = executor
            .run_tool("fails", serde_json::json!({}), ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolExecutionError::ExecutionError { .. }));
    }

    #[tokio::test]
    async fn configured_preview_limit_truncates_event_payloads() {
        let tmp = tempfile::tempdir().unwrap();
        let mut bodies: HashMap<String, Arc<dyn ToolBody>> = HashMap::new();
        bodies.insert("echo".to_string(), Arc::new(Echo));
        let registry = Arc::new(ToolRegistry::new(vec![echo_descriptor()], None));
        let rate_limiter = Arc::new(RateLimiter::new(RateLimitConfig {
            enabled: true,
            capacity: 100.0,
            refill_per_second: 10.0,
            cost_per_request: 1.0,
            scope: RateLimitScope::Process,
        }));
        let event_store = Arc::new(EventStore::new(EventStoreConfig {
            dir: tmp.path().to_path_buf(),
            segment_max_bytes: 10 * 1024 * 1024,
            retention_days: 7,
        }));
        let executor = ToolExecutor::new(
            registry,
            bodies,
            rate_limiter,
            event_store,
            ExecutionConfig::default(),
            RedactorConfig::default(),
            RateLimitScope::Process,
            8,
        );
        let ctx = ExecutionContext {
            conv_id: Uuid::new_v4(),
            trace_id: Uuid::new_v4(),
            iter: None,
        };
        executor
            .run_tool("echo", serde_json::json!({"text": "much longer than eight bytes"}), ctx)
            .await
            .unwrap();

        let events = executor.event_store.tail(10, Some(ctx.conv_id), None).await.unwrap();
        let start = events.iter().find(|e| e.act == "tool_execution_start").unwrap();
        let preview = start.payload.get("args_preview").unwrap().as_str().unwrap();
        assert!(preview.contains("TRUNCATED"));
    }
}
