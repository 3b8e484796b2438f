//! Drives a real `assistant-core` HTTP server over the network. Gated behind the `e2e`
//! feature so `cargo test --workspace` stays fast; run with
//! `cargo test -p assistant-e2e --features e2e`.
#![cfg(feature = "e2e")]

use assistant_runtime::event_store::{EventStore, EventStoreConfig};
use assistant_runtime::events::{ParamSchema, ParamType, ToolDescriptor};
use assistant_runtime::settings::{Config, RateLimitScope};
use assistant_runtime::surface::{self, AppState, Orchestrators, SurfaceMetrics};
use assistant_runtime::tool_executor::ToolBody;
use assistant_runtime::Runtime;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

struct Echo;

#[async_trait]
impl ToolBody for Echo {
    async fn call(&self, args: Value) -> Result<Value, String> {
        Ok(args)
    }
}

fn echo_descriptor() -> ToolDescriptor {
    ToolDescriptor {
        name: "echo".to_string(),
        description: "echoes its arguments".to_string(),
        params: vec![ParamSchema {
            name: "text".to_string(),
            param_type: ParamType::String,
            required: true,
            max_length: Some(256),
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

fn echo_bodies() -> HashMap<String, Arc<dyn ToolBody>> {
    let mut bodies: HashMap<String, Arc<dyn ToolBody>> = HashMap::new();
    bodies.insert("echo".to_string(), Arc::new(Echo));
    bodies
}

/// Boots a server on an OS-assigned port against a fresh tempdir event log, returning the
/// base URL and the bearer token the caller must send.
async fn spawn_server(mut config: Config) -> (String, String, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    config.event_store.dir = tmp.path().to_string_lossy().to_string();
    config.api.bind_address = "127.0.0.1".to_string();
    config.api.port = 0;
    let token = "test-token-e2e".to_string();
    config.api.api_token = Some(token.clone());

    let runtime = Runtime::new(config.clone(), vec![echo_descriptor()], echo_bodies());

    let state = AppState {
        registry: runtime.registry.clone(),
        tool_executor: runtime.tool_executor.clone(),
        event_store: runtime.event_store.clone(),
        rate_limiter: runtime.rate_limiter.clone(),
        rate_limit_scope: config.rate_limit.scope,
        orchestrators: Arc::new(Orchestrators {
            standard: runtime.standard.clone(),
            review: runtime.review.clone(),
            chunked: runtime.chunked.clone(),
            combined: runtime.combined.clone(),
        }),
        mode_heuristic: runtime.mode_heuristic.clone(),
        telemetry_hints: runtime.telemetry_hints.clone(),
        upstream: runtime.upstream.clone(),
        metrics: Arc::new(SurfaceMetrics::default()),
        api_token: Some(Arc::from(token.as_str())),
        start_time: Instant::now(),
    };

    let router = surface::create_router(state, &config.api);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (format!("http://{addr}"), token, tmp)
}

#[tokio::test]
async fn health_is_unauthenticated() {
    let (base, _token, _tmp) = spawn_server(Config::default()).await;
    let resp = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
}

#[tokio::test]
async fn protected_routes_reject_missing_bearer_token() {
    let (base, _token, _tmp) = spawn_server(Config::default()).await;
    let client = reqwest::Client::new();
    let resp = client.get(format!("{base}/api/tools")).send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn lists_registered_tools_with_valid_token() {
    let (base, token, _tmp) = spawn_server(Config::default()).await;
    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{base}/api/tools"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["names"], json!(["echo"]));
}

/// S1 — a tool name absent from the allowlist is rejected with `ToolGated`, reported as a
/// normal 200 `{ok: false}` response rather than an HTTP error status (SPEC_FULL §6: only
/// `RateLimited` deviates from 200), and never dispatched.
#[tokio::test]
async fn gated_tool_is_rejected_without_dispatch() {
    let mut config = Config::default();
    config.execution.tool_allow = Some(vec!["current_time".to_string()]);
    let (base, token, _tmp) = spawn_server(config).await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/api/tools/run"))
        .bearer_auth(&token)
        .json(&json!({"name": "echo", "args": {"text": "hi"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["ok"], json!(false));
    assert_eq!(body["error"]["kind"], json!("ToolGated"));
}

/// S2 — exceeding the token bucket returns 429 with `Retry-After` and the rate-limit headers.
#[tokio::test]
async fn exhausted_rate_limit_returns_429_with_headers() {
    let mut config = Config::default();
    config.rate_limit.capacity = 1.0;
    config.rate_limit.refill_per_second = 0.0;
    config.rate_limit.scope = RateLimitScope::Process;
    let (base, token, _tmp) = spawn_server(config).await;
    let client = reqwest::Client::new();

    let first = client
        .post(format!("{base}/api/tools/run"))
        .bearer_auth(&token)
        .json(&json!({"name": "echo", "args": {"text": "hi"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), reqwest::StatusCode::OK);

    let second = client
        .post(format!("{base}/api/tools/run"))
        .bearer_auth(&token)
        .json(&json!({"name": "echo", "args": {"text": "hi"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), reqwest::StatusCode::TOO_MANY_REQUESTS);
    assert!(second.headers().contains_key("retry-after"));
    assert!(second.headers().contains_key("x-ratelimit-limit"));
}

/// A successful tool run is durably recorded and visible through the event-tail endpoint.
#[tokio::test]
async fn successful_tool_run_is_visible_in_ctx_tail() {
    let (base, token, _tmp) = spawn_server(Config::default()).await;
    let client = reqwest::Client::new();

    let run = client
        .post(format!("{base}/api/tools/run"))
        .bearer_auth(&token)
        .json(&json!({"name": "echo", "args": {"text": "hello"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(run.status(), reqwest::StatusCode::OK);

    let tail = client
        .get(format!("{base}/api/ctx/tail?n=20"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(tail.status(), reqwest::StatusCode::OK);
    let body: Value = tail.json().await.unwrap();
    let acts: Vec<String> = body["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["act"].as_str().unwrap().to_string())
        .collect();
    assert!(acts.contains(&"tool_execution_finish".to_string()));
}

/// Reopening the same event directory after the server is done still yields the events a
/// fresh `EventStore` reads back — durability across process boundaries.
#[tokio::test]
async fn events_survive_a_fresh_event_store_handle() {
    let (base, token, tmp) = spawn_server(Config::default()).await;
    let client = reqwest::Client::new();
    client
        .post(format!("{base}/api/tools/run"))
        .bearer_auth(&token)
        .json(&json!({"name": "echo", "args": {"text": "durable"}}))
        .send()
        .await
        .unwrap();

    // Give the append a moment to land before reading the segment from a second handle.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let fresh = EventStore::new(EventStoreConfig {
        dir: tmp.path().to_path_buf(),
        segment_max_bytes: 10 * 1024 * 1024,
        retention_days: 7,
    });
    let events = fresh.tail(50, None, None).await.unwrap();
    assert!(!events.is_empty());
}
