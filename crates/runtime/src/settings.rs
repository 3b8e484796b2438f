//! Frozen runtime configuration, assembled once at boot from defaults, an optional TOML
//! file, and environment variable overrides, in that precedence order.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub execution: ExecutionConfig,
    pub rate_limit: RateLimitConfig,
    pub event_store: EventStoreConfig,
    pub orchestrators: OrchestratorConfig,
    pub continuation: ContinuationConfig,
    pub telemetry_hints: TelemetryHintsConfig,
    pub logging: LoggingConfig,
    pub api: ApiConfig,
    pub redactor: RedactorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            execution: ExecutionConfig::default(),
            rate_limit: RateLimitConfig::default(),
            event_store: EventStoreConfig::default(),
            orchestrators: OrchestratorConfig::default(),
            continuation: ContinuationConfig::default(),
            telemetry_hints: TelemetryHintsConfig::default(),
            logging: LoggingConfig::default(),
            api: ApiConfig::default(),
            redactor: RedactorConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub tools_enabled: bool,
    #[serde(with = "humantime_serde")]
    pub tool_timeout: Duration,
    pub tool_max_output_bytes: usize,
    pub tool_allow: Option<Vec<String>>,
    pub allow_shell: bool,
    pub allow_file_write: bool,
    pub allow_git: bool,
    pub allow_restart: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            tools_enabled: true,
            tool_timeout: Duration::from_millis(30_000),
            tool_max_output_bytes: 1024 * 1024,
            tool_allow: None,
            allow_shell: false,
            allow_file_write: false,
            allow_git: false,
            allow_restart: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitScope {
    Process,
    PerConversation,
    PerClient,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub capacity: f64,
    pub refill_per_second: f64,
    pub cost_per_request: f64,
    pub scope: RateLimitScope,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 100.0,
            refill_per_second: 10.0,
            cost_per_request: 1.0,
            scope: RateLimitScope::Process,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventStoreConfig {
    pub dir: String,
    pub segment_max_bytes: u64,
    pub retention_days: u32,
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            dir: "./data/events".to_string(),
            segment_max_bytes: 10 * 1024 * 1024,
            retention_days: 7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombinedStrategy {
    PerChunk,
    FinalOnly,
    Both,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub review_enabled: bool,
    pub review_iterations: u32,
    pub review_threshold: f64,
    pub review_max_regenerations: u32,
    pub chunked_enabled: bool,
    pub chunked_max_chunks: usize,
    pub chunked_tokens_per_chunk: u32,
    pub combined_strategy: CombinedStrategy,
    pub auto_review: bool,
    pub auto_chunked: bool,
    pub chunked_threshold: f64,
    pub review_threshold_signal: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            review_enabled: true,
            review_iterations: 3,
            review_threshold: 0.7,
            review_max_regenerations: 2,
            chunked_enabled: true,
            chunked_max_chunks: 5,
            chunked_tokens_per_chunk: 1024,
            combined_strategy: CombinedStrategy::FinalOnly,
            auto_review: true,
            auto_chunked: true,
            chunked_threshold: 0.5,
            review_threshold_signal: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContinuationConfig {
    pub max_continuation_attempts: u32,
}

impl Default for ContinuationConfig {
    fn default() -> Self {
        Self {
            max_continuation_attempts: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryHintsConfig {
    pub enabled: bool,
    pub window_minutes: i64,
    pub threshold: f64,
    pub min_samples: usize,
}

impl Default for TelemetryHintsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_minutes: 10,
            threshold: 0.15,
            min_samples: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub redact_max_preview_bytes: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            redact_max_preview_bytes: 4096,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind_address: String,
    pub port: u16,
    pub enable_cors: bool,
    pub cors_origins: Vec<String>,
    pub enable_tracing: bool,
    /// Never serialized back out — read from `ASSISTANT_API_TOKEN` only.
    #[serde(skip_serializing)]
    pub api_token: Option<String>,
    pub upstream_base_url: String,
    #[serde(skip_serializing)]
    pub upstream_api_key: Option<String>,
    pub upstream_model: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
            enable_cors: true,
            cors_origins: vec!["http://localhost:3000".to_string()],
            enable_tracing: true,
            api_token: None,
            upstream_base_url: "https://api.openai.com/v1".to_string(),
            upstream_api_key: None,
            upstream_model: "gpt-4o-mini".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedactorConfig {
    pub aggressive_mode: bool,
    pub max_recursion_depth: usize,
}

impl Default for RedactorConfig {
    fn default() -> Self {
        Self {
            aggressive_mode: false,
            max_recursion_depth: 10,
        }
    }
}

impl Config {
    /// Defaults → TOML file (if present) → environment overrides.
    pub fn load(toml_path: Option<&Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let mut config = Config::default();

        if let Some(path) = toml_path {
            if path.exists() {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                config = toml::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
            }
        }

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("ASSISTANT_BIND_ADDRESS") {
            self.api.bind_address = v;
        }
        if let Ok(v) = std::env::var("ASSISTANT_PORT") {
            if let Ok(port) = v.parse() {
                self.api.port = port;
            }
        }
        if let Ok(v) = std::env::var("ASSISTANT_API_TOKEN") {
            self.api.api_token = Some(v);
        }
        if let Ok(v) = std::env::var("ASSISTANT_UPSTREAM_BASE_URL") {
            self.api.upstream_base_url = v;
        }
        if let Ok(v) = std::env::var("ASSISTANT_UPSTREAM_API_KEY") {
            self.api.upstream_api_key = Some(v);
        }
        if let Ok(v) = std::env::var("ASSISTANT_UPSTREAM_MODEL") {
            self.api.upstream_model = v;
        }
        if let Ok(v) = std::env::var("ASSISTANT_EVENT_DIR") {
            self.event_store.dir = v;
        }
        if let Ok(v) = std::env::var("RUST_LOG") {
            self.logging.level = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let c = Config::default();
        assert_eq!(c.execution.tool_timeout, Duration::from_millis(30_000));
        assert_eq!(c.execution.tool_max_output_bytes, 1024 * 1024);
        assert_eq!(c.rate_limit.capacity, 100.0);
        assert_eq!(c.rate_limit.refill_per_second, 10.0);
        assert_eq!(c.event_store.segment_max_bytes, 10 * 1024 * 1024);
        assert_eq!(c.event_store.retention_days, 7);
        assert_eq!(c.orchestrators.review_iterations, 3);
        assert_eq!(c.orchestrators.review_threshold, 0.7);
        assert_eq!(c.orchestrators.review_max_regenerations, 2);
        assert_eq!(c.orchestrators.chunked_max_chunks, 5);
        assert_eq!(c.orchestrators.chunked_tokens_per_chunk, 1024);
        assert_eq!(
            c.orchestrators.combined_strategy,
            CombinedStrategy::FinalOnly
        );
        assert_eq!(c.continuation.max_continuation_attempts, 2);
        assert_eq!(c.telemetry_hints.window_minutes, 10);
        assert_eq!(c.telemetry_hints.threshold, 0.15);
        assert_eq!(c.telemetry_hints.min_samples, 5);
        assert_eq!(c.logging.redact_max_preview_bytes, 4096);
        assert!(!c.redactor.aggressive_mode);
    }

    #[test]
    fn api_token_not_serialized() {
        let mut c = Config::default();
        c.api.api_token = Some("super-secret".to_string());
        let toml_out = toml::to_string(&c).unwrap();
        assert!(!toml_out.contains("super-secret"));
    }
}
