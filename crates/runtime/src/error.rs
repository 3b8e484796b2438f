//! Per-subsystem error enums aggregated under [`CoreError`], mirroring the teacher's
//! `RuntimeError` aggregate: each subsystem gets its own `thiserror` enum, and the top level
//! just wraps them with `#[from]`.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    EventStore(#[from] EventStoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    ToolExecution(#[from] ToolExecutionError),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("i/o error writing segment {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("no writable segment directory configured")]
    NoSegmentDir,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration key: {key}")]
    MissingRequired { key: String },
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(String),
}

/// The wire-visible error kinds from SPEC_FULL §7. Each variant maps to exactly one
/// `kind` string in the HTTP error response and, for `RateLimited`, to a 429 status plus
/// `Retry-After` header.
#[derive(Debug, Error)]
pub enum ToolExecutionError {
    #[error("unknown tool '{name}'")]
    ToolUnknown { name: String },
    #[error("tool '{name}' is not in the allowlist {allowlist:?}")]
    ToolGated {
        name: String,
        allowlist: Vec<String>,
    },
    #[error("validation failed: {violations:?}")]
    ValidationError { violations: Vec<String> },
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("tool '{name}' timed out after {elapsed:?}")]
    Timeout { name: String, elapsed: Duration },
    #[error("tool '{name}' produced output larger than {max_bytes} bytes")]
    OutputTooLarge { name: String, max_bytes: usize },
    #[error("tool '{name}' failed: {message}")]
    ExecutionError { name: String, message: String },
    #[error("turn cancelled")]
    Cancelled,
}

impl ToolExecutionError {
    /// The `kind` string placed in `{ok:false, error:{kind, ...}}` responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ToolUnknown { .. } => "ToolUnknown",
            Self::ToolGated { .. } => "ToolGated",
            Self::ValidationError { .. } => "ValidationError",
            Self::RateLimited { .. } => "RateLimited",
            Self::Timeout { .. } => "Timeout",
            Self::OutputTooLarge { .. } => "OutputTooLarge",
            Self::ExecutionError { .. } => "ExecutionError",
            Self::Cancelled => "Cancelled",
        }
    }
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("upstream returned an unexpected response shape: {0}")]
    MalformedResponse(String),
    #[error("upstream rate limited us, retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Tool(#[from] ToolExecutionError),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error("turn cancelled")]
    Cancelled,
    #[error("chunk {index} failed twice: {message}")]
    ChunkFailed { index: usize, message: String },
}

pub type CoreResult<T> = Result<T, CoreError>;
