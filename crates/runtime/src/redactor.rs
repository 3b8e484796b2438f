//! Component B — pattern- and key-based redaction for logging previews. Tool execution
//! itself always sees unredacted arguments; redaction happens only at the event-log
//! boundary, per SPEC_FULL §4.B.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

#[derive(Debug, Clone)]
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

const SENSITIVE_KEYS: &[&str] = &[
    "password", "token", "secret", "api_key", "apikey", "authorization", "cookie", "jwt",
];

struct Patterns {
    api_key: Regex,
    jwt: Regex,
    credit_card: Regex,
    email: Regex,
    url_creds: Regex,
    ssh_key: Regex,
    aggressive_token: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        api_key: Regex::new(r"\b(sk|pk|rk|ghp|gho|ghs|ghr|xox[baprs])-?[A-Za-z0-9_]{16,}\b")
            .unwrap(),
        jwt: Regex::new(r"\bey[A-Za-z0-9_-]{10,}\.[A-Za-z0-9_-]{10,}\.[A-Za-z0-9_-]{10,}\b")
            .unwrap(),
        credit_card: Regex::new(r"\b(?:\d[ -]?){13,16}\b").unwrap(),
        email: Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap(),
        url_creds: Regex::new(r"\b[a-zA-Z][a-zA-Z0-9+.-]*://[^/\s:@]+:[^/\s:@]+@").unwrap(),
        ssh_key: Regex::new(r"-----BEGIN [A-Z ]*PRIVATE KEY-----").unwrap(),
        aggressive_token: Regex::new(r"\b[A-Za-z0-9]{32,}\b").unwrap(),
    })
}

/// Redacts known sensitive substrings inside a single string value.
fn redact_string(s: &str, cfg: &RedactorConfig) -> String {
    let p = patterns();
    let mut out = p.ssh_key.replace_all(s, "<redacted:ssh_key>").into_owned();
    out = p.url_creds.replace_all(&out, "<redacted:url_creds>://").into_owned();
    out = p.jwt.replace_all(&out, "<redacted:jwt>").into_owned();
    out = p.api_key.replace_all(&out, "<redacted:api_key>").into_owned();
    out = p.credit_card.replace_all(&out, "<redacted:card>").into_owned();
    out = p.email.replace_all(&out, "<redacted:email>").into_owned();
    if cfg.aggressive_mode {
        out = p
            .aggressive_token
            .replace_all(&out, "<redacted:token>")
            .into_owned();
    }
    out
}

fn contains_sensitive_string(s: &str) -> bool {
    let p = patterns();
    p.ssh_key.is_match(s)
        || p.url_creds.is_match(s)
        || p.jwt.is_match(s)
        || p.api_key.is_match(s)
        || p.credit_card.is_match(s)
        || p.email.is_match(s)
}

fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_KEYS.iter().any(|k| lower.contains(k))
}

/// Deep-redacts a JSON value. Recursion is bounded by `max_recursion_depth`; values beyond
/// the bound are replaced wholesale with `<redacted:depth_exceeded>` rather than walked, so a
/// pathologically nested input cannot blow the stack.
pub fn redact(value: &Value, cfg: &RedactorConfig) -> Value {
    redact_depth(value, cfg, 0)
}

fn redact_depth(value: &Value, cfg: &RedactorConfig, depth: usize) -> Value {
    if depth >= cfg.max_recursion_depth {
        return Value::String("<redacted:depth_exceeded>".to_string());
    }
    match value {
        Value::String(s) => Value::String(redact_string(s, cfg)),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| redact_depth(v, cfg, depth + 1)).collect())
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                if is_sensitive_key(k) {
                    out.insert(k.clone(), Value::String("<redacted>".to_string()));
                } else {
                    out.insert(k.clone(), redact_depth(v, cfg, depth + 1));
                }
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

/// Fast scalar check used before committing to a full redaction pass.
pub fn contains_sensitive(value: &Value) -> bool {
    match value {
        Value::String(s) => contains_sensitive_string(s),
        Value::Array(items) => items.iter().any(contains_sensitive),
        Value::Object(map) => map
            .iter()
            .any(|(k, v)| is_sensitive_key(k) || contains_sensitive(v)),
        _ => false,
    }
}

/// Redacts, serializes, and truncates a value for inclusion in an event payload.
pub fn redact_for_logging(value: &Value, cfg: &RedactorConfig, max_bytes: usize) -> String {
    let redacted = redact(value, cfg);
    let serialized = serde_json::to_string(&redacted).unwrap_or_default();
    if serialized.len() <= max_bytes {
        serialized
    } else {
        let mut cut = max_bytes;
        while cut > 0 && !serialized.is_char_boundary(cut) {
            cut -= 1;
        }
        format!(
            "{} [TRUNCATED] ({} bytes)",
            &serialized[..cut],
            serialized.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redacts_api_key_but_preserves_structure() {
        let cfg = RedactorConfig::default();
        let v = json!({"text": "my key is sk-ABCDEFGHIJKLMNOPQRSTUVWXYZ012345"});
        let redacted = redact(&v, &cfg);
        let s = redacted["text"].as_str().unwrap();
        assert!(s.contains("<redacted:api_key>"));
        assert!(!s.contains("sk-ABCDEFGHIJKLMNOPQRSTUVWXYZ012345"));
    }

    #[test]
    fn redacts_sensitive_keys_regardless_of_value_shape() {
        let cfg = RedactorConfig::default();
        let v = json!({"password": "hunter2", "nested": {"api_key": "abc"}});
        let redacted = redact(&v, &cfg);
        assert_eq!(redacted["password"], json!("<redacted>"));
        assert_eq!(redacted["nested"]["api_key"], json!("<redacted>"));
    }

    #[test]
    fn redaction_is_idempotent() {
        let cfg = RedactorConfig::default();
        let v = json!({"text": "contact me@example.com or sk-ABCDEFGHIJKLMNOPQRSTUVWXYZ"});
        let once = redact(&v, &cfg);
        let twice = redact(&once, &cfg);
        assert_eq!(once, twice);
    }

    #[test]
    fn aggressive_mode_off_by_default_preserves_plain_tokens() {
        let cfg = RedactorConfig::default();
        let v = json!({"text": "abcdefghijklmnopqrstuvwxyz0123456789ABCD"});
        let redacted = redact(&v, &cfg);
        assert_eq!(redacted, v);
    }

    #[test]
    fn aggressive_mode_redacts_long_alphanumeric_tokens() {
        let cfg = RedactorConfig {
            aggressive_mode: true,
            ..Default::default()
        };
        let v = json!({"text": "abcdefghijklmnopqrstuvwxyz0123456789ABCD"});
        let redacted = redact(&v, &cfg);
        assert_eq!(redacted["text"], json!("<redacted:token>"));
    }

    #[test]
    fn truncates_long_previews() {
        let cfg = RedactorConfig::default();
        let v = json!({"text": "x".repeat(100)});
        let preview = redact_for_logging(&v, &cfg, 20);
        assert!(preview.contains("[TRUNCATED]"));
    }

    #[test]
    fn depth_bound_prevents_unbounded_recursion() {
        let cfg = RedactorConfig {
            max_recursion_depth: 2,
            ..Default::default()
        };
        let v = json!({"a": {"b": {"c": "deep"}}});
        let redacted = redact(&v, &cfg);
        assert_eq!(redacted["a"]["b"], json!("<redacted:depth_exceeded>"));
    }
}
