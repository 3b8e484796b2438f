//! Component D — the tool registry and argument validator. The registry is an immutable map
//! built at boot (lock-free reads, per SPEC_FULL §5); validation is a pure function with no
//! side effects and no upstream calls.

use crate::events::{ParamSchema, ParamType, SafetyClass, ToolDescriptor};
use crate::settings::ExecutionConfig;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

pub struct ToolRegistry {
    descriptors: HashMap<String, ToolDescriptor>,
    allowlist: HashSet<String>,
    tools_enabled: bool,
}

impl ToolRegistry {
    /// `allowlist`, when `None`, defaults to the full descriptor set. The effective allowlist
    /// additionally excludes any tool whose `safety_class` gate is off in `gates` — the
    /// allowlist and the safety gates are independent checks, both must pass (§4.E).
    pub fn new(descriptors: Vec<ToolDescriptor>, allowlist: Option<Vec<String>>) -> Self {
        Self::with_gates(descriptors, allowlist, &ExecutionConfig::default())
    }

    pub fn with_gates(descriptors: Vec<ToolDescriptor>, allowlist: Option<Vec<String>>, gates: &ExecutionConfig) -> Self {
        let requested: HashSet<String> = match allowlist {
            Some(names) => names.into_iter().collect(),
            None => descriptors.iter().map(|d| d.name.clone()).collect(),
        };
        let allowlist = requested
            .into_iter()
            .filter(|name| {
                descriptors
                    .iter()
                    .find(|d| &d.name == name)
                    .map(|d| gate_open(d.safety_class, gates))
                    .unwrap_or(true)
            })
            .collect();
        let descriptors = descriptors.into_iter().map(|d| (d.name.clone(), d)).collect();
        Self {
            descriptors,
            allowlist,
            tools_enabled: gates.tools_enabled,
        }
    }

    pub fn list(&self) -> Vec<&ToolDescriptor> {
        self.descriptors.values().collect()
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.descriptors.get(name)
    }

    pub fn is_allowed(&self, name: &str) -> bool {
        self.tools_enabled && self.allowlist.contains(name)
    }

    pub fn allowlisted_names(&self) -> Vec<String> {
        if !self.tools_enabled {
            return vec![];
        }
        let mut names: Vec<String> = self.allowlist.iter().cloned().collect();
        names.sort();
        names
    }
}

fn gate_open(safety_class: Option<SafetyClass>, gates: &ExecutionConfig) -> bool {
    match safety_class {
        None => true,
        Some(SafetyClass::Shell) => gates.allow_shell,
        Some(SafetyClass::FileWrite) => gates.allow_file_write,
        Some(SafetyClass::Git) => gates.allow_git,
        Some(SafetyClass::Restart) => gates.allow_restart,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Unknown,
    Gated { allowlist: Vec<String> },
    Invalid { violations: Vec<String> },
    Ok,
}

/// Total, side-effect-free validation per SPEC_FULL §4.D's nine ordered rules.
pub fn validate(registry: &ToolRegistry, name: &str, args: &Value) -> ValidationOutcome {
    let Some(descriptor) = registry.get(name) else {
        return ValidationOutcome::Unknown;
    };
    if !registry.is_allowed(name) {
        return ValidationOutcome::Gated {
            allowlist: registry.allowlisted_names(),
        };
    }

    let mut violations = Vec::new();
    let Value::Object(map) = args else {
        return ValidationOutcome::Invalid {
            violations: vec!["arguments must be a JSON object".to_string()],
        };
    };

    if !descriptor.allow_extra_args {
        let known: HashSet<&str> = descriptor.params.iter().map(|p| p.name.as_str()).collect();
        for key in map.keys() {
            if !known.contains(key.as_str()) {
                violations.push(format!("unexpected argument '{key}'"));
            }
        }
    }

    for param in &descriptor.params {
        validate_param(param, map.get(&param.name), &mut violations);
    }

    if violations.is_empty() {
        ValidationOutcome::Ok
    } else {
        ValidationOutcome::Invalid { violations }
    }
}

fn validate_param(param: &ParamSchema, value: Option<&Value>, violations: &mut Vec<String>) {
    let Some(value) = value else {
        if param.required {
            violations.push(format!("missing required argument '{}'", param.name));
        }
        return;
    };

    if !type_matches(param.param_type, value) {
        violations.push(format!(
            "argument '{}' must be of type {:?}",
            param.name, param.param_type
        ));
        return;
    }

    match (param.param_type, value) {
        (ParamType::String, Value::String(s)) => {
            if let Some(max) = param.max_length {
                if s.chars().count() > max {
                    violations.push(format!("argument '{}' exceeds max length {max}", param.name));
                }
            }
            if let Some(allowed) = &param.enum_values {
                if !allowed.iter().any(|a| a == s) {
                    violations.push(format!(
                        "argument '{}' must be one of {allowed:?}",
                        param.name
                    ));
                }
            }
        }
        (ParamType::Number | ParamType::Integer, Value::Number(n)) => {
            let v = n.as_f64().unwrap_or(0.0);
            if let Some(min) = param.min {
                if v < min {
                    violations.push(format!("argument '{}' below minimum {min}", param.name));
                }
            }
            if let Some(max) = param.max {
                if v > max {
                    violations.push(format!("argument '{}' above maximum {max}", param.name));
                }
            }
        }
        (ParamType::Array, Value::Array(items)) => {
            if let Some(max_items) = param.max_items {
                if items.len() > max_items {
                    violations.push(format!(
                        "argument '{}' exceeds max items {max_items}",
                        param.name
                    ));
                }
            }
            if let Some(item_schema) = &param.items {
                for (i, item) in items.iter().enumerate() {
                    let mut sub = Vec::new();
                    validate_param(item_schema, Some(item), &mut sub);
                    for v in sub {
                        violations.push(format!("argument '{}[{i}]': {v}", param.name));
                    }
                }
            }
        }
        _ => {}
    }
}

fn type_matches(expected: ParamType, value: &Value) -> bool {
    match expected {
        ParamType::String => value.is_string(),
        ParamType::Boolean => value.is_boolean(),
        ParamType::Number => value.is_number(),
        ParamType::Integer => value.as_i64().is_some() || value.as_u64().is_some(),
        ParamType::Array => value.is_array(),
        ParamType::Object => value.is_object(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_descriptor() -> ToolDescriptor {
        ToolDescriptor {
            name: "echo".to_string(),
            description: "echoes text back".to_string(),
            params: vec![ParamSchema {
                name: "text".to_string(),
                param_type: ParamType::String,
                required: true,
                max_length: Some(10),
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

    fn pass_through_descriptor() -> ToolDescriptor {
        let mut d = echo_descriptor();
        d.allow_extra_args = true;
        d
    }

    #[test]
    fn unknown_tool_is_unknown() {
        let registry = ToolRegistry::new(vec![echo_descriptor()], None);
        let outcome = validate(&registry, "nope", &json!({}));
        assert_eq!(outcome, ValidationOutcome::Unknown);
    }

    #[test]
    fn gated_tool_reports_allowlist() {
        let registry = ToolRegistry::new(vec![echo_descriptor()], Some(vec![]));
        let outcome = validate(&registry, "echo", &json!({"text": "hi"}));
        assert_eq!(
            outcome,
            ValidationOutcome::Gated {
                allowlist: vec![]
            }
        );
    }

    #[test]
    fn missing_required_argument_is_invalid() {
        let registry = ToolRegistry::new(vec![echo_descriptor()], None);
        let outcome = validate(&registry, "echo", &json!({}));
        match outcome {
            ValidationOutcome::Invalid { violations } => {
                assert!(violations.iter().any(|v| v.contains("text")));
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn over_length_string_is_invalid() {
        let registry = ToolRegistry::new(vec![echo_descriptor()], None);
        let outcome = validate(&registry, "echo", &json!({"text": "way too long for this"}));
        assert!(matches!(outcome, ValidationOutcome::Invalid { .. }));
    }

    #[test]
    fn valid_call_is_ok() {
        let registry = ToolRegistry::new(vec![echo_descriptor()], None);
        let outcome = validate(&registry, "echo", &json!({"text": "hi"}));
        assert_eq!(outcome, ValidationOutcome::Ok);
    }

    #[test]
    fn unexpected_extra_argument_is_invalid() {
        let registry = ToolRegistry::new(vec![echo_descriptor()], None);
        let outcome = validate(&registry, "echo", &json!({"text": "hi", "extra": 1}));
        assert!(matches!(outcome, ValidationOutcome::Invalid { .. }));
    }

    #[test]
    fn pass_through_descriptor_allows_extra_arguments() {
        let registry = ToolRegistry::new(vec![pass_through_descriptor()], None);
        let outcome = validate(&registry, "echo", &json!({"text": "hi", "extra": 1}));
        assert_eq!(outcome, ValidationOutcome::Ok);
    }

    fn shell_descriptor() -> ToolDescriptor {
        let mut d = echo_descriptor();
        d.name = "shell".to_string();
        d.safety_class = Some(crate::events::SafetyClass::Shell);
        d
    }

    #[test]
    fn safety_gated_tool_is_rejected_even_when_allowlisted() {
        let gates = ExecutionConfig {
            allow_shell: false,
            ..ExecutionConfig::default()
        };
        let registry = ToolRegistry::with_gates(vec![shell_descriptor()], Some(vec!["shell".to_string()]), &gates);
        let outcome = validate(&registry, "shell", &json!({"text": "hi"}));
        assert!(matches!(outcome, ValidationOutcome::Gated { .. }));
    }

    #[test]
    fn safety_gate_open_allows_the_tool() {
        let gates = ExecutionConfig {
            allow_shell: true,
            ..ExecutionConfig::default()
        };
        let registry = ToolRegistry::with_gates(vec![shell_descriptor()], Some(vec!["shell".to_string()]), &gates);
        let outcome = validate(&registry, "shell", &json!({"text": "hi"}));
        assert_eq!(outcome, ValidationOutcome::Ok);
    }

    #[test]
    fn tools_disabled_gates_everything() {
        let gates = ExecutionConfig {
            tools_enabled: false,
            ..ExecutionConfig::default()
        };
        let registry = ToolRegistry::with_gates(vec![echo_descriptor()], None, &gates);
        let outcome = validate(&registry, "echo", &json!({"text": "hi"}));
        assert!(matches!(outcome, ValidationOutcome::Gated { allowlist } if allowlist.is_empty()));
    }
}
