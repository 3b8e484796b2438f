//! A minimal example tool set so `assistant-core serve` has something to dispatch to out of
//! the box. Tool sets are deployment-specific input to `assistant_runtime::Runtime`, not
//! something the library crate invents (SPEC_FULL §4.D) — real deployments register their own.

use assistant_runtime::events::{ParamSchema, ParamType, ToolDescriptor};
use assistant_runtime::tool_executor::ToolBody;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

struct Echo;

#[async_trait]
impl ToolBody for Echo {
    async fn call(&self, args: Value) -> Result<Value, String> {
        Ok(args)
    }
}

struct CurrentTime;

#[async_trait]
impl ToolBody for CurrentTime {
    async fn call(&self, _args: Value) -> Result<Value, String> {
        Ok(serde_json::json!({ "utc": Utc::now().to_rfc3339() }))
    }
}

pub fn descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "echo".to_string(),
            description: "Returns its input arguments unchanged.".to_string(),
            params: vec![ParamSchema {
                name: "text".to_string(),
                param_type: ParamType::String,
                required: true,
                max_length: Some(4096),
                max_items: None,
                min: None,
                max: None,
                enum_values: None,
                items: None,
            }],
            allow_extra_args: false,
            safety_class: None,
        },
        ToolDescriptor {
            name: "current_time".to_string(),
            description: "Returns the current UTC time.".to_string(),
            params: vec![],
            allow_extra_args: false,
            safety_class: None,
        },
    ]
}

pub fn bodies() -> HashMap<String, Arc<dyn ToolBody>> {
    let mut bodies: HashMap<String, Arc<dyn ToolBody>> = HashMap::new();
    bodies.insert("echo".to_string(), Arc::new(Echo));
    bodies.insert("current_time".to_string(), Arc::new(CurrentTime));
    bodies
}
