#![no_main]

//! Fuzzes Component D's argument validator (`assistant_runtime::registry::validate`).
//! `validate` is documented as total and side-effect-free; the only acceptable outcomes are
//! the four `ValidationOutcome` variants, never a panic.

use assistant_runtime::events::{ParamSchema, ParamType, ToolDescriptor};
use assistant_runtime::registry::{validate, ToolRegistry};
use libfuzzer_sys::{arbitrary::Arbitrary, fuzz_target};
use serde_json::Value;

#[derive(Arbitrary, Debug)]
struct Input {
    descriptors: Vec<FuzzDescriptor>,
    allowlist: Option<Vec<String>>,
    call_name: String,
    args_json: String,
}

#[derive(Arbitrary, Debug)]
struct FuzzDescriptor {
    name: String,
    params: Vec<FuzzParam>,
    allow_extra_args: bool,
}

#[derive(Arbitrary, Debug)]
struct FuzzParam {
    name: String,
    param_type: FuzzParamType,
    required: bool,
    max_length: Option<u16>,
    max_items: Option<u16>,
    min: Option<i32>,
    max: Option<i32>,
    enum_values: Option<Vec<String>>,
}

#[derive(Arbitrary, Debug)]
enum FuzzParamType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl From<FuzzParamType> for ParamType {
    fn from(t: FuzzParamType) -> Self {
        match t {
            FuzzParamType::String => ParamType::String,
            FuzzParamType::Number => ParamType::Number,
            FuzzParamType::Integer => ParamType::Integer,
            FuzzParamType::Boolean => ParamType::Boolean,
            FuzzParamType::Array => ParamType::Array,
            FuzzParamType::Object => ParamType::Object,
        }
    }
}

impl From<FuzzParam> for ParamSchema {
    fn from(p: FuzzParam) -> Self {
        ParamSchema {
            name: p.name,
            param_type: p.param_type.into(),
            required: p.required,
            max_length: p.max_length.map(|n| n as usize),
            max_items: p.max_items.map(|n| n as usize),
            min: p.min.map(|n| n as f64),
            max: p.max.map(|n| n as f64),
            enum_values: p.enum_values,
            items: None,
        }
    }
}

impl From<FuzzDescriptor> for ToolDescriptor {
    fn from(d: FuzzDescriptor) -> Self {
        ToolDescriptor {
            name: d.name,
            description: String::new(),
            params: d.params.into_iter().map(Into::into).collect(),
            allow_extra_args: d.allow_extra_args,
            safety_class: None,
        }
    }
}

fuzz_target!(|input: Input| {
    let descriptors: Vec<ToolDescriptor> = input.descriptors.into_iter().map(Into::into).collect();
    let registry = ToolRegistry::new(descriptors, input.allowlist);
    let args: Value = serde_json::from_str(&input.args_json).unwrap_or(Value::Null);
    let _ = validate(&registry, &input.call_name, &args);
});
