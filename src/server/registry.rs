use super::params::Params;
use super::Services;
use crate::error::{Result, VagrantMcpError};
use futures_util::future::BoxFuture;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub type ToolFuture = BoxFuture<'static, Result<Value>>;
pub type ToolHandler = fn(Arc<Services>, Params, CancellationToken) -> ToolFuture;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
    Boolean,
    StringArray,
    Object,
    /// `{guest, host}` objects; `host` defaults to `guest`
    PortArray,
}

#[derive(Debug, Clone, Copy)]
pub struct ParamDef {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub description: &'static str,
}

impl ParamDef {
    pub const fn required(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: true,
            description,
        }
    }

    pub const fn optional(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: false,
            description,
        }
    }

    fn schema(&self) -> Value {
        let mut schema = match self.kind {
            ParamKind::String => json!({"type": "string"}),
            ParamKind::Integer => json!({"type": "integer"}),
            ParamKind::Boolean => json!({"type": "boolean"}),
            ParamKind::StringArray => json!({"type": "array", "items": {"type": "string"}}),
            ParamKind::Object => json!({"type": "object"}),
            ParamKind::PortArray => json!({
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "guest": {"type": "integer"},
                        "host": {"type": "integer"}
                    },
                    "required": ["guest"]
                }
            }),
        };
        schema["description"] = json!(self.description);
        schema
    }
}

pub struct Tool {
    pub name: &'static str,
    pub description: &'static str,
    pub params: &'static [ParamDef],
    pub handler: ToolHandler,
}

impl Tool {
    pub fn input_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .params
            .iter()
            .map(|p| (p.name.to_string(), p.schema()))
            .collect();
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name)
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Reject calls missing a required parameter before any handler runs.
    pub fn check_required(&self, params: &Params) -> Result<()> {
        for param in self.params.iter().filter(|p| p.required) {
            if !params.has(param.name) {
                return Err(VagrantMcpError::InvalidInput(format!(
                    "missing required parameter: {}",
                    param.name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, Arc<Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Tool) {
        self.tools.insert(tool.name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Tool>> {
        self.tools.values()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
