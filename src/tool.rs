use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{PipelineError, Result};

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    async fn call(&self, args: Value) -> Result<Value>;
}

type ToolFn = dyn Fn(Value) -> Result<Value> + Send + Sync;

/// Wrap a plain synchronous function as a tool.
pub struct FunctionTool {
    name: String,
    description: String,
    func: Arc<ToolFn>,
}

impl FunctionTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        func: impl Fn(Value) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            func: Arc::new(func),
        }
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn call(&self, args: Value) -> Result<Value> {
        (self.func)(args)
    }
}

/// A stage's request to run a tool with named arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    #[serde(default)]
    pub tool: String,
    #[serde(default = "empty_args")]
    pub args: Value,
}

fn empty_args() -> Value {
    Value::Object(Map::new())
}

impl ToolRequest {
    pub fn new(tool: impl Into<String>, args: Value) -> Self {
        Self {
            tool: tool.into(),
            args,
        }
    }
}

/// Outcome of a tool dispatch. Failures are values, not errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(error.into()),
        }
    }

    /// Field of a successful object result.
    pub fn field(&self, key: &str) -> Option<&Value> {
        if !self.ok {
            return None;
        }
        self.result.as_ref().and_then(|value| value.get(key))
    }

    /// True when the call succeeded and `result[key]` is `true`.
    pub fn flag(&self, key: &str) -> bool {
        self.field(key).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panicked".to_string()
    }
}

/// Name to tool mapping. Built before a pipeline runs and read-only after.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Bind a tool under its name. A later registration with the same name
    /// replaces the earlier one.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn register_fn(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        func: impl Fn(Value) -> Result<Value> + Send + Sync + 'static,
    ) {
        self.register(FunctionTool::new(name, description, func));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn description(&self, name: &str) -> Option<&str> {
        self.tools.get(name).map(|tool| tool.description())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Invoke a tool, propagating lookup and invocation errors.
    pub async fn call(&self, name: &str, args: Value) -> Result<Value> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| PipelineError::ToolNotFound(name.to_string()))?;
        match AssertUnwindSafe(tool.call(args)).catch_unwind().await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(PipelineError::ToolInvocation {
                name: name.to_string(),
                source: Box::new(source),
            }),
            Err(payload) => Err(PipelineError::ToolInvocation {
                name: name.to_string(),
                source: panic_message(payload.as_ref()).into(),
            }),
        }
    }

    /// Invoke a tool and fold every failure into the returned result.
    pub async fn execute(&self, request: &ToolRequest) -> ToolResult {
        if request.tool.is_empty() {
            return ToolResult::failure(PipelineError::MissingToolName.to_string());
        }
        match self.call(&request.tool, request.args.clone()).await {
            Ok(value) => ToolResult::success(value),
            Err(err) => ToolResult::failure(err.to_string()),
        }
    }
}
