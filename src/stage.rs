use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use tracing::warn;

use crate::error::{PipelineError, Result};
use crate::hooks::PipelineHook;
use crate::llm::{LanguageModel, ModelRequest, ModelResponse};
use crate::state::State;
use crate::template;
use crate::tool::{panic_message, ToolRegistry, ToolRequest, ToolResult};

/// Identity of a stage: its name, instruction template and output slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDescriptor {
    pub name: String,
    pub instruction: String,
    pub output_key: String,
}

impl StageDescriptor {
    pub fn new(
        name: impl Into<String>,
        output_key: impl Into<String>,
        instruction: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            instruction: instruction.into(),
            output_key: output_key.into(),
        }
    }
}

/// One unit of pipeline work. The value returned from `run` is stored under
/// `output_key` by the orchestrator.
#[async_trait]
pub trait Stage: Send + Sync {
    fn descriptor(&self) -> &StageDescriptor;

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    fn output_key(&self) -> &str {
        &self.descriptor().output_key
    }

    fn render(&self, state: &State) -> String {
        template::render(&self.descriptor().instruction, state)
    }

    async fn run(&self, state: &mut State, ctx: &StageContext<'_>) -> Result<Value>;
}

/// What a running stage can reach besides its state: the user input, tools
/// and the model, each routed through the pipeline hooks.
pub struct StageContext<'a> {
    stage: &'a str,
    user_input: &'a str,
    tools: &'a ToolRegistry,
    hooks: &'a [Arc<dyn PipelineHook>],
}

impl<'a> StageContext<'a> {
    pub fn new(
        stage: &'a str,
        user_input: &'a str,
        tools: &'a ToolRegistry,
        hooks: &'a [Arc<dyn PipelineHook>],
    ) -> Self {
        Self {
            stage,
            user_input,
            tools,
            hooks,
        }
    }

    pub fn stage(&self) -> &str {
        self.stage
    }

    pub fn user_input(&self) -> &str {
        self.user_input
    }

    /// Run a tool. Never fails; problems come back as `ok: false`.
    pub async fn execute_tool(&self, request: ToolRequest) -> ToolResult {
        dispatch_tool(self.tools, self.hooks, self.stage, &request).await
    }

    pub async fn call_model(
        &self,
        model: &dyn LanguageModel,
        request: &ModelRequest,
    ) -> Result<ModelResponse> {
        let mut response = None;
        for hook in self.hooks {
            let call = hook.before_model(self.stage, request);
            if let Some(short_circuit) = guard_hook(self.stage, call).await? {
                response = Some(short_circuit);
                break;
            }
        }
        let mut response = match response {
            Some(response) => response,
            None => model.generate(request).await?,
        };
        for hook in self.hooks {
            let call = hook.after_model(self.stage, &response);
            if let Some(rewritten) = guard_hook(self.stage, call).await? {
                response = rewritten;
            }
        }
        Ok(response)
    }
}

/// Await a hook call, turning a panic into a stage error.
pub(crate) async fn guard_hook<T>(
    stage: &str,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => Err(PipelineError::stage(
            stage,
            format!("hook panicked: {}", panic_message(payload.as_ref())),
        )),
    }
}

pub(crate) async fn dispatch_tool(
    tools: &ToolRegistry,
    hooks: &[Arc<dyn PipelineHook>],
    stage: &str,
    request: &ToolRequest,
) -> ToolResult {
    let mut result = None;
    for hook in hooks {
        match guard_hook(stage, hook.before_tool(stage, request)).await {
            Ok(Some(short_circuit)) => {
                result = Some(short_circuit);
                break;
            }
            Ok(None) => {}
            Err(err) => {
                result = Some(ToolResult::failure(err.to_string()));
                break;
            }
        }
    }
    let mut result = match result {
        Some(result) => result,
        None => tools.execute(request).await,
    };
    for hook in hooks {
        match guard_hook(stage, hook.after_tool(stage, request, &result)).await {
            Ok(Some(rewritten)) => result = rewritten,
            Ok(None) => {}
            Err(err) => {
                result = ToolResult::failure(err.to_string());
                break;
            }
        }
    }
    if !result.ok {
        warn!(
            stage,
            tool = %request.tool,
            error = result.error.as_deref().unwrap_or_default(),
            "tool call failed"
        );
    }
    result
}

type StageFn = dyn Fn(&mut State, &StageContext<'_>) -> Result<Value> + Send + Sync;

/// Wrap a synchronous closure as a stage.
pub struct FnStage {
    descriptor: StageDescriptor,
    func: Box<StageFn>,
}

impl FnStage {
    pub fn new<F>(descriptor: StageDescriptor, func: F) -> Self
    where
        F: Fn(&mut State, &StageContext<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            descriptor,
            func: Box::new(func),
        }
    }
}

#[async_trait]
impl Stage for FnStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn run(&self, state: &mut State, ctx: &StageContext<'_>) -> Result<Value> {
        (self.func)(state, ctx)
    }
}
