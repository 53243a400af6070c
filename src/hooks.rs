//! Interception points around stages, model calls and tool calls.
//!
//! A `before_*` hook that returns `Some` replaces the wrapped work entirely.
//! An `after_*` hook that returns `Some` replaces the natural result.
//! `before_stage` returning `Some(Value::Null)` is treated as no override.
//! A hook that errors or panics fails the stage or tool call it wraps.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::Result;
use crate::llm::{ModelRequest, ModelResponse};
use crate::message::{Content, Part};
use crate::rewrite::WordReplacer;
use crate::state::State;
use crate::tool::{ToolRequest, ToolResult};

#[async_trait]
pub trait PipelineHook: Send + Sync {
    async fn before_stage(&self, _stage: &str, _state: &mut State) -> Result<Option<Value>> {
        Ok(None)
    }

    async fn after_stage(
        &self,
        _stage: &str,
        _state: &State,
        _output: &Value,
    ) -> Result<Option<Value>> {
        Ok(None)
    }

    async fn before_model(
        &self,
        _stage: &str,
        _request: &ModelRequest,
    ) -> Result<Option<ModelResponse>> {
        Ok(None)
    }

    async fn after_model(
        &self,
        _stage: &str,
        _response: &ModelResponse,
    ) -> Result<Option<ModelResponse>> {
        Ok(None)
    }

    async fn before_tool(
        &self,
        _stage: &str,
        _request: &ToolRequest,
    ) -> Result<Option<ToolResult>> {
        Ok(None)
    }

    async fn after_tool(
        &self,
        _stage: &str,
        _request: &ToolRequest,
        _result: &ToolResult,
    ) -> Result<Option<ToolResult>> {
        Ok(None)
    }
}

pub const BLOCKED_REPLY: &str = "Please rephrase without inappropriate language.";

/// Blocks model calls whose latest user message contains a blocked word and
/// softens wording in model replies.
pub struct ContentFilterHook {
    blocked: Vec<String>,
    replacer: WordReplacer,
}

impl ContentFilterHook {
    pub fn new(
        blocked: impl IntoIterator<Item = impl Into<String>>,
        replacer: WordReplacer,
    ) -> Self {
        Self {
            blocked: blocked
                .into_iter()
                .map(|word| word.into().to_lowercase())
                .collect(),
            replacer,
        }
    }

    /// Blocks "sucks" and rewrites problem/difficult to challenge/complex.
    pub fn standard() -> Result<Self> {
        let replacer = WordReplacer::new([("problem", "challenge"), ("difficult", "complex")])?;
        Ok(Self::new(["sucks"], replacer))
    }

    fn blocked_word(&self, text: &str) -> Option<&str> {
        let lowered = text.to_lowercase();
        self.blocked
            .iter()
            .find(|word| lowered.contains(word.as_str()))
            .map(String::as_str)
    }
}

#[async_trait]
impl PipelineHook for ContentFilterHook {
    async fn before_model(
        &self,
        stage: &str,
        request: &ModelRequest,
    ) -> Result<Option<ModelResponse>> {
        let Some(message) = request.last_user_text() else {
            debug!(stage, "no user message in model request");
            return Ok(None);
        };
        if let Some(word) = self.blocked_word(message) {
            info!(stage, word, "blocked model request");
            return Ok(Some(ModelResponse::text(BLOCKED_REPLY)));
        }
        Ok(None)
    }

    async fn after_model(
        &self,
        stage: &str,
        response: &ModelResponse,
    ) -> Result<Option<ModelResponse>> {
        let mut total = 0;
        let parts: Vec<Part> = response
            .content
            .parts
            .iter()
            .map(|part| match part {
                Part::Text { text } if !text.trim().is_empty() => {
                    let (rewritten, count) = self.replacer.replace_all(text);
                    total += count;
                    Part::Text { text: rewritten }
                }
                Part::Text { .. } | Part::ToolCall { .. } | Part::CodeExecution { .. } => {
                    part.clone()
                }
            })
            .collect();

        if total == 0 {
            return Ok(None);
        }
        debug!(stage, replacements = total, "rewrote model response");
        Ok(Some(ModelResponse {
            content: Content {
                role: response.content.role,
                parts,
            },
        }))
    }
}

pub const VISIT_COUNTS_KEY: &str = "visit_counts";

/// Counts how many times each stage has been entered, under `visit_counts`.
#[derive(Debug, Default)]
pub struct VisitCounterHook;

#[async_trait]
impl PipelineHook for VisitCounterHook {
    async fn before_stage(&self, stage: &str, state: &mut State) -> Result<Option<Value>> {
        if !matches!(state.get(VISIT_COUNTS_KEY), Some(Value::Object(_))) {
            state.insert(VISIT_COUNTS_KEY, json!({}));
        }
        if let Some(Value::Object(counts)) = state.get_mut(VISIT_COUNTS_KEY) {
            let next = counts.get(stage).and_then(Value::as_u64).unwrap_or(0) + 1;
            counts.insert(stage.to_string(), json!(next));
        }
        Ok(None)
    }
}
