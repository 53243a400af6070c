use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{PipelineError, Result};
use crate::llm::{LanguageModel, ModelRequest};
use crate::message::Content;
use crate::stage::{Stage, StageContext, StageDescriptor};
use crate::state::State;

use super::{default_candidate_keys, latest_candidate, REVIEW_STATUS_KEY};

/// Rewrites the newest candidate using the reviewer's suggestion. A candidate
/// that already passed review is carried forward unchanged.
pub struct RefinerAgent {
    descriptor: StageDescriptor,
    model: Arc<dyn LanguageModel>,
    candidate_keys: Vec<String>,
    suggestion_key: String,
}

impl RefinerAgent {
    pub fn new(descriptor: StageDescriptor, model: Arc<dyn LanguageModel>) -> Self {
        Self {
            descriptor,
            model,
            candidate_keys: default_candidate_keys(),
            suggestion_key: "suggestion".into(),
        }
    }

    pub fn with_candidate_keys(
        mut self,
        keys: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.candidate_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_suggestion_key(mut self, key: impl Into<String>) -> Self {
        self.suggestion_key = key.into();
        self
    }
}

#[async_trait]
impl Stage for RefinerAgent {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn run(&self, state: &mut State, ctx: &StageContext<'_>) -> Result<Value> {
        let candidate = latest_candidate(state, &self.candidate_keys)
            .ok_or_else(|| PipelineError::stage(self.name(), "no candidate to refine"))?
            .to_string();
        if state.get_str(REVIEW_STATUS_KEY) == Some("Pass") {
            return Ok(Value::String(candidate));
        }

        let suggestion = state.get_str(&self.suggestion_key).unwrap_or_default();
        let request = ModelRequest::new(self.render(state)).with_content(Content::user(format!(
            "Current draft:\n{candidate}\n\nReviewer suggestion: {suggestion}"
        )));
        let response = ctx.call_model(self.model.as_ref(), &request).await?;
        Ok(Value::String(response.as_text()))
    }
}
