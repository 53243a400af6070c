use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::stage::{Stage, StageContext, StageDescriptor};
use crate::state::State;
use crate::tool::ToolRequest;
use crate::toolkit::{DEFAULT_MAX_LENGTH, DEFAULT_MIN_LENGTH, REVIEW_LENGTH};

use super::{default_candidate_keys, latest_candidate};

pub const REVIEW_STATUS_KEY: &str = "review_status";

/// Checks the newest candidate against a length band through the
/// `review_length` tool. Writes `review_status` and returns the suggestion;
/// escalates when the candidate passes.
pub struct ReviewerAgent {
    descriptor: StageDescriptor,
    min_length: usize,
    max_length: usize,
    candidate_keys: Vec<String>,
}

impl ReviewerAgent {
    pub fn new(descriptor: StageDescriptor) -> Self {
        Self {
            descriptor,
            min_length: DEFAULT_MIN_LENGTH,
            max_length: DEFAULT_MAX_LENGTH,
            candidate_keys: default_candidate_keys(),
        }
    }

    pub fn with_length_band(mut self, min_length: usize, max_length: usize) -> Self {
        self.min_length = min_length;
        self.max_length = max_length;
        self
    }

    /// Keys to read the candidate from, newest first.
    pub fn with_candidate_keys(
        mut self,
        keys: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.candidate_keys = keys.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
impl Stage for ReviewerAgent {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn run(&self, state: &mut State, ctx: &StageContext<'_>) -> Result<Value> {
        let _instruction = self.render(state);
        let Some(candidate) = latest_candidate(state, &self.candidate_keys) else {
            state.insert(REVIEW_STATUS_KEY, json!("Fail"));
            return Ok(json!("no content to review"));
        };

        let review = ctx
            .execute_tool(ToolRequest::new(
                REVIEW_LENGTH,
                json!({
                    "text": candidate,
                    "min_length": self.min_length,
                    "max_length": self.max_length,
                }),
            ))
            .await;
        if !review.ok {
            return Err(PipelineError::stage(
                self.name(),
                review.error.unwrap_or_else(|| "review failed".into()),
            ));
        }

        let passed = review.field("status").and_then(Value::as_str) == Some("Pass");
        let suggestion = review
            .field("suggestion")
            .cloned()
            .unwrap_or(Value::String(String::new()));
        let length = review.field("length").and_then(Value::as_u64);
        debug!(
            stage = self.name(),
            length = ?length,
            passed,
            "reviewed candidate"
        );

        state.insert(REVIEW_STATUS_KEY, json!(if passed { "Pass" } else { "Fail" }));
        if passed {
            state.escalate();
        }
        Ok(suggestion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::GENERATED_CONTENT_KEY;
    use crate::tool::ToolRegistry;
    use crate::toolkit::review_toolkit;

    fn reviewer() -> ReviewerAgent {
        ReviewerAgent::new(StageDescriptor::new(
            "review_agent",
            "suggestion",
            "Review {generated_content}",
        ))
    }

    #[tokio::test]
    async fn long_content_fails_with_trim_suggestion() {
        let tools = review_toolkit();
        let ctx = StageContext::new("review_agent", "", &tools, &[]);
        let mut state = State::new();
        state.insert(GENERATED_CONTENT_KEY, json!("x".repeat(1200)));

        let suggestion = reviewer().run(&mut state, &ctx).await.unwrap();

        assert!(suggestion.as_str().unwrap().contains("decrease it by 200"));
        assert_eq!(state.get_str(REVIEW_STATUS_KEY), Some("Fail"));
        assert!(!state.is_escalated());
    }

    #[tokio::test]
    async fn content_in_band_escalates() {
        let tools = review_toolkit();
        let ctx = StageContext::new("review_agent", "", &tools, &[]);
        let mut state = State::new();
        state.insert(GENERATED_CONTENT_KEY, json!("x".repeat(1200)));
        state.insert("refined_content", json!("y".repeat(700)));

        reviewer().run(&mut state, &ctx).await.unwrap();

        assert_eq!(state.get_str(REVIEW_STATUS_KEY), Some("Pass"));
        assert!(state.is_escalated());
    }

    #[tokio::test]
    async fn missing_content_fails_softly() {
        let tools = review_toolkit();
        let ctx = StageContext::new("review_agent", "", &tools, &[]);
        let mut state = State::new();

        let suggestion = reviewer().run(&mut state, &ctx).await.unwrap();
        assert_eq!(suggestion, json!("no content to review"));
        assert_eq!(state.get_str(REVIEW_STATUS_KEY), Some("Fail"));
    }

    #[tokio::test]
    async fn missing_tool_is_a_stage_error() {
        let tools = ToolRegistry::new();
        let ctx = StageContext::new("review_agent", "", &tools, &[]);
        let mut state = State::new();
        state.insert(GENERATED_CONTENT_KEY, json!("text"));

        let err = reviewer().run(&mut state, &ctx).await.unwrap_err();
        assert!(matches!(err, PipelineError::Stage { .. }));
    }
}
