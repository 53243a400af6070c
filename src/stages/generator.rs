use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::llm::{LanguageModel, ModelRequest};
use crate::message::Content;
use crate::stage::{Stage, StageContext, StageDescriptor};
use crate::state::State;

/// Asks the model for a first candidate, using the rendered instruction and
/// the user input.
pub struct GeneratorAgent {
    descriptor: StageDescriptor,
    model: Arc<dyn LanguageModel>,
}

impl GeneratorAgent {
    pub fn new(descriptor: StageDescriptor, model: Arc<dyn LanguageModel>) -> Self {
        Self { descriptor, model }
    }
}

#[async_trait]
impl Stage for GeneratorAgent {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn run(&self, state: &mut State, ctx: &StageContext<'_>) -> Result<Value> {
        let request =
            ModelRequest::new(self.render(state)).with_content(Content::user(ctx.user_input()));
        let response = ctx.call_model(self.model.as_ref(), &request).await?;
        Ok(Value::String(response.as_text()))
    }
}
