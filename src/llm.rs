//! Language model abstraction.
//!
//! The model itself is an external collaborator: it maps a rendered
//! instruction plus conversation contents to a response. `StubModel` replays
//! scripted replies for tests and demos.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::message::{Content, Role};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRequest {
    pub instruction: String,
    pub contents: Vec<Content>,
}

impl ModelRequest {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            contents: Vec::new(),
        }
    }

    pub fn with_content(mut self, content: Content) -> Self {
        self.contents.push(content);
        self
    }

    /// Most recent user text, scanning contents newest first.
    pub fn last_user_text(&self) -> Option<&str> {
        self.contents
            .iter()
            .rev()
            .filter(|content| content.role == Role::User)
            .find_map(Content::first_text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub content: Content,
}

impl ModelResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: Content::model(text),
        }
    }

    pub fn as_text(&self) -> String {
        self.content.text()
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse>;
}

/// Replays a fixed list of replies in order and records every request.
pub struct StubModel {
    responses: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl StubModel {
    pub fn new(responses: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Requests seen so far, oldest first.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests
            .lock()
            .map(|seen| seen.clone())
            .unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().map(|queue| queue.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LanguageModel for StubModel {
    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse> {
        if let Ok(mut seen) = self.requests.lock() {
            seen.push(request.clone());
        }
        let mut queue = self
            .responses
            .lock()
            .map_err(|_| PipelineError::LanguageModel("stub model lock poisoned".into()))?;
        let raw = queue.pop_front().ok_or_else(|| {
            PipelineError::LanguageModel("StubModel ran out of scripted responses".into())
        })?;
        Ok(ModelResponse::text(raw))
    }
}
