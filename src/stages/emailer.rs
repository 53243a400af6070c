use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};

use crate::error::Result;
use crate::stage::{Stage, StageContext, StageDescriptor};
use crate::state::State;

pub const DEFAULT_OUTREACH_THRESHOLD: i64 = 7;

fn self_introduction() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(?:i\s*am|i'm)\s+([A-Za-z][A-Za-z'-]{1,30})\b")
            .expect("introduction pattern is valid")
    })
}

fn title_case(word: &str) -> String {
    let mut out = String::with_capacity(word.len());
    let mut start = true;
    for c in word.chars() {
        if start {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        start = !c.is_alphabetic();
    }
    out
}

/// Name from an "I am X" / "I'm X" phrase, title-cased.
pub(crate) fn extract_name(text: &str) -> Option<String> {
    self_introduction()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| title_case(m.as_str()))
}

/// Drafts an outreach email for leads scoring above the threshold.
pub struct EmailerAgent {
    descriptor: StageDescriptor,
    threshold: i64,
    score_key: String,
    status_key: String,
}

impl EmailerAgent {
    pub fn new(descriptor: StageDescriptor) -> Self {
        Self {
            descriptor,
            threshold: DEFAULT_OUTREACH_THRESHOLD,
            score_key: "lead_score".into(),
            status_key: "lead_status".into(),
        }
    }

    pub fn with_threshold(mut self, threshold: i64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_score_key(mut self, key: impl Into<String>) -> Self {
        self.score_key = key.into();
        self
    }

    pub fn with_status_key(mut self, key: impl Into<String>) -> Self {
        self.status_key = key.into();
        self
    }

    fn draft(&self, name: &str, preferred: &str, contact_hint: &str) -> String {
        format!(
            "Subject: Quick follow-up on your request\n\n\
             Hi {name},\n\n\
             Thanks for reaching out. I saw your interest and wanted to help right away. \
             Based on your message, we can share pricing details and schedule a short demo this week.\n\n\
             If helpful, reply here and we'll send next steps. Preferred contact noted: {preferred} ({contact_hint}).\n\n\
             Best,\nCustomer Lead Team"
        )
    }
}

#[async_trait]
impl Stage for EmailerAgent {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn run(&self, state: &mut State, ctx: &StageContext<'_>) -> Result<Value> {
        let _instruction = self.render(state);
        let score = state
            .get(&self.score_key)
            .and_then(|blob| blob.get("lead_score"))
            .and_then(Value::as_i64);

        let Some(score) = score else {
            return Ok(json!({ "email_drafted": null, "reason": "Missing lead score." }));
        };
        if score <= self.threshold {
            return Ok(json!({
                "email_drafted": null,
                "reason": format!("Lead score {score} is not above threshold ({}).", self.threshold),
            }));
        }

        let status = state.get(&self.status_key);
        let field = |key: &str| status.and_then(|s| s.get(key)).and_then(Value::as_str);
        let name = extract_name(ctx.user_input()).unwrap_or_else(|| "there".to_string());
        let preferred = field("preferred_contact").unwrap_or("email");
        let contact_hint = if preferred == "email" {
            field("email")
        } else {
            field("phone")
        }
        .unwrap_or("not provided");

        Ok(json!({
            "email_drafted": self.draft(&name, preferred, contact_hint),
            "reason": "Lead is eligible for outreach.",
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::ToolRegistry;

    fn emailer() -> EmailerAgent {
        EmailerAgent::new(StageDescriptor::new(
            "EmailerAgent",
            "email_draft",
            "Use {lead_score} and {lead_status}.",
        ))
    }

    async fn draft(input: &str, score: Option<i64>) -> Value {
        let tools = ToolRegistry::new();
        let ctx = StageContext::new("EmailerAgent", input, &tools, &[]);
        let mut state = State::new();
        state.insert(
            "lead_status",
            json!({"email": "sam@example.com", "preferred_contact": "email"}),
        );
        if let Some(score) = score {
            state.insert("lead_score", json!({"lead_score": score}));
        }
        emailer().run(&mut state, &ctx).await.unwrap()
    }

    #[test]
    fn extracts_and_title_cases_names() {
        assert_eq!(extract_name("Hi I'm sam, hello"), Some("Sam".into()));
        assert_eq!(extract_name("i am o'neil"), Some("O'Neil".into()));
        assert_eq!(extract_name("nobody here"), None);
    }

    #[tokio::test]
    async fn drafts_above_threshold() {
        let result = draft("Hi I'm Sam, send a quote", Some(10)).await;
        let body = result["email_drafted"].as_str().unwrap();
        assert!(body.contains("Hi Sam,"));
        assert!(body.contains("email (sam@example.com)"));
        assert_eq!(result["reason"], json!("Lead is eligible for outreach."));
    }

    #[tokio::test]
    async fn skips_at_or_below_threshold() {
        let result = draft("Hi I'm Sam", Some(6)).await;
        assert_eq!(result["email_drafted"], Value::Null);
        assert!(result["reason"].as_str().unwrap().contains("threshold (7)"));

        let boundary = draft("Hi I'm Sam", Some(7)).await;
        assert_eq!(boundary["email_drafted"], Value::Null);
    }

    #[tokio::test]
    async fn missing_score_is_reported() {
        let result = draft("anything", None).await;
        assert_eq!(result["reason"], json!("Missing lead score."));
    }

    #[tokio::test]
    async fn defaults_greeting_without_name() {
        let result = draft("send me a quote", Some(9)).await;
        assert!(result["email_drafted"].as_str().unwrap().contains("Hi there,"));
    }
}
