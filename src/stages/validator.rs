use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};

use crate::error::Result;
use crate::stage::{Stage, StageContext, StageDescriptor};
use crate::state::State;
use crate::tool::{ToolRequest, ToolResult};
use crate::toolkit::{NORMALIZE_PHONE, VERIFY_EMAIL_FORMAT};

fn email_candidate() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
            .expect("email pattern is valid")
    })
}

fn phone_candidate() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\+?\d[\d\s().-]{8,}\d").expect("phone pattern is valid"))
}

/// Pulls an email address and phone number out of free text and checks both
/// through the contact tools.
pub struct ValidatorAgent {
    descriptor: StageDescriptor,
}

impl ValidatorAgent {
    pub fn new(descriptor: StageDescriptor) -> Self {
        Self { descriptor }
    }

    /// An explicit mention of a channel wins over whichever channel validated.
    fn preferred_contact(text: &str, email_valid: bool, phone_valid: bool) -> Option<&'static str> {
        let lowered = text.to_lowercase();
        if lowered.contains("email") {
            Some("email")
        } else if lowered.contains("call") || lowered.contains("phone") {
            Some("phone")
        } else if email_valid {
            Some("email")
        } else if phone_valid {
            Some("phone")
        } else {
            None
        }
    }
}

#[async_trait]
impl Stage for ValidatorAgent {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn run(&self, state: &mut State, ctx: &StageContext<'_>) -> Result<Value> {
        let _instruction = self.render(state);
        let input = ctx.user_input();

        let email = email_candidate().find(input).map(|m| m.as_str().to_string());
        let phone_raw = phone_candidate().find(input).map(|m| m.as_str().to_string());

        let email_check = match &email {
            Some(email) => Some(
                ctx.execute_tool(ToolRequest::new(VERIFY_EMAIL_FORMAT, json!({ "email": email })))
                    .await,
            ),
            None => None,
        };
        let phone_check = match &phone_raw {
            Some(phone) => Some(
                ctx.execute_tool(ToolRequest::new(NORMALIZE_PHONE, json!({ "phone": phone })))
                    .await,
            ),
            None => None,
        };

        let email_valid = email_check.as_ref().is_some_and(|check| check.flag("valid"));
        let phone_valid = phone_check.as_ref().is_some_and(|check| check.flag("valid"));
        let phone = phone_check
            .as_ref()
            .and_then(|check| check.field("normalized"))
            .and_then(Value::as_str)
            .filter(|digits| !digits.is_empty())
            .map(str::to_string)
            .or_else(|| phone_raw.clone());

        let mut errors = Vec::new();
        if email.is_some() && !email_valid {
            errors.push("Detected email appears invalid.");
        }
        if phone_raw.is_some() && !phone_valid {
            errors.push("Detected phone appears invalid.");
        }
        if email.is_none() && phone_raw.is_none() {
            errors.push("No contact method detected.");
        }

        Ok(json!({
            "has_email": email.is_some(),
            "email": email,
            "email_valid": email_valid,
            "has_phone": phone_raw.is_some(),
            "phone": phone,
            "phone_valid": phone_valid,
            "preferred_contact": Self::preferred_contact(input, email_valid, phone_valid),
            "errors": errors,
            "tool_checks": {
                "email": email_check.as_ref().map(ToolResult::to_value),
                "phone": phone_check.as_ref().map(ToolResult::to_value),
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::ToolRegistry;
    use crate::toolkit::contact_toolkit;

    fn validator() -> ValidatorAgent {
        ValidatorAgent::new(StageDescriptor::new(
            "ValidatorAgent",
            "lead_status",
            "Validate contact details: {user_input}",
        ))
    }

    async fn validate(input: &str, tools: &ToolRegistry) -> Value {
        let ctx = StageContext::new("ValidatorAgent", input, tools, &[]);
        let mut state = State::new();
        validator().run(&mut state, &ctx).await.unwrap()
    }

    #[tokio::test]
    async fn detects_valid_email_and_prefers_it() {
        let tools = contact_toolkit();
        let status = validate(
            "Hi I'm Sam, my email is sam@example.com. I need a demo and price quote urgently.",
            &tools,
        )
        .await;

        assert_eq!(status["email"], json!("sam@example.com"));
        assert_eq!(status["email_valid"], json!(true));
        assert_eq!(status["has_phone"], json!(false));
        assert_eq!(status["preferred_contact"], json!("email"));
        assert_eq!(status["errors"], json!([]));
    }

    #[tokio::test]
    async fn phone_only_lead_is_normalized() {
        let tools = contact_toolkit();
        let status = validate(
            "Hi, call me at +1 (415) 555-2671. Interested in options.",
            &tools,
        )
        .await;

        assert_eq!(status["has_email"], json!(false));
        assert_eq!(status["phone"], json!("14155552671"));
        assert_eq!(status["phone_valid"], json!(true));
        assert_eq!(status["preferred_contact"], json!("phone"));
    }

    #[tokio::test]
    async fn reports_missing_contact_once() {
        let tools = contact_toolkit();
        let status = validate(
            "hello just browsing, email me at not-an-email and call at 12-34",
            &tools,
        )
        .await;

        assert_eq!(status["has_email"], json!(false));
        assert_eq!(status["has_phone"], json!(false));
        assert_eq!(status["errors"], json!(["No contact method detected."]));
        assert_eq!(status["preferred_contact"], json!("email"));
    }

    #[tokio::test]
    async fn no_keyword_and_no_valid_channel_means_no_preference() {
        let tools = contact_toolkit();
        let status = validate("reach me at bob@nowhere.c or 123 456 7", &tools).await;

        assert_eq!(status["preferred_contact"], Value::Null);
    }

    #[tokio::test]
    async fn failed_tools_mark_channels_invalid() {
        let tools = ToolRegistry::new();
        let status = validate("sam@example.com or +1 415 555 2671", &tools).await;

        assert_eq!(status["email_valid"], json!(false));
        assert_eq!(status["phone_valid"], json!(false));
        assert_eq!(status["phone"], json!("+1 415 555 2671"));
        assert_eq!(
            status["errors"],
            json!(["Detected email appears invalid.", "Detected phone appears invalid."])
        );
        assert_eq!(status["tool_checks"]["email"]["ok"], json!(false));
    }
}
