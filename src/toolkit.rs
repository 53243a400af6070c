use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};

use crate::error::{PipelineError, Result};
use crate::tool::{Tool, ToolRegistry};

pub const VERIFY_EMAIL_FORMAT: &str = "verify_email_format";
pub const NORMALIZE_PHONE: &str = "normalize_phone";
pub const REVIEW_LENGTH: &str = "review_length";

pub const DEFAULT_MIN_LENGTH: usize = 500;
pub const DEFAULT_MAX_LENGTH: usize = 1000;

/// Tools used by the lead-qualification stages.
pub fn contact_toolkit() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(VerifyEmailTool);
    registry.register(NormalizePhoneTool);
    registry
}

/// Tools used by the review/refine loop.
pub fn review_toolkit() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(ReviewLengthTool);
    registry
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$")
            .expect("email pattern is valid")
    })
}

fn string_arg<'a>(args: &'a Value, tool: &str, key: &str) -> Result<&'a str> {
    args.get(key).and_then(Value::as_str).ok_or_else(|| {
        PipelineError::invalid_arguments(tool, format!("missing string argument `{key}`"))
    })
}

fn length_arg(args: &Value, key: &str, default: usize) -> usize {
    args.get(key)
        .and_then(Value::as_u64)
        .map(|value| value as usize)
        .unwrap_or(default)
}

struct VerifyEmailTool;

#[async_trait]
impl Tool for VerifyEmailTool {
    fn name(&self) -> &str {
        VERIFY_EMAIL_FORMAT
    }

    fn description(&self) -> &str {
        "Check that an address looks like an email. Expects {\"email\": string}."
    }

    async fn call(&self, args: Value) -> Result<Value> {
        let email = string_arg(&args, self.name(), "email")?;
        Ok(json!({ "email": email, "valid": email_pattern().is_match(email) }))
    }
}

struct NormalizePhoneTool;

#[async_trait]
impl Tool for NormalizePhoneTool {
    fn name(&self) -> &str {
        NORMALIZE_PHONE
    }

    fn description(&self) -> &str {
        "Strip a phone number down to digits; valid when 10 to 15 digits remain. Expects {\"phone\": string}."
    }

    async fn call(&self, args: Value) -> Result<Value> {
        let phone = string_arg(&args, self.name(), "phone")?;
        let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
        let valid = (10..=15).contains(&digits.len());
        Ok(json!({ "raw": phone, "normalized": digits, "valid": valid }))
    }
}

struct ReviewLengthTool;

#[async_trait]
impl Tool for ReviewLengthTool {
    fn name(&self) -> &str {
        REVIEW_LENGTH
    }

    fn description(&self) -> &str {
        "Check text length against a band. Expects {\"text\": string, \"min_length\"?: int, \"max_length\"?: int}."
    }

    async fn call(&self, args: Value) -> Result<Value> {
        let text = string_arg(&args, self.name(), "text")?;
        let min = length_arg(&args, "min_length", DEFAULT_MIN_LENGTH);
        let max = length_arg(&args, "max_length", DEFAULT_MAX_LENGTH);
        if min > max {
            return Err(PipelineError::invalid_arguments(
                self.name(),
                format!("min_length {min} exceeds max_length {max}"),
            ));
        }

        let length = text.chars().count();
        let (status, suggestion) = if length > max {
            let diff = length - max;
            (
                "Fail",
                format!("text is long, decrease it by {diff} characters to match max length of {max}"),
            )
        } else if length < min {
            let diff = min - length;
            (
                "Fail",
                format!("text is short, increase it by {diff} characters to match min length of {min}"),
            )
        } else {
            (
                "Pass",
                format!("text is fine, no change in length required, it is between min length of {min} and max length of {max}"),
            )
        };

        Ok(json!({
            "status": status,
            "suggestion": suggestion,
            "length": length,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::ToolRequest;

    #[tokio::test]
    async fn verifies_email_format() {
        let tools = contact_toolkit();
        let good = tools
            .execute(&ToolRequest::new(VERIFY_EMAIL_FORMAT, json!({"email": "sam@example.com"})))
            .await;
        let bad = tools
            .execute(&ToolRequest::new(VERIFY_EMAIL_FORMAT, json!({"email": "not-an-email"})))
            .await;

        assert!(good.flag("valid"));
        assert!(bad.ok);
        assert!(!bad.flag("valid"));
    }

    #[tokio::test]
    async fn normalizes_phone_numbers() {
        let tools = contact_toolkit();
        let outcome = tools
            .execute(&ToolRequest::new(NORMALIZE_PHONE, json!({"phone": "+1 (415) 555-2671"})))
            .await;

        assert!(outcome.flag("valid"));
        assert_eq!(outcome.field("normalized"), Some(&json!("14155552671")));

        let short = tools
            .execute(&ToolRequest::new(NORMALIZE_PHONE, json!({"phone": "12-34"})))
            .await;
        assert!(!short.flag("valid"));
    }

    #[tokio::test]
    async fn missing_argument_fails_without_panicking() {
        let tools = contact_toolkit();
        let outcome = tools
            .execute(&ToolRequest::new(VERIFY_EMAIL_FORMAT, json!({})))
            .await;
        assert!(!outcome.ok);
        assert!(outcome.error.unwrap().contains("email"));
    }

    #[tokio::test]
    async fn reviews_length_band() {
        let tools = review_toolkit();
        let long = tools
            .execute(&ToolRequest::new(REVIEW_LENGTH, json!({"text": "x".repeat(1200)})))
            .await;
        assert_eq!(long.field("status"), Some(&json!("Fail")));
        assert!(long.field("suggestion").unwrap().as_str().unwrap().contains("decrease it by 200"));

        let short = tools
            .execute(&ToolRequest::new(REVIEW_LENGTH, json!({"text": "x".repeat(450)})))
            .await;
        assert!(short.field("suggestion").unwrap().as_str().unwrap().contains("increase it by 50"));

        let fine = tools
            .execute(&ToolRequest::new(
                REVIEW_LENGTH,
                json!({"text": "x".repeat(20), "min_length": 10, "max_length": 30}),
            ))
            .await;
        assert_eq!(fine.field("status"), Some(&json!("Pass")));
    }
}
