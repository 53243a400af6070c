use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::Result;
use crate::stage::{Stage, StageContext, StageDescriptor};
use crate::state::State;

pub const DEFAULT_KEYWORDS: [&str; 5] = ["buy", "price", "demo", "quote", "urgent"];
pub const DEFAULT_BASELINE: i64 = 5;

const MAX_KEYWORD_BONUS: i64 = 4;
const CONTACT_BONUS: i64 = 2;
const NO_KEYWORD_PENALTY: i64 = 1;
const NO_CONTACT_PENALTY: i64 = 3;

/// Scores a lead from 1 to 10 using intent keywords and contact validity.
pub struct ScorerAgent {
    descriptor: StageDescriptor,
    keywords: Vec<String>,
    baseline: i64,
    status_key: String,
}

impl ScorerAgent {
    pub fn new(descriptor: StageDescriptor) -> Self {
        Self {
            descriptor,
            keywords: DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            baseline: DEFAULT_BASELINE,
            status_key: "lead_status".into(),
        }
    }

    pub fn with_keywords(mut self, keywords: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.keywords = keywords
            .into_iter()
            .map(|k| k.into().to_lowercase())
            .collect();
        self
    }

    pub fn with_baseline(mut self, baseline: i64) -> Self {
        self.baseline = baseline;
        self
    }

    /// State key holding the validator's output.
    pub fn with_status_key(mut self, key: impl Into<String>) -> Self {
        self.status_key = key.into();
        self
    }
}

#[async_trait]
impl Stage for ScorerAgent {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn run(&self, state: &mut State, ctx: &StageContext<'_>) -> Result<Value> {
        let _instruction = self.render(state);
        let text = ctx.user_input().to_lowercase();

        let mut score = self.baseline;
        let mut reasons = Vec::new();

        let mut matches: Vec<&str> = Vec::new();
        for keyword in &self.keywords {
            if text.contains(keyword.as_str()) && !matches.contains(&keyword.as_str()) {
                matches.push(keyword);
            }
        }
        if matches.is_empty() {
            score -= NO_KEYWORD_PENALTY;
            reasons.push(format!("No high-intent keywords (-{NO_KEYWORD_PENALTY})."));
        } else {
            let bonus = (matches.len() as i64).min(MAX_KEYWORD_BONUS);
            score += bonus;
            reasons.push(format!(
                "Intent keywords found: {} (+{bonus}).",
                matches.join(", ")
            ));
        }

        let status = state.get(&self.status_key);
        let has_valid_contact = ["email_valid", "phone_valid"].iter().any(|flag| {
            status
                .and_then(|s| s.get(*flag))
                .and_then(Value::as_bool)
                .unwrap_or(false)
        });
        if has_valid_contact {
            score += CONTACT_BONUS;
            reasons.push(format!("Valid contact method present (+{CONTACT_BONUS})."));
        } else {
            score -= NO_CONTACT_PENALTY;
            reasons.push(format!("No valid contact method (-{NO_CONTACT_PENALTY})."));
        }

        let score = score.clamp(1, 10);
        Ok(json!({
            "lead_score": score,
            "score_rationale": reasons.join(" "),
            "matched_keywords": matches,
        }))
    }
}
