//! Instruction templates with `{key}` placeholders.
//!
//! Placeholders are resolved by exact match against top-level state keys.
//! Unknown keys are left in place so a stage can render before its upstream
//! inputs exist (first pass of a loop, for example).

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::state::State;

fn placeholder() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
    })
}

/// Render a value the way it should appear inline in an instruction.
/// Strings are inserted raw; everything else as compact JSON.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

pub fn render(template: &str, state: &State) -> String {
    placeholder()
        .replace_all(template, |caps: &Captures<'_>| match state.get(&caps[1]) {
            Some(value) => display_value(value),
            None => caps[0].to_string(),
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn substitutes_known_keys() {
        let mut state = State::new();
        state.insert("user_input", json!("hello"));
        state.insert("lead_status", json!({"email_valid": true}));
        state.insert("score", json!(9));

        let rendered = render("In: {user_input} / {lead_status} / {score}", &state);
        assert_eq!(rendered, r#"In: hello / {"email_valid":true} / 9"#);
    }

    #[test]
    fn leaves_unknown_placeholders_verbatim() {
        let state = State::new();
        let rendered = render("time {current_time}, content {generated_content}", &state);
        assert_eq!(rendered, "time {current_time}, content {generated_content}");
    }

    #[test]
    fn ignores_braces_that_are_not_placeholders() {
        let mut state = State::new();
        state.insert("x", json!("1"));
        assert_eq!(render("{ x } {x} {}", &state), "{ x } 1 {}");
    }
}
