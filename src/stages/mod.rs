//! Concrete stages.
//!
//! Lead qualification: [`ValidatorAgent`] -> [`ScorerAgent`] -> [`EmailerAgent`].
//! Content refinement: [`GeneratorAgent`] followed by a loop of
//! [`ReviewerAgent`] and [`RefinerAgent`].

mod emailer;
mod generator;
mod refiner;
mod reviewer;
mod scorer;
mod validator;

pub use emailer::{EmailerAgent, DEFAULT_OUTREACH_THRESHOLD};
pub use generator::GeneratorAgent;
pub use refiner::RefinerAgent;
pub use reviewer::{ReviewerAgent, REVIEW_STATUS_KEY};
pub use scorer::{ScorerAgent, DEFAULT_BASELINE, DEFAULT_KEYWORDS};
pub use validator::ValidatorAgent;

use crate::state::State;

pub const GENERATED_CONTENT_KEY: &str = "generated_content";
pub const REFINED_CONTENT_KEY: &str = "refined_content";

/// Newest candidate text: the first of `keys` holding a string.
pub(crate) fn latest_candidate<'s>(state: &'s State, keys: &[String]) -> Option<&'s str> {
    keys.iter().find_map(|key| state.get_str(key))
}

pub(crate) fn default_candidate_keys() -> Vec<String> {
    vec![
        REFINED_CONTENT_KEY.to_string(),
        GENERATED_CONTENT_KEY.to_string(),
    ]
}
