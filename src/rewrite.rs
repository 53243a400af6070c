//! Case-preserving word replacement.

use std::collections::BTreeMap;

use regex::{Captures, Regex, RegexBuilder};

use crate::error::{PipelineError, Result};

/// Reapply the casing class of `src` (all caps, title case, lowercase) to `dst`.
pub fn match_case(src: &str, dst: &str) -> String {
    let has_letters = src.chars().any(char::is_alphabetic);
    if has_letters && src.chars().all(|c| !c.is_alphabetic() || c.is_uppercase()) {
        return dst.to_uppercase();
    }
    if src.chars().next().is_some_and(char::is_uppercase) {
        let mut chars = dst.chars();
        return match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        };
    }
    dst.to_string()
}

/// Replaces whole words from a lowercase table, keeping each match's casing.
#[derive(Debug, Clone)]
pub struct WordReplacer {
    table: BTreeMap<String, String>,
    pattern: Option<Regex>,
}

impl WordReplacer {
    pub fn new<K, V>(table: impl IntoIterator<Item = (K, V)>) -> Result<Self>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let table: BTreeMap<String, String> = table
            .into_iter()
            .map(|(from, to)| (from.into().to_lowercase(), to.into()))
            .filter(|(from, _)| !from.is_empty())
            .collect();
        let pattern = if table.is_empty() {
            None
        } else {
            let alternation = table
                .keys()
                .map(|key| regex::escape(key))
                .collect::<Vec<_>>()
                .join("|");
            let regex = RegexBuilder::new(&format!(r"\b({alternation})\b"))
                .case_insensitive(true)
                .build()
                .map_err(|err| PipelineError::Config(format!("invalid replacement table: {err}")))?;
            Some(regex)
        };
        Ok(Self { table, pattern })
    }

    /// Replace every table word in `text`; returns the new text and the
    /// number of replacements made.
    pub fn replace_all(&self, text: &str) -> (String, usize) {
        let Some(pattern) = &self.pattern else {
            return (text.to_string(), 0);
        };
        let mut count = 0;
        let replaced = pattern.replace_all(text, |caps: &Captures<'_>| {
            let original = &caps[0];
            match self.table.get(&original.to_lowercase()) {
                Some(base) => {
                    count += 1;
                    match_case(original, base)
                }
                None => original.to_string(),
            }
        });
        (replaced.into_owned(), count)
    }
}
