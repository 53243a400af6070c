use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::stages::{DEFAULT_BASELINE, DEFAULT_KEYWORDS, DEFAULT_OUTREACH_THRESHOLD};
use crate::toolkit::{DEFAULT_MAX_LENGTH, DEFAULT_MIN_LENGTH};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoringConfig {
    #[serde(default = "default_keywords")]
    pub keywords: Vec<String>,
    #[serde(default = "default_baseline")]
    pub baseline: i64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            keywords: default_keywords(),
            baseline: default_baseline(),
        }
    }
}

fn default_keywords() -> Vec<String> {
    DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect()
}

fn default_baseline() -> i64 {
    DEFAULT_BASELINE
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutreachConfig {
    #[serde(default = "default_threshold")]
    pub threshold: i64,
}

impl Default for OutreachConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
        }
    }
}

fn default_threshold() -> i64 {
    DEFAULT_OUTREACH_THRESHOLD
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewConfig {
    #[serde(default = "default_min_length")]
    pub min_length: usize,
    #[serde(default = "default_max_length")]
    pub max_length: usize,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            min_length: default_min_length(),
            max_length: default_max_length(),
        }
    }
}

fn default_min_length() -> usize {
    DEFAULT_MIN_LENGTH
}

fn default_max_length() -> usize {
    DEFAULT_MAX_LENGTH
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefinementConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
        }
    }
}

fn default_max_iterations() -> usize {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

fn default_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub outreach: OutreachConfig,
    #[serde(default)]
    pub review: ReviewConfig,
    #[serde(default)]
    pub refinement: RefinementConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn parsed_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|raw| raw.trim().parse().ok())
}

impl PipelineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(raw)
            .map_err(|err| PipelineError::Config(format!("Failed to parse configuration: {err}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn from_env_or_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut cfg = Self::from_file(path)?;
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply `STAGEFLOW_*` overrides. Values that do not parse are ignored.
    pub fn apply_env(&mut self) {
        if let Some(threshold) = parsed_env("STAGEFLOW_EMAIL_THRESHOLD") {
            self.outreach.threshold = threshold;
        }
        if let Some(max) = parsed_env("STAGEFLOW_MAX_ITERATIONS") {
            self.refinement.max_iterations = max;
        }
        if let Some(min) = parsed_env("STAGEFLOW_REVIEW_MIN") {
            self.review.min_length = min;
        }
        if let Some(max) = parsed_env("STAGEFLOW_REVIEW_MAX") {
            self.review.max_length = max;
        }
        if let Ok(level) = env::var("STAGEFLOW_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = parsed_env("STAGEFLOW_LOG_JSON") {
            self.logging.json = json;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.review.min_length > self.review.max_length {
            return Err(PipelineError::Config(format!(
                "review.min_length ({}) exceeds review.max_length ({})",
                self.review.min_length, self.review.max_length
            )));
        }
        if self.refinement.max_iterations == 0 {
            return Err(PipelineError::Config(
                "refinement.max_iterations must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
