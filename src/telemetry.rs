use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// The stage ran and its (possibly hook-rewritten) output was stored.
    Completed,
    /// A `before_stage` hook supplied the output; the stage did not run.
    Overridden,
    /// The stage or one of its hooks failed; a diagnostic was stored instead.
    Failed,
}

/// One entry of a run's trace, written after each stage or loop finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: String,
    pub output_key: String,
    pub status: StageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration: Option<usize>,
    pub output: Value,
}

/// Install a global fmt subscriber. `RUST_LOG` takes precedence over the
/// configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|err| PipelineError::Config(format!("invalid log filter: {err}")))?;
    let builder = fmt().with_env_filter(filter).with_target(false);
    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|err| PipelineError::Config(format!("failed to install tracing: {err}")))
}
