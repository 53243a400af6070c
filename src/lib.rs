//! Sequential and looping agent pipelines over a shared JSON state.
//!
//! The crate provides:
//! - Stages (`Stage`) that read the state and produce one output value each.
//! - An orchestrator (`SequentialAgent`) that runs stages in order, owns the
//!   tool registry and stores each output under the stage's key.
//! - A bounded loop (`LoopAgent`) that repeats its body until a stage
//!   escalates or the iteration cap is hit.
//! - Hooks (`PipelineHook`) around stages, model calls and tool calls.

mod config;
mod error;
mod hooks;
mod llm;
mod message;
mod presets;
mod rewrite;
mod stage;
pub mod stages;
mod state;
mod telemetry;
mod template;
mod tool;
mod toolkit;
mod workflow;

pub use config::{
    LoggingConfig, OutreachConfig, PipelineConfig, RefinementConfig, ReviewConfig, ScoringConfig,
};
pub use error::{PipelineError, Result};
pub use hooks::{ContentFilterHook, PipelineHook, VisitCounterHook, BLOCKED_REPLY, VISIT_COUNTS_KEY};
pub use llm::{LanguageModel, ModelRequest, ModelResponse, StubModel};
pub use message::{Content, Part, Role};
pub use presets::{
    lead_pipeline, post_pipeline, EMAIL_DRAFT_KEY, LEAD_SCORE_KEY, LEAD_STATUS_KEY,
    REVIEW_LOOP_KEY, SUGGESTION_KEY,
};
pub use rewrite::{match_case, WordReplacer};
pub use stage::{FnStage, Stage, StageContext, StageDescriptor};
pub use state::{State, USER_INPUT_KEY};
pub use telemetry::{init_tracing, StageRecord, StageStatus};
pub use template::render;
pub use tool::{FunctionTool, Tool, ToolRegistry, ToolRequest, ToolResult};
pub use toolkit::{
    contact_toolkit, review_toolkit, NORMALIZE_PHONE, REVIEW_LENGTH, VERIFY_EMAIL_FORMAT,
};
pub use workflow::{
    ExitPredicate, ExitReason, LoopAgent, LoopReport, LoopStatus, PipelineNode, PipelineRun,
    SequentialAgent, DEFAULT_MAX_ITERATIONS,
};
