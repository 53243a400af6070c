//! Ready-made pipelines: lead qualification and post refinement.

use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::llm::LanguageModel;
use crate::stage::StageDescriptor;
use crate::stages::{
    EmailerAgent, GeneratorAgent, RefinerAgent, ReviewerAgent, ScorerAgent, ValidatorAgent,
    GENERATED_CONTENT_KEY, REFINED_CONTENT_KEY,
};
use crate::toolkit::{contact_toolkit, review_toolkit};
use crate::workflow::{LoopAgent, PipelineNode, SequentialAgent};

pub const LEAD_STATUS_KEY: &str = "lead_status";
pub const LEAD_SCORE_KEY: &str = "lead_score";
pub const EMAIL_DRAFT_KEY: &str = "email_draft";
pub const SUGGESTION_KEY: &str = "suggestion";
pub const REVIEW_LOOP_KEY: &str = "review_loop";

const VALIDATOR_INSTRUCTION: &str =
    "Validate contact details from user input and store structured status. \
     Current known state: {user_input}";
const SCORER_INSTRUCTION: &str = "Read prior validation from {lead_status}. \
     Score lead 1-10 using intent and contact validity.";
const EMAILER_INSTRUCTION: &str =
    "Use {lead_score} and {lead_status}. Draft outreach only when lead score > {threshold}.";

const GENERATOR_INSTRUCTION: &str = "You are an expert in generating LinkedIn posts.\n\
     Generate a LinkedIn post appreciating the contents of an AI course.\n\
     - Do not include hate speech or criticise any person, content or company.\n\
     - Maintain a professional tone.";
const REVIEWER_INSTRUCTION: &str = "You are an expert in reviewing LinkedIn posts. \
     Keep an eye on tone and length.\n\
     Generated content: {generated_content}";
const REFINER_INSTRUCTION: &str = "You are an expert in refining LinkedIn posts. \
     Keep an eye on tone and length.\n\
     Generated content: {generated_content}\n\
     Suggestions: {suggestion}";

/// Validator -> Scorer -> Emailer over the contact toolkit.
pub fn lead_pipeline(config: &PipelineConfig) -> Result<SequentialAgent> {
    let threshold = config.outreach.threshold;
    let nodes = vec![
        PipelineNode::stage(ValidatorAgent::new(StageDescriptor::new(
            "ValidatorAgent",
            LEAD_STATUS_KEY,
            VALIDATOR_INSTRUCTION,
        ))),
        PipelineNode::stage(
            ScorerAgent::new(StageDescriptor::new(
                "ScorerAgent",
                LEAD_SCORE_KEY,
                SCORER_INSTRUCTION,
            ))
            .with_keywords(config.scoring.keywords.iter().cloned())
            .with_baseline(config.scoring.baseline)
            .with_status_key(LEAD_STATUS_KEY),
        ),
        PipelineNode::stage(
            EmailerAgent::new(StageDescriptor::new(
                "EmailerAgent",
                EMAIL_DRAFT_KEY,
                EMAILER_INSTRUCTION.replace("{threshold}", &threshold.to_string()),
            ))
            .with_threshold(threshold)
            .with_score_key(LEAD_SCORE_KEY)
            .with_status_key(LEAD_STATUS_KEY),
        ),
    ];
    SequentialAgent::new("customer_lead_processor", nodes, contact_toolkit())
}

/// Generator followed by a bounded Reviewer/Refiner loop.
pub fn post_pipeline(
    config: &PipelineConfig,
    model: Arc<dyn LanguageModel>,
) -> Result<SequentialAgent> {
    let generate = GeneratorAgent::new(
        StageDescriptor::new("generate_agent", GENERATED_CONTENT_KEY, GENERATOR_INSTRUCTION),
        Arc::clone(&model),
    );
    let review = ReviewerAgent::new(StageDescriptor::new(
        "review_agent",
        SUGGESTION_KEY,
        REVIEWER_INSTRUCTION,
    ))
    .with_length_band(config.review.min_length, config.review.max_length);
    let refine = RefinerAgent::new(
        StageDescriptor::new("refine_agent", REFINED_CONTENT_KEY, REFINER_INSTRUCTION),
        model,
    )
    .with_suggestion_key(SUGGESTION_KEY);

    let review_refine = LoopAgent::new(
        "review_refine_agent",
        REVIEW_LOOP_KEY,
        vec![PipelineNode::stage(review), PipelineNode::stage(refine)],
    )
    .with_max_iterations(config.refinement.max_iterations);

    SequentialAgent::new(
        "root_agent_workflow",
        vec![PipelineNode::stage(generate), review_refine.into()],
        review_toolkit(),
    )
}
