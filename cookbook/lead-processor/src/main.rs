use std::env;

use stageflow::{
    init_tracing, lead_pipeline, post_pipeline, PipelineConfig, PipelineRun, StubModel,
    REVIEW_LOOP_KEY,
};
use tracing::info;

const SCENARIOS: [(&str, &str); 3] = [
    (
        "Valid email + high intent",
        "Hi I'm Sam, my email is sam@example.com. I need a demo and price quote urgently.",
    ),
    (
        "Invalid email/phone + low intent",
        "hello just browsing, email me at not-an-email and call at 12-34",
    ),
    (
        "Phone only + medium intent",
        "Hi, call me at +1 (415) 555-2671. Interested in options.",
    ),
];

const SENTENCE: &str = "Loved the AI course from Mr. ABC, clear lessons and practical labs. ";

fn load_config() -> stageflow::Result<PipelineConfig> {
    match env::args().nth(1) {
        Some(path) => PipelineConfig::from_env_or_file(path),
        None => {
            let mut config = PipelineConfig::default();
            config.apply_env();
            config.validate()?;
            Ok(config)
        }
    }
}

fn draft_of(len: usize) -> String {
    SENTENCE.chars().cycle().take(len).collect()
}

fn print_run(label: &str, run: &PipelineRun) -> stageflow::Result<()> {
    println!("{}", "=".repeat(80));
    println!("{label} (run {})", run.run_id);
    println!("{}", serde_json::to_string_pretty(&run.state)?);
    Ok(())
}

#[tokio::main]
async fn main() -> stageflow::Result<()> {
    let config = load_config()?;
    init_tracing(&config.logging)?;

    let leads = lead_pipeline(&config)?;
    for (label, input) in SCENARIOS {
        let run = leads.run(input, None).await;
        print_run(label, &run)?;
    }

    let model = StubModel::new(vec![draft_of(1200), draft_of(720)]);
    let posts = post_pipeline(&config, model)?;
    let run = posts.run("Write about the AI course from Mr. ABC", None).await;
    if let Some(report) = run.loop_report(REVIEW_LOOP_KEY) {
        info!(status = ?report.status, iterations = report.iterations, "review loop finished");
    }
    print_run("Post refinement", &run)
}
