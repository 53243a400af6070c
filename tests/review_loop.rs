use std::sync::Arc;

use serde_json::{json, Value};
use stageflow::stages::{ReviewerAgent, REVIEW_STATUS_KEY};
use stageflow::{
    post_pipeline, review_toolkit, ExitReason, FnStage, LoopAgent, LoopReport, LoopStatus,
    PipelineConfig, PipelineNode, SequentialAgent, StageDescriptor, StageStatus, StubModel,
    REVIEW_LOOP_KEY, SUGGESTION_KEY,
};

fn chars(n: usize) -> String {
    "x".repeat(n)
}

#[tokio::test]
async fn long_draft_is_refined_until_it_fits() {
    let model = StubModel::new(vec![chars(1200), chars(700)]);
    let pipeline = post_pipeline(&PipelineConfig::default(), model.clone()).unwrap();

    let run = pipeline.run("AI course by Mr. ABC", None).await;

    assert_eq!(
        run.loop_report(REVIEW_LOOP_KEY),
        Some(LoopReport {
            status: LoopStatus::Exited(ExitReason::Escalated),
            iterations: 2
        })
    );
    assert_eq!(run.state.get_str("refined_content").map(str::len), Some(700));
    assert_eq!(run.state.get_str(REVIEW_STATUS_KEY), Some("Pass"));
    assert!(run.state.get_str(SUGGESTION_KEY).unwrap().starts_with("text is fine"));

    let suggestions: Vec<&Value> = run
        .records_for("review_agent")
        .map(|record| &record.output)
        .collect();
    assert_eq!(suggestions.len(), 2);
    assert!(suggestions[0].as_str().unwrap().contains("decrease it by 200"));

    assert_eq!(model.remaining(), 0);
    assert_eq!(model.requests().len(), 2);
    assert!(!run.state.is_escalated());
}

#[tokio::test]
async fn first_draft_in_band_exits_after_one_pass() {
    let model = StubModel::new(vec![chars(600)]);
    let pipeline = post_pipeline(&PipelineConfig::default(), model.clone()).unwrap();

    let run = pipeline.run("", None).await;

    assert_eq!(
        run.loop_report(REVIEW_LOOP_KEY),
        Some(LoopReport {
            status: LoopStatus::Exited(ExitReason::Escalated),
            iterations: 1
        })
    );
    // The refiner carried the passing draft forward without asking the model.
    assert_eq!(model.requests().len(), 1);
    assert_eq!(run.state.get_str("refined_content").map(str::len), Some(600));
}

#[tokio::test]
async fn stubborn_draft_hits_the_cap() {
    let model = StubModel::new(vec![chars(1500), chars(1400), chars(1300), chars(1200)]);
    let mut config = PipelineConfig::default();
    config.refinement.max_iterations = 3;
    let pipeline = post_pipeline(&config, model).unwrap();

    let run = pipeline.run("", None).await;

    assert_eq!(
        run.loop_report(REVIEW_LOOP_KEY),
        Some(LoopReport {
            status: LoopStatus::CapReached,
            iterations: 3
        })
    );
    assert_eq!(run.records_for("review_agent").count(), 3);
    assert_eq!(run.records_for("refine_agent").count(), 3);
    assert_eq!(run.state.get_str(REVIEW_STATUS_KEY), Some("Fail"));
    assert_eq!(run.state.get_str("refined_content").map(str::len), Some(1200));
}

#[tokio::test]
async fn model_failure_degrades_to_a_diagnostic() {
    let model = StubModel::new(vec![chars(1200)]);
    let mut config = PipelineConfig::default();
    config.refinement.max_iterations = 2;
    let pipeline = post_pipeline(&config, model).unwrap();

    let run = pipeline.run("", None).await;

    let refined = run.state.get("refined_content").unwrap();
    assert_eq!(refined["stage"], json!("refine_agent"));
    assert!(refined["error"].as_str().unwrap().contains("scripted responses"));
    assert!(run
        .records_for("refine_agent")
        .all(|record| record.status == StageStatus::Failed));
    assert_eq!(
        run.loop_report(REVIEW_LOOP_KEY).map(|report| report.status),
        Some(LoopStatus::CapReached)
    );
}

#[tokio::test]
async fn loop_nested_in_a_sequence_resumes_the_outer_order() {
    let seed = PipelineNode::stage(FnStage::new(
        StageDescriptor::new("seed", "generated_content", ""),
        |_, _| Ok(json!(chars(800))),
    ));
    let review = ReviewerAgent::new(StageDescriptor::new("review", "suggestion", ""));
    let looped = LoopAgent::new("check", "check_report", vec![PipelineNode::stage(review)])
        .with_max_iterations(5);
    let after = PipelineNode::stage(FnStage::new(
        StageDescriptor::new("after", "after_loop", ""),
        |state, _| Ok(json!(state.get_str(REVIEW_STATUS_KEY) == Some("Pass"))),
    ));

    let pipeline = SequentialAgent::new(
        "nested",
        vec![PipelineNode::Sequence(vec![seed, looped.into()]), after],
        review_toolkit(),
    )
    .unwrap();
    let run = pipeline.run("", None).await;

    let order: Vec<(&str, Option<usize>)> = run
        .trace
        .iter()
        .map(|record| (record.stage.as_str(), record.iteration))
        .collect();
    assert_eq!(
        order,
        vec![("seed", None), ("review", Some(1)), ("check", None), ("after", None)]
    );
    assert_eq!(run.state.get("after_loop"), Some(&json!(true)));
}

#[tokio::test]
async fn escalation_outside_a_loop_is_ignored() {
    let escalating = PipelineNode::stage(FnStage::new(
        StageDescriptor::new("eager", "eager_out", ""),
        |state, _| {
            state.escalate();
            Ok(json!("done"))
        },
    ));
    let counter = PipelineNode::stage(FnStage::new(
        StageDescriptor::new("count", "count", ""),
        |state, _| Ok(json!(state.get("count").and_then(Value::as_i64).unwrap_or(0) + 1)),
    ));
    let looped = LoopAgent::new("repeat", "repeat_report", vec![counter]).with_max_iterations(2);

    let pipeline =
        SequentialAgent::new("p", vec![escalating, looped.into()], review_toolkit()).unwrap();
    let run = pipeline.run("", None).await;

    // The flag raised before the loop does not cut the loop short.
    assert_eq!(run.state.get("count"), Some(&json!(2)));
    assert_eq!(
        run.loop_report("repeat_report").map(|report| report.status),
        Some(LoopStatus::CapReached)
    );
    assert!(!run.state.is_escalated());
}

#[tokio::test]
async fn pipelines_are_shareable_across_tasks() {
    let model = StubModel::new(vec![chars(600), chars(650)]);
    let pipeline = Arc::new(post_pipeline(&PipelineConfig::default(), model).unwrap());

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move { pipeline.run("", None).await })
        })
        .collect();

    for handle in handles {
        let run = handle.await.unwrap();
        assert_eq!(
            run.loop_report(REVIEW_LOOP_KEY).map(|report| report.iterations),
            Some(1)
        );
    }
}

#[tokio::test]
async fn escalation_before_an_inner_loop_still_ends_the_outer_loop() {
    let escalating = PipelineNode::stage(FnStage::new(
        StageDescriptor::new("approve", "approve_out", ""),
        |state, _| {
            state.escalate();
            Ok(json!("approved"))
        },
    ));
    let tick = PipelineNode::stage(FnStage::new(
        StageDescriptor::new("tick", "ticks", ""),
        |state, _| Ok(json!(state.get("ticks").and_then(Value::as_i64).unwrap_or(0) + 1)),
    ));
    let inner = LoopAgent::new("inner", "inner_report", vec![tick]).with_max_iterations(1);
    let outer = LoopAgent::new("outer", "outer_report", vec![escalating, inner.into()])
        .with_max_iterations(5);

    let pipeline = SequentialAgent::new("p", vec![outer.into()], review_toolkit()).unwrap();
    let run = pipeline.run("", None).await;

    assert_eq!(
        run.loop_report("outer_report"),
        Some(LoopReport {
            status: LoopStatus::Exited(ExitReason::Escalated),
            iterations: 1
        })
    );
    assert_eq!(
        run.loop_report("inner_report"),
        Some(LoopReport {
            status: LoopStatus::CapReached,
            iterations: 1
        })
    );
    assert_eq!(run.state.get("ticks"), Some(&json!(1)));
}

#[tokio::test]
async fn inner_escalation_stays_with_the_inner_loop() {
    let seed = PipelineNode::stage(FnStage::new(
        StageDescriptor::new("seed", "generated_content", ""),
        |_, _| Ok(json!(chars(800))),
    ));
    let review = ReviewerAgent::new(StageDescriptor::new("review", "suggestion", ""));
    let inner = LoopAgent::new("inner", "inner_report", vec![PipelineNode::stage(review)]);
    let outer = LoopAgent::new("outer", "outer_report", vec![seed, inner.into()])
        .with_max_iterations(2);

    let pipeline = SequentialAgent::new("p", vec![outer.into()], review_toolkit()).unwrap();
    let run = pipeline.run("", None).await;

    assert_eq!(
        run.loop_report("inner_report").map(|report| report.status),
        Some(LoopStatus::Exited(ExitReason::Escalated))
    );
    assert_eq!(
        run.loop_report("outer_report"),
        Some(LoopReport {
            status: LoopStatus::CapReached,
            iterations: 2
        })
    );
}
