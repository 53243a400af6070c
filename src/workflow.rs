use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Value};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::hooks::PipelineHook;
use crate::stage::{dispatch_tool, guard_hook, Stage, StageContext};
use crate::state::{State, USER_INPUT_KEY};
use crate::telemetry::{StageRecord, StageStatus};
use crate::tool::{panic_message, ToolRegistry, ToolRequest, ToolResult};

pub const DEFAULT_MAX_ITERATIONS: usize = 3;

pub type ExitPredicate = Arc<dyn Fn(&State) -> bool + Send + Sync>;

/// Why a loop stopped before its iteration cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// A stage called [`State::escalate`] during the pass.
    Escalated,
    /// The loop's exit predicate held after the pass.
    Predicate,
}

impl ExitReason {
    fn as_str(self) -> &'static str {
        match self {
            ExitReason::Escalated => "escalated",
            ExitReason::Predicate => "predicate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    Running,
    Exited(ExitReason),
    CapReached,
}

impl LoopStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, LoopStatus::Running)
    }
}

/// Terminal report a loop stores under its output key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopReport {
    pub status: LoopStatus,
    pub iterations: usize,
}

impl LoopReport {
    pub fn to_value(&self) -> Value {
        match self.status {
            LoopStatus::Running => json!({ "status": "running", "iterations": self.iterations }),
            LoopStatus::Exited(reason) => json!({
                "status": "exited",
                "reason": reason.as_str(),
                "iterations": self.iterations,
            }),
            LoopStatus::CapReached => {
                json!({ "status": "cap_reached", "iterations": self.iterations })
            }
        }
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        let iterations = value.get("iterations")?.as_u64()? as usize;
        let status = match value.get("status")?.as_str()? {
            "running" => LoopStatus::Running,
            "cap_reached" => LoopStatus::CapReached,
            "exited" => LoopStatus::Exited(match value.get("reason")?.as_str()? {
                "escalated" => ExitReason::Escalated,
                "predicate" => ExitReason::Predicate,
                _ => return None,
            }),
            _ => return None,
        };
        Some(Self { status, iterations })
    }
}

/// Repeats its body until a stage escalates, the exit predicate holds, or
/// the iteration cap is reached. The cap is always enforced.
#[derive(Clone)]
pub struct LoopAgent {
    name: String,
    output_key: String,
    body: Vec<PipelineNode>,
    max_iterations: usize,
    exit_when: Option<ExitPredicate>,
}

impl LoopAgent {
    pub fn new(
        name: impl Into<String>,
        output_key: impl Into<String>,
        body: Vec<PipelineNode>,
    ) -> Self {
        Self {
            name: name.into(),
            output_key: output_key.into(),
            body,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            exit_when: None,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    /// Extra exit condition checked after each pass, alongside escalation.
    pub fn exit_when(
        mut self,
        predicate: impl Fn(&State) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.exit_when = Some(Arc::new(predicate));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn output_key(&self) -> &str {
        &self.output_key
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    fn status_after_pass(&self, state: &mut State, passes: usize) -> LoopStatus {
        if state.take_escalation() {
            LoopStatus::Exited(ExitReason::Escalated)
        } else if self.exit_when.as_ref().is_some_and(|done| done(&*state)) {
            LoopStatus::Exited(ExitReason::Predicate)
        } else if passes >= self.max_iterations {
            LoopStatus::CapReached
        } else {
            LoopStatus::Running
        }
    }
}

#[derive(Clone)]
pub enum PipelineNode {
    Stage(Arc<dyn Stage>),
    Sequence(Vec<PipelineNode>),
    Loop(LoopAgent),
}

impl PipelineNode {
    pub fn stage<S: Stage + 'static>(stage: S) -> Self {
        PipelineNode::Stage(Arc::new(stage))
    }

    fn execute<'s, 'r: 's>(&'s self, run: &'s mut RunScope<'r>) -> BoxFuture<'s, ()> {
        Box::pin(async move {
            match self {
                PipelineNode::Stage(stage) => run_stage(stage.as_ref(), run).await,
                PipelineNode::Sequence(nodes) => {
                    for node in nodes {
                        node.execute(run).await;
                    }
                }
                PipelineNode::Loop(looped) => run_loop(looped, run).await,
            }
        })
    }

    fn collect_identities(
        &self,
        names: &mut HashSet<String>,
        keys: &mut HashSet<String>,
    ) -> Result<()> {
        match self {
            PipelineNode::Stage(stage) => claim(stage.name(), stage.output_key(), names, keys),
            PipelineNode::Sequence(nodes) => nodes
                .iter()
                .try_for_each(|node| node.collect_identities(names, keys)),
            PipelineNode::Loop(looped) => {
                claim(&looped.name, &looped.output_key, names, keys)?;
                looped
                    .body
                    .iter()
                    .try_for_each(|node| node.collect_identities(names, keys))
            }
        }
    }
}

impl From<LoopAgent> for PipelineNode {
    fn from(looped: LoopAgent) -> Self {
        PipelineNode::Loop(looped)
    }
}

fn claim(
    name: &str,
    output_key: &str,
    names: &mut HashSet<String>,
    keys: &mut HashSet<String>,
) -> Result<()> {
    if output_key == USER_INPUT_KEY {
        return Err(PipelineError::ReservedKey(output_key.to_string()));
    }
    if !names.insert(name.to_string()) {
        return Err(PipelineError::DuplicateStage(name.to_string()));
    }
    if !keys.insert(output_key.to_string()) {
        return Err(PipelineError::DuplicateOutputKey(output_key.to_string()));
    }
    Ok(())
}

/// Everything one run owns or borrows from the orchestrator.
struct RunScope<'r> {
    tools: &'r ToolRegistry,
    hooks: &'r [Arc<dyn PipelineHook>],
    user_input: &'r str,
    state: State,
    trace: Vec<StageRecord>,
    iteration: Option<usize>,
}

fn failure_output(stage: &str, message: impl Into<String>) -> Value {
    json!({ "error": message.into(), "stage": stage })
}

async fn run_stage(stage: &dyn Stage, run: &mut RunScope<'_>) {
    let name = stage.name();
    let (tools, hooks, user_input) = (run.tools, run.hooks, run.user_input);

    let mut status = StageStatus::Completed;
    let mut overridden = None;
    for hook in hooks {
        match guard_hook(name, hook.before_stage(name, &mut run.state)).await {
            Ok(Some(value)) if !value.is_null() => {
                status = StageStatus::Overridden;
                overridden = Some(value);
                break;
            }
            Ok(_) => {}
            Err(err) => {
                status = StageStatus::Failed;
                overridden = Some(failure_output(name, err.to_string()));
                break;
            }
        }
    }

    let mut output = match overridden {
        Some(value) => value,
        None => {
            let ctx = StageContext::new(name, user_input, tools, hooks);
            match AssertUnwindSafe(stage.run(&mut run.state, &ctx))
                .catch_unwind()
                .await
            {
                Ok(Ok(value)) => value,
                Ok(Err(err)) => {
                    status = StageStatus::Failed;
                    failure_output(name, err.to_string())
                }
                Err(payload) => {
                    status = StageStatus::Failed;
                    let message = format!("panicked: {}", panic_message(payload.as_ref()));
                    failure_output(name, message)
                }
            }
        }
    };

    if status != StageStatus::Failed {
        for hook in hooks {
            match guard_hook(name, hook.after_stage(name, &run.state, &output)).await {
                Ok(Some(rewritten)) => output = rewritten,
                Ok(None) => {}
                Err(err) => {
                    status = StageStatus::Failed;
                    output = failure_output(name, err.to_string());
                    break;
                }
            }
        }
    }

    if status == StageStatus::Failed {
        warn!(stage = name, output = %output, "stage failed, storing diagnostic");
    }
    info!(
        stage = name,
        output_key = stage.output_key(),
        status = ?status,
        iteration = ?run.iteration,
        "stage finished"
    );
    run.state.insert(stage.output_key(), output.clone());
    debug!(state = %run.state.to_value(), "state after {name}");
    run.trace.push(StageRecord {
        stage: name.to_string(),
        output_key: stage.output_key().to_string(),
        status,
        iteration: run.iteration,
        output,
    });
}

async fn run_loop(looped: &LoopAgent, run: &mut RunScope<'_>) {
    let outer_iteration = run.iteration;
    // An escalation pending at loop entry belongs to the enclosing loop, if
    // any. It is held aside while this loop runs and restored afterwards.
    let pending = run.state.take_escalation();
    if pending && outer_iteration.is_none() {
        debug!(loop_name = %looped.name, "discarding escalation raised outside any loop");
    }
    let mut passes = 0;
    let mut status = LoopStatus::Running;
    while !status.is_terminal() {
        passes += 1;
        run.iteration = Some(passes);
        for node in &looped.body {
            node.execute(run).await;
        }
        status = looped.status_after_pass(&mut run.state, passes);
        debug!(loop_name = %looped.name, pass = passes, status = ?status, "loop pass finished");
    }
    run.iteration = outer_iteration;
    if pending && outer_iteration.is_some() {
        run.state.escalate();
    }

    let report = LoopReport {
        status,
        iterations: passes,
    };
    if status == LoopStatus::CapReached {
        warn!(loop_name = %looped.name, iterations = passes, "loop hit its iteration cap");
    } else {
        info!(loop_name = %looped.name, iterations = passes, "loop exited");
    }
    let output = report.to_value();
    run.state.insert(looped.output_key.clone(), output.clone());
    run.trace.push(StageRecord {
        stage: looped.name.clone(),
        output_key: looped.output_key.clone(),
        status: StageStatus::Completed,
        iteration: outer_iteration,
        output,
    });
}

/// Final state and trace of one `run`.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub state: State,
    pub trace: Vec<StageRecord>,
}

impl PipelineRun {
    pub fn output(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    pub fn loop_report(&self, output_key: &str) -> Option<LoopReport> {
        self.state.get(output_key).and_then(LoopReport::from_value)
    }

    pub fn records_for<'a>(&'a self, stage: &'a str) -> impl Iterator<Item = &'a StageRecord> + 'a {
        self.trace.iter().filter(move |record| record.stage == stage)
    }
}

/// Orchestrator: owns the stage tree, the tool registry and the hooks, and
/// runs the tree in order against a private copy of the caller's state.
pub struct SequentialAgent {
    name: String,
    nodes: Vec<PipelineNode>,
    tools: ToolRegistry,
    hooks: Vec<Arc<dyn PipelineHook>>,
}

impl SequentialAgent {
    pub fn new(
        name: impl Into<String>,
        nodes: Vec<PipelineNode>,
        tools: ToolRegistry,
    ) -> Result<Self> {
        let mut names = HashSet::new();
        let mut keys = HashSet::new();
        for node in &nodes {
            node.collect_identities(&mut names, &mut keys)?;
        }
        Ok(Self {
            name: name.into(),
            nodes,
            tools,
            hooks: Vec::new(),
        })
    }

    pub fn with_hook(mut self, hook: Arc<dyn PipelineHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn nodes(&self) -> &[PipelineNode] {
        &self.nodes
    }

    /// Dispatch a tool on behalf of a caller outside any stage.
    pub async fn execute_tool_request(&self, request: &ToolRequest) -> ToolResult {
        dispatch_tool(&self.tools, &self.hooks, &self.name, request).await
    }

    /// Run every node once, in order. The caller's `initial` state is
    /// copied, never mutated. Failures inside the run end up in the returned
    /// state; nothing escapes as an error.
    pub async fn run(&self, user_input: &str, initial: Option<&State>) -> PipelineRun {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline", name = %self.name, %run_id);
        async move {
            let mut state = initial.cloned().unwrap_or_default();
            state.take_escalation();
            state.insert(USER_INPUT_KEY, Value::String(user_input.to_string()));

            let mut scope = RunScope {
                tools: &self.tools,
                hooks: &self.hooks,
                user_input,
                state,
                trace: Vec::new(),
                iteration: None,
            };
            for node in &self.nodes {
                node.execute(&mut scope).await;
            }
            if scope.state.take_escalation() {
                debug!("escalation raised outside any loop was ignored");
            }
            info!(records = scope.trace.len(), "pipeline finished");

            PipelineRun {
                run_id,
                state: scope.state,
                trace: scope.trace,
            }
        }
        .instrument(span)
        .await
    }
}
