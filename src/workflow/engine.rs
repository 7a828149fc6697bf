use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use async_recursion::async_recursion;
use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::config::{
    ConditionStep, LlmStep, LoopStep, ParallelStep, StepConfig, StepKind, ToolStep, WorkflowConfig,
};
use crate::context::ExecutionContext;
use crate::llm::LLM;
use crate::schemas::{messages_from_prompt, DisplaySink, NullSink, TokenUsage};
use crate::template::{lookup_path, resolve_refs, resolve_value_refs, stringify};
use crate::tools::{SecurityPolicy, ToolRegistry};

use super::{
    backoff_delay, validate_dag, StepResult, StepStatus, UsageMeter, WorkflowError, WorkflowReport,
};

const DEFAULT_PARALLELISM: usize = 4;

/// Executes one workflow DAG: readiness in topological waves, template
/// resolution against context snapshots, per-step retries and timeouts,
/// and step-kind dispatch to the LLM adapter or the tool registry.
pub struct WorkflowEngine {
    llm: Box<dyn LLM>,
    tools: Arc<ToolRegistry>,
    policy: SecurityPolicy,
    system_prompt: Option<String>,
    parallelism: usize,
    sink: Arc<dyn DisplaySink>,
    meter: Arc<UsageMeter>,
    cancel: CancellationToken,
    dispatch_cap: Option<usize>,
    default_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepState {
    Pending,
    Running,
    Done(StepStatus),
}

enum Readiness {
    Ready,
    Waiting,
    Blocked(String),
}

/// What one kind-execution produced before it is folded into a
/// [`StepResult`].
struct StepOutput {
    value: Value,
    usage: Option<TokenUsage>,
    cost: f64,
    /// Steps disabled by a condition's untaken branch.
    branch_skips: Vec<String>,
}

impl StepOutput {
    fn value(value: Value) -> Self {
        Self {
            value,
            usage: None,
            cost: 0.0,
            branch_skips: Vec::new(),
        }
    }
}

impl WorkflowEngine {
    pub fn new(llm: Box<dyn LLM>, tools: Arc<ToolRegistry>, policy: SecurityPolicy) -> Self {
        Self {
            llm,
            tools,
            policy,
            system_prompt: None,
            parallelism: DEFAULT_PARALLELISM,
            sink: Arc::new(NullSink),
            meter: Arc::new(UsageMeter::unlimited()),
            cancel: CancellationToken::new(),
            dispatch_cap: None,
            default_timeout: None,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn DisplaySink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_meter(mut self, meter: Arc<UsageMeter>) -> Self {
        self.meter = meter;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Caps the number of dispatched steps per run (the agent's
    /// max-iterations limit); loop and parallel inner steps count.
    pub fn with_dispatch_cap(mut self, cap: usize) -> Self {
        self.dispatch_cap = Some(cap);
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Runs the workflow against the given context. The context is expected
    /// to be pre-seeded with parameters and data-source outputs; step
    /// outputs are merged in as steps complete.
    pub async fn run(
        &self,
        workflow: &WorkflowConfig,
        ctx: &ExecutionContext,
    ) -> Result<WorkflowReport, WorkflowError> {
        validate_steps(&workflow.steps)?;

        let by_name: HashMap<&str, &StepConfig> = workflow
            .steps
            .iter()
            .map(|step| (step.name.as_str(), step))
            .collect();
        let mut states: HashMap<String, StepState> = workflow
            .steps
            .iter()
            .map(|step| (step.name.clone(), StepState::Pending))
            .collect();
        let mut results: HashMap<String, StepResult> = HashMap::new();
        let mut in_flight: FuturesUnordered<
            futures::future::BoxFuture<'_, (&StepConfig, StepResult, Vec<String>)>,
        > = FuturesUnordered::new();
        let mut dispatched = 0usize;
        let mut fatal: Option<WorkflowError> = None;

        loop {
            let mut progressed = false;

            if fatal.is_none() {
                // Resolve steps blocked by failed dependencies, then
                // dispatch whatever is ready, in specification order.
                let mut ready: Vec<&StepConfig> = Vec::new();
                for step in &workflow.steps {
                    if states[&step.name] != StepState::Pending {
                        continue;
                    }
                    match readiness(step, &states, &by_name) {
                        Readiness::Ready => ready.push(step),
                        Readiness::Waiting => {}
                        Readiness::Blocked(dep) => {
                            log::warn!(
                                "skipping step '{}': dependency '{}' failed",
                                step.name,
                                dep
                            );
                            states
                                .insert(step.name.clone(), StepState::Done(StepStatus::Skipped));
                            let mut skipped = StepResult::skipped(
                                &step.name,
                                step.kind_name(),
                                "dependency_failed",
                            );
                            skipped.error =
                                Some(WorkflowError::DependencyFailed(dep).to_string());
                            results.insert(step.name.clone(), skipped);
                            ctx.insert(&step.name, Value::Null);
                            progressed = true;
                        }
                    }
                }

                for step in ready {
                    if in_flight.len() >= self.parallelism {
                        break;
                    }
                    if let Some(cap) = self.dispatch_cap {
                        if dispatched >= cap {
                            fatal = Some(WorkflowError::BudgetExceeded(format!(
                                "maximum of {cap} step dispatches reached"
                            )));
                            self.cancel.cancel();
                            break;
                        }
                    }

                    dispatched += 1;
                    states.insert(step.name.clone(), StepState::Running);
                    log::debug!("dispatching step '{}'", step.name);

                    let step_ctx = ctx.clone();
                    in_flight.push(
                        async move {
                            let (result, skips) = self.run_step(step, step_ctx).await;
                            (step, result, skips)
                        }
                        .boxed(),
                    );
                    progressed = true;
                }
            }

            match in_flight.next().await {
                Some((step, result, branch_skips)) => {
                    states.insert(step.name.clone(), StepState::Done(result.status));

                    match result.status {
                        StepStatus::Success => {
                            if let Some(output) = &result.output {
                                ctx.insert(&step.name, output.clone());
                            }
                            for name in branch_skips {
                                if states.get(&name) != Some(&StepState::Pending) {
                                    continue;
                                }
                                let kind = by_name
                                    .get(name.as_str())
                                    .map(|s| s.kind_name())
                                    .unwrap_or("unknown");
                                states.insert(name.clone(), StepState::Done(StepStatus::Skipped));
                                results.insert(
                                    name.clone(),
                                    StepResult::skipped(&name, kind, "condition"),
                                );
                                ctx.insert(&name, Value::Null);
                            }
                        }
                        StepStatus::Failed => {
                            if step.continue_on_error {
                                // Downstream references resolve to the error
                                // message string.
                                ctx.insert(
                                    &step.name,
                                    Value::String(result.error.clone().unwrap_or_default()),
                                );
                            }
                            if result.error_kind == Some("budget_exceeded") && fatal.is_none() {
                                fatal = Some(WorkflowError::BudgetExceeded(
                                    result.error.clone().unwrap_or_default(),
                                ));
                                self.cancel.cancel();
                            }
                        }
                        StepStatus::Skipped => {}
                    }

                    results.insert(step.name.clone(), result);
                    continue;
                }
                None => {
                    if fatal.is_some() || !progressed {
                        break;
                    }
                }
            }
        }

        // Whatever never ran (budget abort, cancellation) is recorded as
        // skipped so the report covers every step.
        for step in &workflow.steps {
            if states[&step.name] != StepState::Done(StepStatus::Success)
                && !results.contains_key(&step.name)
            {
                results.insert(
                    step.name.clone(),
                    StepResult::skipped(&step.name, step.kind_name(), "cancelled"),
                );
            }
        }

        let report = WorkflowReport {
            results: workflow
                .steps
                .iter()
                .filter_map(|step| results.remove(&step.name))
                .collect(),
        };

        if let Some(error) = fatal {
            log::error!("workflow aborted: {error}\n{}", report.render_failures());
            return Err(error);
        }
        if !report.succeeded() {
            log::warn!("workflow finished with failures:\n{}", report.render_failures());
        }

        Ok(report)
    }

    /// One step, start to terminal state: snapshot, resolve, execute with
    /// timeout and cancellation, retry per policy.
    #[async_recursion]
    async fn run_step(
        &self,
        step: &StepConfig,
        ctx: ExecutionContext,
    ) -> (StepResult, Vec<String>) {
        let started_at = SystemTime::now();
        let start = Instant::now();
        let timeout = step
            .timeout_secs
            .map(Duration::from_secs)
            .or(self.default_timeout);
        let mut attempts = 0u32;

        let outcome = loop {
            attempts += 1;
            let snapshot = ctx.snapshot();
            let execution = self.execute_kind(step, &snapshot);

            let result = match timeout {
                Some(limit) => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => Err(WorkflowError::Cancelled),
                        timed = tokio::time::timeout(limit, execution) => match timed {
                            Ok(result) => result,
                            Err(_) => Err(WorkflowError::Timeout(limit)),
                        },
                    }
                }
                None => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => Err(WorkflowError::Cancelled),
                        result = execution => result,
                    }
                }
            };

            match result {
                Ok(output) => break Ok(output),
                Err(e) if e.is_retryable() && attempts < step.retry.max_attempts => {
                    let delay = backoff_delay(&step.retry, attempts);
                    log::warn!(
                        "step '{}' attempt {attempts} failed ({e}), retrying in {delay:?}",
                        step.name
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => break Err(e),
            }
        };

        let duration = start.elapsed();
        match outcome {
            Ok(output) => {
                log::debug!("step '{}' succeeded in {duration:?}", step.name);
                let result = StepResult {
                    name: step.name.clone(),
                    kind: step.kind_name(),
                    status: StepStatus::Success,
                    output: Some(output.value),
                    error: None,
                    error_kind: None,
                    started_at,
                    duration,
                    usage: output.usage,
                    cost: output.cost,
                    attempts,
                };
                (result, output.branch_skips)
            }
            Err(error) => {
                log::error!(
                    "step '{}' failed after {attempts} attempt(s): {error}",
                    step.name
                );
                let result = StepResult {
                    name: step.name.clone(),
                    kind: step.kind_name(),
                    status: StepStatus::Failed,
                    output: None,
                    error: Some(error.to_string()),
                    error_kind: Some(error.kind()),
                    started_at,
                    duration,
                    usage: None,
                    cost: 0.0,
                    attempts,
                };
                (result, Vec::new())
            }
        }
    }

    async fn execute_kind(
        &self,
        step: &StepConfig,
        snapshot: &Map<String, Value>,
    ) -> Result<StepOutput, WorkflowError> {
        match &step.kind {
            StepKind::Llm(config) => self.run_llm(config, snapshot, false).await,
            StepKind::LlmDisplay(config) => self.run_llm(config, snapshot, true).await,
            StepKind::Tool(config) => self.run_tool(config, snapshot).await,
            StepKind::Condition(config) => Ok(run_condition(config, snapshot)),
            StepKind::Loop(config) => self.run_loop(config, snapshot).await,
            StepKind::Parallel(config) => self.run_parallel(config, snapshot).await,
        }
    }

    async fn run_llm(
        &self,
        config: &LlmStep,
        snapshot: &Map<String, Value>,
        display: bool,
    ) -> Result<StepOutput, WorkflowError> {
        let prompt = resolve_refs(&config.prompt, snapshot);
        let system = config
            .system
            .as_deref()
            .or(self.system_prompt.as_deref())
            .map(|s| resolve_refs(s, snapshot));
        let messages = messages_from_prompt(system.as_deref(), &prompt);

        let result = if display {
            self.llm.stream(messages, self.sink.clone()).await?
        } else {
            self.llm.generate(messages).await?
        };

        let cost = result
            .usage
            .as_ref()
            .map(|usage| self.llm.calculate_cost(usage))
            .unwrap_or(0.0);
        if let Some(usage) = &result.usage {
            // Budget accounting happens before the output is merged, so a
            // breach fails this step and cancels the rest of the run.
            self.meter.record(usage, cost)?;
        }

        Ok(StepOutput {
            value: Value::String(result.text),
            usage: result.usage,
            cost,
            branch_skips: Vec::new(),
        })
    }

    async fn run_tool(
        &self,
        config: &ToolStep,
        snapshot: &Map<String, Value>,
    ) -> Result<StepOutput, WorkflowError> {
        let args = resolve_value_refs(&config.args, snapshot);
        let output = self.tools.invoke(&config.tool, args, &self.policy).await?;

        // Structured tool output stays structured so dotted references
        // reach into it.
        let value = match serde_json::from_str::<Value>(&output) {
            Ok(parsed @ (Value::Object(_) | Value::Array(_))) => parsed,
            _ => Value::String(output),
        };

        Ok(StepOutput::value(value))
    }

    async fn run_loop(
        &self,
        config: &LoopStep,
        snapshot: &Map<String, Value>,
    ) -> Result<StepOutput, WorkflowError> {
        let items = match lookup_path(snapshot, &config.over) {
            Some(Value::Array(items)) => items.clone(),
            Some(other) => {
                return Err(WorkflowError::ConfigError(format!(
                    "loop target '{}' is not an array (found {})",
                    config.over,
                    stringify(other)
                )))
            }
            None => {
                return Err(WorkflowError::ConfigError(format!(
                    "loop target '{}' not found in context",
                    config.over
                )))
            }
        };

        let mut iterations = Vec::with_capacity(items.len());
        let mut usage: Option<TokenUsage> = None;
        let mut cost = 0.0;

        for item in items {
            // Each iteration gets a scoped sub-context seeded from the
            // outer snapshot plus the iterator variable.
            let mut seed = snapshot.clone();
            seed.insert(config.item_var.clone(), item);
            let sub_ctx = ExecutionContext::from_map(seed);

            let group = self.run_group(&config.steps, &sub_ctx).await?;
            for result in &group {
                usage = TokenUsage::merge_options([&usage, &result.usage]);
                cost += result.cost;
            }

            let mut iteration = Map::new();
            for inner in &config.steps {
                if let Some(value) = sub_ctx.get(&inner.name) {
                    iteration.insert(inner.name.clone(), value);
                }
            }
            iterations.push(Value::Object(iteration));
        }

        Ok(StepOutput {
            value: Value::Array(iterations),
            usage,
            cost,
            branch_skips: Vec::new(),
        })
    }

    async fn run_parallel(
        &self,
        config: &ParallelStep,
        snapshot: &Map<String, Value>,
    ) -> Result<StepOutput, WorkflowError> {
        let futures = config.steps.iter().map(|step| {
            let sub_ctx = ExecutionContext::from_map(snapshot.clone());
            async move { (step, self.run_step(step, sub_ctx).await) }
        });
        let outcomes = join_all(futures).await;

        let mut values = Vec::with_capacity(config.steps.len());
        let mut usage: Option<TokenUsage> = None;
        let mut cost = 0.0;

        for (step, (result, _)) in outcomes {
            usage = TokenUsage::merge_options([&usage, &result.usage]);
            cost += result.cost;

            match result.status {
                StepStatus::Success => {
                    values.push(result.output.unwrap_or(Value::Null));
                }
                StepStatus::Failed if step.continue_on_error => {
                    values.push(Value::String(result.error.unwrap_or_default()));
                }
                StepStatus::Failed => {
                    return Err(WorkflowError::InnerStepFailed {
                        step: step.name.clone(),
                        kind_label: result.error_kind.unwrap_or("tool"),
                        message: result.error.unwrap_or_default(),
                    })
                }
                StepStatus::Skipped => values.push(Value::Null),
            }
        }

        Ok(StepOutput {
            value: Value::Array(values),
            usage,
            cost,
            branch_skips: Vec::new(),
        })
    }

    /// Sequentially runs an inner step group against its own sub-context,
    /// honoring `continue_on_error` and condition branch skips.
    async fn run_group(
        &self,
        steps: &[StepConfig],
        ctx: &ExecutionContext,
    ) -> Result<Vec<StepResult>, WorkflowError> {
        let mut results = Vec::with_capacity(steps.len());
        let mut disabled: HashSet<String> = HashSet::new();

        for step in steps {
            if disabled.contains(&step.name) {
                ctx.insert(&step.name, Value::Null);
                results.push(StepResult::skipped(&step.name, step.kind_name(), "condition"));
                continue;
            }

            let (result, branch_skips) = self.run_step(step, ctx.clone()).await;
            disabled.extend(branch_skips);

            match result.status {
                StepStatus::Success => {
                    if let Some(value) = &result.output {
                        ctx.insert(&step.name, value.clone());
                    }
                }
                StepStatus::Failed if step.continue_on_error => {
                    ctx.insert(
                        &step.name,
                        Value::String(result.error.clone().unwrap_or_default()),
                    );
                }
                StepStatus::Failed => {
                    let error = WorkflowError::InnerStepFailed {
                        step: step.name.clone(),
                        kind_label: result.error_kind.unwrap_or("tool"),
                        message: result.error.clone().unwrap_or_default(),
                    };
                    results.push(result);
                    return Err(error);
                }
                StepStatus::Skipped => {
                    ctx.insert(&step.name, Value::Null);
                }
            }

            results.push(result);
        }

        Ok(results)
    }
}

fn run_condition(config: &ConditionStep, snapshot: &Map<String, Value>) -> StepOutput {
    let value = lookup_path(snapshot, &config.path);
    let outcome = match (&value, &config.equals) {
        (Some(value), Some(expected)) => stringify(value) == *expected,
        (Some(value), None) => !value.is_null(),
        (None, _) => false,
    };

    log::debug!(
        "condition on '{}' evaluated to {outcome}",
        config.path
    );

    StepOutput {
        value: Value::Bool(outcome),
        usage: None,
        cost: 0.0,
        branch_skips: if outcome {
            config.else_steps.clone()
        } else {
            config.then_steps.clone()
        },
    }
}

fn readiness(
    step: &StepConfig,
    states: &HashMap<String, StepState>,
    by_name: &HashMap<&str, &StepConfig>,
) -> Readiness {
    for dep in &step.depends_on {
        match states.get(dep.as_str()) {
            Some(StepState::Pending) | Some(StepState::Running) => return Readiness::Waiting,
            Some(StepState::Done(StepStatus::Success))
            | Some(StepState::Done(StepStatus::Skipped)) => {}
            Some(StepState::Done(StepStatus::Failed)) => {
                let dep_continues = by_name
                    .get(dep.as_str())
                    .map(|d| d.continue_on_error)
                    .unwrap_or(false);
                if !dep_continues && !step.continue_on_error {
                    return Readiness::Blocked(dep.clone());
                }
            }
            None => return Readiness::Blocked(dep.clone()),
        }
    }
    Readiness::Ready
}

/// Validates the top-level DAG plus nested loop/parallel groups and
/// condition branch references.
pub(crate) fn validate_steps(steps: &[StepConfig]) -> Result<(), WorkflowError> {
    let nodes: Vec<(String, Vec<String>)> = steps
        .iter()
        .map(|step| (step.name.clone(), step.depends_on.clone()))
        .collect();
    validate_dag(&nodes)?;

    let names: HashSet<&str> = steps.iter().map(|step| step.name.as_str()).collect();
    for step in steps {
        match &step.kind {
            StepKind::Condition(config) => {
                for branch in config.then_steps.iter().chain(&config.else_steps) {
                    if !names.contains(branch.as_str()) {
                        return Err(WorkflowError::ConfigError(format!(
                            "condition '{}' references unknown step '{branch}'",
                            step.name
                        )));
                    }
                }
            }
            StepKind::Loop(config) => validate_steps(&config.steps)?,
            StepKind::Parallel(config) => validate_steps(&config.steps)?,
            _ => {}
        }
    }

    Ok(())
}
