use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentError, AgentReport, AgentRuntime};
use crate::config::{OrchestrationConfig, OrchestrationNode};
use crate::schemas::{DisplaySink, NullSink, TokenUsage};
use crate::template::lookup_path;
use crate::workflow::{validate_dag, StepStatus};

use super::{OrchestratorError, SharedState};

/// One agent's slot in the orchestration report.
#[derive(Debug)]
pub struct AgentRunSummary {
    pub id: String,
    pub status: StepStatus,
    pub error: Option<String>,
    pub usage: Option<TokenUsage>,
    pub cost: f64,
    pub duration: Duration,
}

#[derive(Debug)]
pub struct OrchestrationReport {
    pub name: String,
    pub agents: Vec<AgentRunSummary>,
    /// Declared output keys projected from the shared state.
    pub outputs: Map<String, Value>,
}

impl OrchestrationReport {
    pub fn succeeded(&self) -> bool {
        self.agents.iter().all(|a| a.status != StepStatus::Failed)
    }

    pub fn get(&self, id: &str) -> Option<&AgentRunSummary> {
        self.agents.iter().find(|a| a.id == id)
    }
}

type RuntimeBuilder =
    dyn Fn(&OrchestrationNode) -> Result<AgentRuntime, AgentError> + Send + Sync;

/// Composes agent DAGs into a higher-level DAG with shared state.
/// Readiness, dispatch, and failure propagation mirror the step engine at
/// agent granularity.
pub struct Orchestrator {
    config: OrchestrationConfig,
    builder: Box<RuntimeBuilder>,
    cancel: CancellationToken,
    sink: Arc<dyn DisplaySink>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Pending,
    Running,
    Done(StepStatus),
}

impl Orchestrator {
    pub fn new(config: OrchestrationConfig) -> Self {
        Self {
            config,
            builder: Box::new(|node| AgentRuntime::new(node.config.clone())),
            cancel: CancellationToken::new(),
            sink: Arc::new(NullSink),
        }
    }

    /// Overrides how node runtimes are constructed (provider injection).
    pub fn with_runtime_builder<F>(mut self, builder: F) -> Self
    where
        F: Fn(&OrchestrationNode) -> Result<AgentRuntime, AgentError> + Send + Sync + 'static,
    {
        self.builder = Box::new(builder);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn DisplaySink>) -> Self {
        self.sink = sink;
        self
    }

    pub async fn run(&self) -> Result<OrchestrationReport, OrchestratorError> {
        match self.config.timeout_secs {
            Some(secs) => {
                let budget = Duration::from_secs(secs);
                match tokio::time::timeout(budget, self.run_inner()).await {
                    Ok(report) => report,
                    Err(_) => {
                        self.cancel.cancel();
                        Err(OrchestratorError::Timeout(budget))
                    }
                }
            }
            None => self.run_inner().await,
        }
    }

    async fn run_inner(&self) -> Result<OrchestrationReport, OrchestratorError> {
        let nodes: Vec<(String, Vec<String>)> = self
            .config
            .agents
            .iter()
            .map(|node| (node.id.clone(), node.depends_on.clone()))
            .collect();
        validate_dag(&nodes).map_err(|e| OrchestratorError::ConfigError(e.to_string()))?;

        let concurrency = self.config.max_concurrency.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        });
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let shared = SharedState::new();

        let by_id: HashMap<&str, &OrchestrationNode> = self
            .config
            .agents
            .iter()
            .map(|node| (node.id.as_str(), node))
            .collect();
        let mut states: HashMap<String, NodeState> = self
            .config
            .agents
            .iter()
            .map(|node| (node.id.clone(), NodeState::Pending))
            .collect();
        let mut summaries: HashMap<String, AgentRunSummary> = HashMap::new();
        let mut in_flight: FuturesUnordered<
            futures::future::BoxFuture<'_, (&OrchestrationNode, Duration, Result<AgentReport, AgentError>)>,
        > = FuturesUnordered::new();

        log::info!(
            "orchestration '{}' starting with {} agent(s), concurrency {concurrency}",
            self.config.name,
            self.config.agents.len()
        );

        loop {
            let mut progressed = false;

            for node in &self.config.agents {
                if states[&node.id] != NodeState::Pending {
                    continue;
                }
                match node_readiness(node, &states, &by_id) {
                    NodeReadiness::Waiting => {}
                    NodeReadiness::Blocked(dep) => {
                        log::warn!(
                            "skipping agent '{}': dependency '{}' failed",
                            node.id,
                            dep
                        );
                        states.insert(node.id.clone(), NodeState::Done(StepStatus::Skipped));
                        summaries.insert(
                            node.id.clone(),
                            AgentRunSummary {
                                id: node.id.clone(),
                                status: StepStatus::Skipped,
                                error: Some(format!("dependency '{dep}' failed")),
                                usage: None,
                                cost: 0.0,
                                duration: Duration::ZERO,
                            },
                        );
                        progressed = true;
                    }
                    NodeReadiness::Ready => {
                        states.insert(node.id.clone(), NodeState::Running);
                        progressed = true;

                        let semaphore = semaphore.clone();
                        let shared = shared.clone();
                        let node_cancel = self.cancel.child_token();
                        let sink = self.sink.clone();

                        in_flight.push(
                            async move {
                                let start = Instant::now();
                                let _permit = semaphore
                                    .acquire_owned()
                                    .await
                                    .expect("semaphore never closed");

                                let outcome = match (self.builder)(node) {
                                    Ok(runtime) => {
                                        let runtime = runtime
                                            .with_cancellation(node_cancel)
                                            .with_sink(sink);
                                        let mut seed = Map::new();
                                        seed.insert("agents".to_string(), shared.injected());
                                        runtime.run_seeded(&node.workflow, seed).await
                                    }
                                    Err(e) => Err(e),
                                };

                                (node, start.elapsed(), outcome)
                            }
                            .boxed(),
                        );
                    }
                }
            }

            match in_flight.next().await {
                Some((node, duration, outcome)) => {
                    match outcome {
                        Ok(report) if report.report.succeeded() => {
                            self.apply_outputs(node, &report, &shared);
                            states.insert(node.id.clone(), NodeState::Done(StepStatus::Success));
                            summaries.insert(
                                node.id.clone(),
                                AgentRunSummary {
                                    id: node.id.clone(),
                                    status: StepStatus::Success,
                                    error: None,
                                    usage: Some(report.usage),
                                    cost: report.cost,
                                    duration,
                                },
                            );
                        }
                        Ok(report) => {
                            // The run completed but some step failed; the
                            // node counts as failed while keeping whatever
                            // outputs it did produce.
                            log::error!(
                                "agent '{}' finished with failed steps:\n{}",
                                node.id,
                                report.report.render_failures()
                            );
                            self.apply_outputs(node, &report, &shared);
                            states.insert(node.id.clone(), NodeState::Done(StepStatus::Failed));
                            summaries.insert(
                                node.id.clone(),
                                AgentRunSummary {
                                    id: node.id.clone(),
                                    status: StepStatus::Failed,
                                    error: Some(report.report.render_failures()),
                                    usage: Some(report.usage),
                                    cost: report.cost,
                                    duration,
                                },
                            );
                        }
                        Err(error) => {
                            log::error!("agent '{}' failed: {error}", node.id);
                            states.insert(node.id.clone(), NodeState::Done(StepStatus::Failed));
                            summaries.insert(
                                node.id.clone(),
                                AgentRunSummary {
                                    id: node.id.clone(),
                                    status: StepStatus::Failed,
                                    error: Some(error.to_string()),
                                    usage: None,
                                    cost: 0.0,
                                    duration,
                                },
                            );
                        }
                    }
                    continue;
                }
                None => {
                    if !progressed {
                        break;
                    }
                }
            }
        }

        let outputs = self
            .config
            .outputs
            .iter()
            .filter_map(|key| {
                let value = shared.get(key);
                if value.is_none() {
                    log::warn!("declared output '{key}' missing from shared state");
                }
                value.map(|v| (key.clone(), v))
            })
            .collect();

        Ok(OrchestrationReport {
            name: self.config.name.clone(),
            agents: self
                .config
                .agents
                .iter()
                .filter_map(|node| summaries.remove(&node.id))
                .collect(),
            outputs,
        })
    }

    /// Projects the node's declared outputs from its final context into
    /// shared state as `<id>.<name>` (last-writer-wins).
    fn apply_outputs(&self, node: &OrchestrationNode, report: &AgentReport, shared: &SharedState) {
        for (name, path) in &node.outputs {
            match lookup_path(&report.context, path) {
                Some(value) => {
                    shared.set(format!("{}.{}", node.id, name), value.clone());
                }
                None => log::warn!(
                    "agent '{}' declared output '{name}' at '{path}', but the path is missing",
                    node.id
                ),
            }
        }
    }
}

enum NodeReadiness {
    Ready,
    Waiting,
    Blocked(String),
}

fn node_readiness(
    node: &OrchestrationNode,
    states: &HashMap<String, NodeState>,
    by_id: &HashMap<&str, &OrchestrationNode>,
) -> NodeReadiness {
    for dep in &node.depends_on {
        match states.get(dep.as_str()) {
            Some(NodeState::Pending) | Some(NodeState::Running) => return NodeReadiness::Waiting,
            Some(NodeState::Done(StepStatus::Success))
            | Some(NodeState::Done(StepStatus::Skipped)) => {}
            Some(NodeState::Done(StepStatus::Failed)) => {
                let dep_continues = by_id
                    .get(dep.as_str())
                    .map(|d| d.continue_on_error)
                    .unwrap_or(false);
                if !dep_continues && !node.continue_on_error {
                    return NodeReadiness::Blocked(dep.clone());
                }
            }
            None => return NodeReadiness::Blocked(dep.clone()),
        }
    }
    NodeReadiness::Ready
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap as StdHashMap;

    use serde_json::json;

    use crate::config::{
        AgentConfig, AgentIdentity, Limits, LlmBinding, LlmStep, RetryPolicy, StepConfig,
        StepKind, WorkflowConfig,
    };
    use crate::llm::LLMError;
    use crate::tools::SecurityPolicy;
    use crate::workflow::test_utils::ScriptedLLM;

    use super::*;

    fn llm_step(name: &str, prompt: &str) -> StepConfig {
        StepConfig {
            name: name.to_string(),
            kind: StepKind::Llm(LlmStep {
                prompt: prompt.to_string(),
                system: None,
            }),
            depends_on: Vec::new(),
            retry: RetryPolicy::default(),
            timeout_secs: None,
            continue_on_error: false,
        }
    }

    fn agent_config(name: &str, steps: Vec<StepConfig>) -> AgentConfig {
        AgentConfig {
            agent: AgentIdentity {
                name: name.to_string(),
                version: "1.0".to_string(),
                description: String::new(),
            },
            limits: Limits::default(),
            llm: LlmBinding {
                provider: "scripted".to_string(),
                model: "scripted".to_string(),
                temperature: None,
                max_tokens: None,
                system_prompt: None,
            },
            data_sources: Vec::new(),
            tools: StdHashMap::new(),
            security: SecurityPolicy::default(),
            workflows: StdHashMap::from([(
                "main".to_string(),
                WorkflowConfig { steps },
            )]),
            parameters: StdHashMap::new(),
        }
    }

    fn node(
        id: &str,
        steps: Vec<StepConfig>,
        deps: &[&str],
        outputs: &[(&str, &str)],
    ) -> OrchestrationNode {
        OrchestrationNode {
            id: id.to_string(),
            config: agent_config(id, steps),
            workflow: "main".to_string(),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            continue_on_error: false,
            outputs: outputs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn orchestration(agents: Vec<OrchestrationNode>, outputs: &[&str]) -> OrchestrationConfig {
        OrchestrationConfig {
            name: "pipeline".to_string(),
            agents,
            outputs: outputs.iter().map(|o| o.to_string()).collect(),
            max_concurrency: Some(4),
            timeout_secs: None,
        }
    }

    fn echo_builder(
    ) -> impl Fn(&OrchestrationNode) -> Result<AgentRuntime, AgentError> + Send + Sync {
        |node| {
            Ok(AgentRuntime::from_llm(
                node.config.clone(),
                Box::new(ScriptedLLM::echo()),
            ))
        }
    }

    #[tokio::test]
    async fn test_shared_state_flows_between_agents() {
        let writer = node(
            "writer",
            vec![llm_step("draft", "write about cats")],
            &[],
            &[("summary", "draft")],
        );
        let critic = node(
            "critic",
            vec![llm_step("judge", "review: {agents.writer.summary}")],
            &["writer"],
            &[("verdict", "judge")],
        );

        let orchestrator =
            Orchestrator::new(orchestration(vec![writer, critic], &["critic.verdict"]))
                .with_runtime_builder(echo_builder());
        let report = orchestrator.run().await.unwrap();

        assert!(report.succeeded());
        assert_eq!(
            report.outputs["critic.verdict"],
            json!("echo: review: echo: write about cats")
        );
    }

    #[tokio::test]
    async fn test_failed_agent_skips_dependents_not_siblings() {
        let broken = node("broken", vec![llm_step("a", "boom")], &[], &[]);
        let dependent = node("dependent", vec![llm_step("b", "after")], &["broken"], &[]);
        let sibling = node(
            "sibling",
            vec![llm_step("c", "independent")],
            &[],
            &[("out", "c")],
        );

        let orchestrator = Orchestrator::new(orchestration(
            vec![broken, dependent, sibling],
            &["sibling.out"],
        ))
        .with_runtime_builder(|node| {
            let llm = if node.id == "broken" {
                ScriptedLLM::with_responses(vec![Err(LLMError::AuthenticationError(
                    "denied".into(),
                ))])
            } else {
                ScriptedLLM::echo()
            };
            Ok(AgentRuntime::from_llm(node.config.clone(), Box::new(llm)))
        });

        let report = orchestrator.run().await.unwrap();

        assert_eq!(report.get("broken").unwrap().status, StepStatus::Failed);
        assert_eq!(report.get("dependent").unwrap().status, StepStatus::Skipped);
        assert_eq!(report.get("sibling").unwrap().status, StepStatus::Success);
        assert_eq!(report.outputs["sibling.out"], json!("echo: independent"));
        assert!(!report.succeeded());
    }

    #[tokio::test]
    async fn test_siblings_run_concurrently() {
        let delay = Duration::from_millis(100);
        let nodes: Vec<OrchestrationNode> = (0..3)
            .map(|i| node(&format!("agent{i}"), vec![llm_step("s", "work")], &[], &[]))
            .collect();

        let orchestrator = Orchestrator::new(orchestration(nodes, &[]))
            .with_runtime_builder(move |node| {
                Ok(AgentRuntime::from_llm(
                    node.config.clone(),
                    Box::new(ScriptedLLM::echo().with_delay(delay)),
                ))
            });

        let start = Instant::now();
        let report = orchestrator.run().await.unwrap();
        let elapsed = start.elapsed();

        assert!(report.succeeded());
        assert!(elapsed < delay * 3, "siblings serialized: {elapsed:?}");
    }

    #[tokio::test]
    async fn test_cyclic_orchestration_rejected() {
        let a = node("a", vec![llm_step("s", "x")], &["b"], &[]);
        let b = node("b", vec![llm_step("s", "y")], &["a"], &[]);

        let orchestrator = Orchestrator::new(orchestration(vec![a, b], &[]))
            .with_runtime_builder(echo_builder());
        let err = orchestrator.run().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ConfigError(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_continue_on_error_node_unblocks_dependents() {
        let mut flaky = node("flaky", vec![llm_step("a", "boom")], &[], &[]);
        flaky.continue_on_error = true;
        let next = node("next", vec![llm_step("b", "still runs")], &["flaky"], &[("out", "b")]);

        let orchestrator = Orchestrator::new(orchestration(vec![flaky, next], &["next.out"]))
            .with_runtime_builder(|node| {
                let llm = if node.id == "flaky" {
                    ScriptedLLM::with_responses(vec![Err(LLMError::InvalidRequest(
                        "broken".into(),
                    ))])
                } else {
                    ScriptedLLM::echo()
                };
                Ok(AgentRuntime::from_llm(node.config.clone(), Box::new(llm)))
            });

        let report = orchestrator.run().await.unwrap();
        assert_eq!(report.get("flaky").unwrap().status, StepStatus::Failed);
        assert_eq!(report.get("next").unwrap().status, StepStatus::Success);
        assert_eq!(report.outputs["next.out"], json!("echo: still runs"));
    }
}
