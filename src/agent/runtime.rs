use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use crate::config::{AgentConfig, WorkflowConfig};
use crate::context::ExecutionContext;
use crate::embedding::Embedder;
use crate::llm::{LLMFactory, LLM};
use crate::schemas::{DisplaySink, NullSink, TokenUsage};
use crate::template::resolve_value_params;
use crate::tools::{SemanticSearch, ToolRegistry};
use crate::workflow::{UsageMeter, WorkflowEngine, WorkflowReport};

use super::{data_source, AgentError, LoadedSource};

/// The outcome of one agent run: the per-step report, the final context,
/// and the consumption totals.
#[derive(Debug)]
pub struct AgentReport {
    pub run_id: uuid::Uuid,
    pub agent: String,
    pub workflow: String,
    pub report: WorkflowReport,
    pub context: Map<String, Value>,
    pub usage: TokenUsage,
    pub cost: f64,
}

/// Wraps one workflow execution: provider wiring, tool registry, data-source
/// preloading, parameter resolution, and budget enforcement.
pub struct AgentRuntime {
    config: AgentConfig,
    llm: Box<dyn LLM>,
    sink: Arc<dyn DisplaySink>,
    cancel: CancellationToken,
    embedder: Option<Arc<dyn Embedder>>,
}

impl AgentRuntime {
    /// Builds the runtime with the default factory (default catalog plus
    /// the user's credentials file).
    pub fn new(config: AgentConfig) -> Result<Self, AgentError> {
        let factory = LLMFactory::default();
        Self::with_factory(config, &factory)
    }

    pub fn with_factory(config: AgentConfig, factory: &LLMFactory) -> Result<Self, AgentError> {
        let llm = factory.build(&config.llm)?;
        Ok(Self::from_llm(config, llm))
    }

    /// Direct wiring, bypassing provider construction. The orchestrator and
    /// tests use this to inject a prepared provider.
    pub fn from_llm(config: AgentConfig, llm: Box<dyn LLM>) -> Self {
        Self {
            config,
            llm,
            sink: Arc::new(NullSink),
            cancel: CancellationToken::new(),
            embedder: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn DisplaySink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Embedder backing `semantic_search` over declared embedding sources.
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub async fn run(&self, workflow_name: &str) -> Result<AgentReport, AgentError> {
        self.run_seeded(workflow_name, Map::new()).await
    }

    /// Runs one workflow with extra seed entries (the orchestrator injects
    /// shared state under `agents`).
    pub async fn run_seeded(
        &self,
        workflow_name: &str,
        seed: Map<String, Value>,
    ) -> Result<AgentReport, AgentError> {
        let workflow = self.config.workflow(workflow_name).ok_or_else(|| {
            AgentError::ConfigError(format!(
                "agent '{}' has no workflow named '{workflow_name}'",
                self.config.agent.name
            ))
        })?;

        // Parameters resolve once, before the DAG starts.
        let workflow = resolve_workflow(workflow, &self.config)?;

        let ctx = ExecutionContext::new();
        for (key, value) in seed {
            ctx.insert(key, value);
        }
        ctx.insert(
            "params",
            Value::Object(
                self.config
                    .parameters
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            ),
        );

        let mut registry = ToolRegistry::from_enabled(&self.config.tools)?;
        self.preload_sources(&ctx, &mut registry).await?;

        let limits = &self.config.limits;
        let meter = Arc::new(UsageMeter::from_limits(limits));
        let agent_cancel = self.cancel.child_token();

        let mut engine = WorkflowEngine::new(
            self.llm.clone(),
            Arc::new(registry),
            self.config.security.clone(),
        )
        .with_sink(self.sink.clone())
        .with_meter(meter.clone())
        .with_cancellation(agent_cancel.clone());

        if let Some(system_prompt) = &self.config.llm.system_prompt {
            engine = engine.with_system_prompt(system_prompt);
        }
        if let Some(cap) = limits.max_iterations {
            engine = engine.with_dispatch_cap(cap);
        }
        if let Some(secs) = limits.timeout_secs {
            engine = engine.with_default_timeout(Duration::from_secs(secs));
        }

        let run_id = uuid::Uuid::new_v4();
        log::info!(
            "agent '{}' running workflow '{workflow_name}' (run {run_id})",
            self.config.agent.name
        );

        let run = engine.run(&workflow, &ctx);
        let report = match limits.timeout_secs {
            Some(secs) => {
                let budget = Duration::from_secs(secs);
                match tokio::time::timeout(budget, run).await {
                    Ok(report) => report,
                    Err(_) => {
                        agent_cancel.cancel();
                        return Err(AgentError::Timeout(budget));
                    }
                }
            }
            None => run.await,
        };
        let report = report.map_err(AgentError::from)?;

        let (usage, cost) = meter.totals();
        Ok(AgentReport {
            run_id,
            agent: self.config.agent.name.clone(),
            workflow: workflow_name.to_string(),
            report,
            context: ctx.snapshot(),
            usage,
            cost,
        })
    }

    async fn preload_sources(
        &self,
        ctx: &ExecutionContext,
        registry: &mut ToolRegistry,
    ) -> Result<(), AgentError> {
        for source in &self.config.data_sources {
            match data_source::load(source).await? {
                LoadedSource::Value(value) => ctx.insert(&source.name, value),
                LoadedSource::Embedding(index) => {
                    let count = index.read().await.count();
                    ctx.insert(&source.name, json!({ "records": count }));

                    match &self.embedder {
                        Some(embedder) => {
                            registry.register(Arc::new(SemanticSearch::new(
                                index,
                                embedder.clone(),
                            )));
                        }
                        None => log::warn!(
                            "embedding source '{}' declared but no embedder is attached; \
                             semantic_search is unavailable",
                            source.name
                        ),
                    }
                }
            }
        }
        Ok(())
    }
}

/// Substitutes `{{param}}` markers through every string of the workflow
/// definition.
fn resolve_workflow(
    workflow: &WorkflowConfig,
    config: &AgentConfig,
) -> Result<WorkflowConfig, AgentError> {
    let raw = serde_json::to_value(workflow)
        .map_err(|e| AgentError::ConfigError(format!("unserializable workflow: {e}")))?;
    let resolved = resolve_value_params(&raw, &config.parameters)?;
    serde_json::from_value(resolved)
        .map_err(|e| AgentError::ConfigError(format!("workflow invalid after resolution: {e}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crate::config::{
        AgentIdentity, Limits, LlmBinding, LlmStep, RetryPolicy, StepConfig, StepKind, ToolStep,
    };
    use crate::tools::SecurityPolicy;
    use crate::workflow::test_utils::ScriptedLLM;

    use super::*;

    fn llm_step(name: &str, prompt: &str, deps: &[&str]) -> StepConfig {
        StepConfig {
            name: name.to_string(),
            kind: StepKind::Llm(LlmStep {
                prompt: prompt.to_string(),
                system: None,
            }),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            retry: RetryPolicy::default(),
            timeout_secs: None,
            continue_on_error: false,
        }
    }

    fn config(steps: Vec<StepConfig>) -> AgentConfig {
        AgentConfig {
            agent: AgentIdentity {
                name: "tester".to_string(),
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
            tools: HashMap::new(),
            security: SecurityPolicy::default(),
            workflows: HashMap::from([("default".to_string(), WorkflowConfig { steps })]),
            parameters: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_parameters_resolved_before_run() {
        let mut config = config(vec![llm_step("greet", "Hello {{name}}", &[])]);
        config.parameters.insert("name".to_string(), "Ada".to_string());

        let runtime = AgentRuntime::from_llm(config, Box::new(ScriptedLLM::echo()));
        let report = runtime.run("default").await.unwrap();

        assert_eq!(report.context["greet"], json!("echo: Hello Ada"));
        assert_eq!(report.context["params"]["name"], json!("Ada"));
    }

    #[tokio::test]
    async fn test_missing_parameter_is_fatal() {
        let config = config(vec![llm_step("greet", "Hello {{name}}", &[])]);
        let runtime = AgentRuntime::from_llm(config, Box::new(ScriptedLLM::echo()));

        let err = runtime.run("default").await.unwrap_err();
        assert!(matches!(err, AgentError::TemplateError(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_unknown_workflow_rejected() {
        let config = config(vec![llm_step("a", "hi", &[])]);
        let runtime = AgentRuntime::from_llm(config, Box::new(ScriptedLLM::echo()));

        let err = runtime.run("nope").await.unwrap_err();
        assert!(matches!(err, AgentError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_file_data_source_preloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "the notes").unwrap();

        let mut config = config(vec![llm_step("use", "got: {notes}", &[])]);
        config.data_sources.push(crate::config::DataSourceConfig {
            name: "notes".to_string(),
            kind: crate::config::DataSourceKind::File {
                path: path.to_string_lossy().into_owned(),
            },
        });

        let runtime = AgentRuntime::from_llm(config, Box::new(ScriptedLLM::echo()));
        let report = runtime.run("default").await.unwrap();
        assert_eq!(report.context["use"], json!("echo: got: the notes"));
    }

    #[tokio::test]
    async fn test_budget_exceeded_surfaces_with_exit_code() {
        let mut config = config(vec![
            llm_step("a", "one", &[]),
            llm_step("b", "two {a}", &["a"]),
        ]);
        config.limits.max_cost = Some(0.01);

        let llm = ScriptedLLM::echo().with_cost_per_call(0.02);
        let runtime = AgentRuntime::from_llm(config, Box::new(llm));

        let err = runtime.run("default").await.unwrap_err();
        assert!(matches!(err, AgentError::BudgetExceeded(_)));
        assert_eq!(err.exit_code(), 3);
    }

    #[tokio::test]
    async fn test_agent_timeout_cancels_run() {
        let mut steps = vec![llm_step("slow", "zzz", &[])];
        // The step's own timeout is generous; the agent budget fires first.
        steps[0].timeout_secs = Some(30);
        let mut config = config(steps);
        config.limits.timeout_secs = Some(1);

        let llm = ScriptedLLM::echo().with_delay(Duration::from_secs(10));
        let runtime = AgentRuntime::from_llm(config, Box::new(llm));

        let start = std::time::Instant::now();
        let err = runtime.run("default").await.unwrap_err();
        assert!(matches!(err, AgentError::Timeout(_)));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_usage_accumulates_in_report() {
        let config = config(vec![
            llm_step("a", "one", &[]),
            llm_step("b", "two {a}", &["a"]),
        ]);
        let runtime = AgentRuntime::from_llm(config, Box::new(ScriptedLLM::echo()));

        let report = runtime.run("default").await.unwrap();
        // Two echo calls at 15 tokens each.
        assert_eq!(report.usage.total_tokens, 30);
    }
}
