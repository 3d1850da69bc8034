// ABOUTME: The pipeline coordinator: load, validate, preflight, construct, and shape the result of one run.
// ABOUTME: Fails as a whole on any error; a partial agent list or router is never returned.

use std::path::PathBuf;
use std::sync::Arc;

use futures::future::try_join_all;
use serde::Serialize;
use swarmspec_core::{
    AgentDefaults, AgentSpec, ConfigError, ConfigSource, ReturnType, RuntimeConfig,
    UnsupportedReturnTypeError, ValidatedConfig, ValidationError, loader, validate_document,
};
use thiserror::Error;

use crate::backend::ModelBackendFactory;
use crate::factory::{AgentConstructionError, ResilientAgentFactory};
use crate::retry::Backoff;
use crate::runtime::{Agent, AgentRuntime, LlmAgentRuntime};
use crate::swarm::{DispatchError, ExecutionOutput, SwarmRouter, check_swarm};
use crate::telemetry::{EventSink, TracingSink};

/// Coarse classification of a pipeline failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConfigSource,
    ConfigParse,
    ConfigStructure,
    Validation,
    AgentConstruction,
    UnsupportedReturnType,
    SwarmNotDeclared,
    Dispatch,
}

/// Errors that can end a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    AgentConstruction(#[from] AgentConstructionError),

    #[error(transparent)]
    UnsupportedReturnType(#[from] UnsupportedReturnTypeError),

    #[error("return type '{0}' needs a swarm_architecture block, but the document declares none")]
    SwarmNotDeclared(ReturnType),

    #[error("swarm error: {0}")]
    Dispatch(#[from] DispatchError),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Config(ConfigError::Parse(_)) => ErrorKind::ConfigParse,
            PipelineError::Config(ConfigError::Structure(_)) => ErrorKind::ConfigStructure,
            PipelineError::Config(_) => ErrorKind::ConfigSource,
            PipelineError::Validation(_) => ErrorKind::Validation,
            PipelineError::AgentConstruction(_) => ErrorKind::AgentConstruction,
            PipelineError::UnsupportedReturnType(_) => ErrorKind::UnsupportedReturnType,
            PipelineError::SwarmNotDeclared(_) => ErrorKind::SwarmNotDeclared,
            PipelineError::Dispatch(_) => ErrorKind::Dispatch,
        }
    }
}

/// One pipeline invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRequest {
    pub source: ConfigSource,
    /// Parsed at the start of the run so an unknown value fails before any
    /// file is read.
    pub return_type: String,
    /// Model for agents that name none; overrides the options' default.
    pub model: Option<String>,
    /// Task for `run_swarm`; overrides the swarm's declared task.
    pub task: Option<String>,
}

impl PipelineRequest {
    pub fn new(source: ConfigSource, return_type: impl Into<String>) -> Self {
        Self {
            source,
            return_type: return_type.into(),
            model: None,
            task: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }
}

/// Process-level settings threaded into every run.
#[derive(Clone)]
pub struct PipelineOptions {
    pub workspace_dir: Option<PathBuf>,
    pub default_model: String,
    pub backoff: Backoff,
    /// Build all agents at once instead of one after another.
    pub concurrent_construction: bool,
    pub sink: Arc<dyn EventSink>,
    /// Replaces the default [`LlmAgentRuntime`] when set.
    pub runtime: Option<Arc<dyn AgentRuntime>>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from_config(&RuntimeConfig::default())
    }
}

impl PipelineOptions {
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            workspace_dir: Some(config.home.clone()),
            default_model: config.default_model.clone(),
            backoff: Backoff::new(config.retry_min_delay, config.retry_max_delay)
                .with_jitter(config.retry_jitter),
            concurrent_construction: false,
            sink: Arc::new(TracingSink),
            runtime: None,
        }
    }

    pub fn with_workspace(mut self, workspace_dir: Option<PathBuf>) -> Self {
        self.workspace_dir = workspace_dir;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_concurrent_construction(mut self, enabled: bool) -> Self {
        self.concurrent_construction = enabled;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_runtime(mut self, runtime: Arc<dyn AgentRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    fn factory(&self) -> ResilientAgentFactory {
        let runtime = self.runtime.clone().unwrap_or_else(|| {
            Arc::new(
                LlmAgentRuntime::new()
                    .with_workspace(self.workspace_dir.clone())
                    .with_backoff(self.backoff)
                    .with_sink(Arc::clone(&self.sink)),
            )
        });
        ResilientAgentFactory::new(runtime)
            .with_backoff(self.backoff)
            .with_sink(Arc::clone(&self.sink))
    }
}

/// The outcome of running one agent's own task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskResult {
    pub agent_name: String,
    pub task: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What a run hands back, shaped by the requested return type.
#[derive(Debug)]
pub enum PipelineResult {
    Router(SwarmRouter),
    /// A document with exactly one agent and the `agents` shape.
    Agent(Arc<dyn Agent>),
    Agents(Vec<Arc<dyn Agent>>),
    Both {
        router: Option<SwarmRouter>,
        agents: Vec<Arc<dyn Agent>>,
    },
    Tasks(Vec<TaskResult>),
    Execution(ExecutionOutput),
}

impl PipelineResult {
    pub fn into_router(self) -> Option<SwarmRouter> {
        match self {
            PipelineResult::Router(router) => Some(router),
            PipelineResult::Both { router, .. } => router,
            _ => None,
        }
    }

    pub fn into_agent(self) -> Option<Arc<dyn Agent>> {
        match self {
            PipelineResult::Agent(agent) => Some(agent),
            _ => None,
        }
    }

    pub fn into_agents(self) -> Option<Vec<Arc<dyn Agent>>> {
        match self {
            PipelineResult::Agents(agents) | PipelineResult::Both { agents, .. } => Some(agents),
            PipelineResult::Agent(agent) => Some(vec![agent]),
            _ => None,
        }
    }

    pub fn into_execution(self) -> Option<ExecutionOutput> {
        match self {
            PipelineResult::Execution(output) => Some(output),
            _ => None,
        }
    }

    pub fn into_tasks(self) -> Option<Vec<TaskResult>> {
        match self {
            PipelineResult::Tasks(results) => Some(results),
            _ => None,
        }
    }
}

/// Load and validate a document without building anything.
pub fn load_and_validate(
    source: &ConfigSource,
    defaults: &AgentDefaults,
) -> Result<ValidatedConfig, PipelineError> {
    let raw = loader::load(source)?;
    let config = validate_document(&raw, defaults)?;
    if let Some(swarm) = &config.swarm {
        let names: Vec<&str> = config.agents.iter().map(|a| a.name.as_str()).collect();
        check_swarm(swarm, &names)?;
    }
    Ok(config)
}

/// Run the whole pipeline for one request.
pub async fn run(
    request: PipelineRequest,
    backends: &dyn ModelBackendFactory,
    options: &PipelineOptions,
) -> Result<PipelineResult, PipelineError> {
    let return_type: ReturnType = request.return_type.parse()?;

    let defaults = AgentDefaults {
        model_name: request
            .model
            .clone()
            .unwrap_or_else(|| options.default_model.clone()),
    };
    let raw = loader::load(&request.source)?;
    let config = validate_document(&raw, &defaults)?;

    run_validated(config, return_type, request.task.as_deref(), backends, options).await
}

/// Build and shape a document that has already been loaded and validated.
/// Swarm preflight still runs before any backend is requested.
pub async fn run_validated(
    config: ValidatedConfig,
    return_type: ReturnType,
    task: Option<&str>,
    backends: &dyn ModelBackendFactory,
    options: &PipelineOptions,
) -> Result<PipelineResult, PipelineError> {
    if return_type.requires_swarm() && config.swarm.is_none() {
        return Err(PipelineError::SwarmNotDeclared(return_type));
    }
    if let Some(swarm) = &config.swarm {
        let names: Vec<&str> = config.agents.iter().map(|a| a.name.as_str()).collect();
        check_swarm(swarm, &names)?;

        let has_task = task.is_some_and(|t| !t.trim().is_empty()) || swarm.task.is_some();
        if return_type == ReturnType::RunSwarm && !has_task {
            return Err(DispatchError::MissingTask.into());
        }
    }

    tracing::info!(
        agents = config.agents.len(),
        swarm = config.swarm.as_ref().map(|s| s.name.as_str()).unwrap_or("-"),
        return_type = %return_type,
        "configuration validated"
    );

    let agents = build_agents(&config.agents, backends, options).await?;
    let router = config
        .swarm
        .clone()
        .map(|swarm| {
            SwarmRouter::new(swarm, agents.clone()).map(|router| {
                router
                    .with_workspace(options.workspace_dir.clone())
                    .with_sink(Arc::clone(&options.sink))
            })
        })
        .transpose()?;

    let result = match return_type {
        ReturnType::Auto => match router {
            Some(router) => PipelineResult::Router(router),
            None => agents_shape(agents),
        },
        ReturnType::Swarm => PipelineResult::Router(
            router.ok_or(PipelineError::SwarmNotDeclared(return_type))?,
        ),
        ReturnType::Agents => agents_shape(agents),
        ReturnType::Both => PipelineResult::Both { router, agents },
        ReturnType::Tasks => PipelineResult::Tasks(run_tasks(&config.agents, &agents).await),
        ReturnType::RunSwarm => {
            let router = router.ok_or(PipelineError::SwarmNotDeclared(return_type))?;
            PipelineResult::Execution(router.dispatch(task).await?)
        }
    };
    Ok(result)
}

fn agents_shape(mut agents: Vec<Arc<dyn Agent>>) -> PipelineResult {
    match agents.len() {
        1 => match agents.pop() {
            Some(agent) => PipelineResult::Agent(agent),
            None => PipelineResult::Agents(agents),
        },
        _ => PipelineResult::Agents(agents),
    }
}

/// Build every agent in document order. The first failure aborts the run;
/// with concurrent construction the remaining builds are dropped.
async fn build_agents(
    specs: &[AgentSpec],
    backends: &dyn ModelBackendFactory,
    options: &PipelineOptions,
) -> Result<Vec<Arc<dyn Agent>>, AgentConstructionError> {
    let factory = options.factory();

    if options.concurrent_construction {
        return try_join_all(specs.iter().map(|spec| factory.build_with(spec, backends))).await;
    }

    let mut agents = Vec::with_capacity(specs.len());
    for spec in specs {
        agents.push(factory.build_with(spec, backends).await?);
    }
    Ok(agents)
}

/// Run each agent's own `task`, one agent at a time in document order.
async fn run_tasks(specs: &[AgentSpec], agents: &[Arc<dyn Agent>]) -> Vec<TaskResult> {
    let mut results = Vec::new();
    for (spec, agent) in specs.iter().zip(agents) {
        let Some(task) = &spec.task else {
            continue;
        };
        let result = agent.run(task).await;
        if let Err(e) = &result {
            tracing::warn!(agent = %spec.name, error = %e, "agent task failed");
        }
        results.push(TaskResult {
            agent_name: spec.name.clone(),
            task: task.clone(),
            output: result.as_ref().ok().cloned(),
            error: result.err().map(|e| e.to_string()),
        });
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;
    use crate::testing::{MemorySink, SpyBackendFactory};
    use std::time::Duration;

    fn options() -> PipelineOptions {
        PipelineOptions::default()
            .with_workspace(None)
            .with_backoff(Backoff::new(Duration::from_millis(1), Duration::from_millis(2)))
    }

    fn text(yaml: &str) -> ConfigSource {
        ConfigSource::Text(yaml.to_string())
    }

    const TWO_AGENTS: &str = "
agents:
  - agent_name: A
    system_prompt: do A
    autosave: false
  - agent_name: B
    system_prompt: do B
    autosave: false
";

    #[tokio::test]
    async fn unsupported_return_type_fails_before_loading() {
        let spy = SpyBackendFactory::new();
        let request = PipelineRequest::new(
            ConfigSource::File("/definitely/not/here.yaml".into()),
            "everything",
        );
        let err = run(request, &spy, &options()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedReturnType);
        assert_eq!(spy.call_count(), 0);
    }

    #[tokio::test]
    async fn error_kinds_follow_the_failing_stage() {
        let spy = SpyBackendFactory::new();
        let cases = [
            (ConfigSource::File("/definitely/not/here.yaml".into()), ErrorKind::ConfigSource),
            (text("agents: [unclosed"), ErrorKind::ConfigParse),
            (text("agents: []"), ErrorKind::ConfigStructure),
            (text("agents:\n  - agent_name: A\n"), ErrorKind::Validation),
        ];
        for (source, kind) in cases {
            let err = run(PipelineRequest::new(source, "agents"), &spy, &options())
                .await
                .unwrap_err();
            assert_eq!(err.kind(), kind, "{err}");
        }
        assert_eq!(spy.call_count(), 0);
    }

    #[tokio::test]
    async fn invalid_swarm_type_builds_nothing() {
        let spy = SpyBackendFactory::new();
        let yaml = format!("{TWO_AGENTS}swarm_architecture:\n  swarm_type: Bogus\n");
        let err = run(PipelineRequest::new(text(&yaml), "auto"), &spy, &options())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(spy.call_count(), 0);
    }

    #[tokio::test]
    async fn bad_flow_is_caught_before_construction() {
        let spy = SpyBackendFactory::new();
        let yaml = format!(
            "{TWO_AGENTS}swarm_architecture:\n  swarm_type: Rearrange\n  flow: A -> Z\n"
        );
        let err = run(PipelineRequest::new(text(&yaml), "swarm"), &spy, &options())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Dispatch);
        assert_eq!(spy.call_count(), 0);
    }

    #[tokio::test]
    async fn swarm_return_type_needs_a_swarm() {
        for return_type in ["swarm", "run_swarm"] {
            let spy = SpyBackendFactory::new();
            let err = run(PipelineRequest::new(text(TWO_AGENTS), return_type), &spy, &options())
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::SwarmNotDeclared);
            assert_eq!(spy.call_count(), 0);
        }
    }

    #[tokio::test]
    async fn agents_shape_is_a_list_for_several_agents() {
        let spy = SpyBackendFactory::new();
        let result = run(PipelineRequest::new(text(TWO_AGENTS), "agents"), &spy, &options())
            .await
            .unwrap();
        let names: Vec<String> = match result {
            PipelineResult::Agents(agents) => agents.iter().map(|a| a.name().to_string()).collect(),
            other => panic!("expected agent list, got {other:?}"),
        };
        assert_eq!(names, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn auto_without_swarm_returns_agents() {
        let spy = SpyBackendFactory::new();
        let result = run(PipelineRequest::new(text(TWO_AGENTS), "auto"), &spy, &options())
            .await
            .unwrap();
        assert!(matches!(result, PipelineResult::Agents(ref a) if a.len() == 2));
    }

    #[tokio::test]
    async fn auto_with_swarm_returns_router() {
        let spy = SpyBackendFactory::new();
        let yaml = format!("{TWO_AGENTS}swarm_architecture:\n  name: duo\n  swarm_type: Concurrent\n");
        let result = run(PipelineRequest::new(text(&yaml), "auto"), &spy, &options())
            .await
            .unwrap();
        let router = result.into_router().unwrap();
        assert_eq!(router.spec().name, "duo");
        assert_eq!(router.agent_names(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn both_without_swarm_has_no_router() {
        let spy = SpyBackendFactory::new();
        let result = run(PipelineRequest::new(text(TWO_AGENTS), "both"), &spy, &options())
            .await
            .unwrap();
        match result {
            PipelineResult::Both { router, agents } => {
                assert!(router.is_none());
                assert_eq!(agents.len(), 2);
            }
            other => panic!("expected both, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn model_resolution_prefers_agent_then_request_then_default() {
        let yaml = "
agents:
  - agent_name: A
    system_prompt: p
    model_name: pinned
    autosave: false
  - agent_name: B
    system_prompt: p
    autosave: false
";
        let spy = SpyBackendFactory::new();
        run(PipelineRequest::new(text(yaml), "agents").with_model("requested"), &spy, &options())
            .await
            .unwrap();
        assert_eq!(spy.calls(), vec!["pinned", "requested"]);

        let spy = SpyBackendFactory::new();
        let mut opts = options();
        opts.default_model = "house-default".into();
        run(PipelineRequest::new(text(yaml), "agents"), &spy, &opts)
            .await
            .unwrap();
        assert_eq!(spy.calls(), vec!["pinned", "house-default"]);
    }

    #[tokio::test]
    async fn tasks_runs_agents_that_declare_one() {
        let yaml = "
agents:
  - agent_name: A
    system_prompt: p
    task: summarize the news
    autosave: false
  - agent_name: B
    system_prompt: p
    autosave: false
  - agent_name: C
    system_prompt: p
    task: write a haiku
    autosave: false
";
        let spy = SpyBackendFactory::new();
        let results = run(PipelineRequest::new(text(yaml), "tasks"), &spy, &options())
            .await
            .unwrap()
            .into_tasks()
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].agent_name, "A");
        assert_eq!(results[0].output.as_deref(), Some("A: summarize the news"));
        assert_eq!(results[1].agent_name, "C");
        assert!(results[1].error.is_none());
    }

    #[tokio::test]
    async fn concurrent_construction_is_all_or_nothing() {
        let yaml = "
agents:
  - agent_name: A
    system_prompt: p
    model_name: good
    autosave: false
  - agent_name: B
    system_prompt: p
    model_name: broken
    retry_attempts: 2
    autosave: false
";
        let spy = SpyBackendFactory::with(|model| {
            let backend = crate::testing::ScriptedBackend::new(model);
            if model == "broken" {
                backend.failing_handshakes(10, BackendError::Unavailable("down".into()))
            } else {
                backend
            }
        });
        let sink = Arc::new(MemorySink::new());
        let opts = options().with_concurrent_construction(true).with_sink(sink.clone());

        let err = run(PipelineRequest::new(text(yaml), "agents"), &spy, &opts)
            .await
            .unwrap_err();

        match err {
            PipelineError::AgentConstruction(e) => {
                assert_eq!(e.agent, "B");
                assert_eq!(e.attempts, 2);
            }
            other => panic!("expected construction error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn run_swarm_uses_request_task_override() {
        let spy = SpyBackendFactory::new();
        let yaml = format!(
            "{TWO_AGENTS}swarm_architecture:\n  swarm_type: Sequential\n  task: declared\n"
        );
        let output = run(
            PipelineRequest::new(text(&yaml), "run_swarm").with_task("override"),
            &spy,
            &options(),
        )
        .await
        .unwrap()
        .into_execution()
        .unwrap();
        assert_eq!(output.output, "B: A: override");
    }

    #[tokio::test]
    async fn run_swarm_without_any_task_builds_nothing() {
        let spy = SpyBackendFactory::new();
        let yaml = format!("{TWO_AGENTS}swarm_architecture:\n  swarm_type: Concurrent\n");
        let err = run(
            PipelineRequest::new(text(&yaml), "run_swarm").with_task("   "),
            &spy,
            &options(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PipelineError::Dispatch(DispatchError::MissingTask)), "{err:?}");
        assert_eq!(spy.call_count(), 0);
    }

    #[tokio::test]
    async fn run_validated_reuses_a_loaded_config() {
        let yaml = format!(
            "{TWO_AGENTS}swarm_architecture:\n  swarm_type: Sequential\n  task: declared\n"
        );
        let config = load_and_validate(&text(&yaml), &AgentDefaults::default()).unwrap();
        let spy = SpyBackendFactory::new();

        let output = run_validated(config.clone(), ReturnType::RunSwarm, None, &spy, &options())
            .await
            .unwrap()
            .into_execution()
            .unwrap();
        assert_eq!(output.output, "B: A: declared");
        assert_eq!(spy.call_count(), 2);

        let mut no_swarm = config;
        no_swarm.swarm = None;
        let err = run_validated(no_swarm, ReturnType::Swarm, None, &spy, &options())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SwarmNotDeclared);
        assert_eq!(spy.call_count(), 2);
    }

    #[tokio::test]
    async fn load_and_validate_checks_swarm_references() {
        let yaml = format!(
            "{TWO_AGENTS}swarm_architecture:\n  swarm_type: MixtureOfAgents\n  aggregator_agent: Ghost\n"
        );
        let err = load_and_validate(&text(&yaml), &AgentDefaults::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Dispatch);
    }
}
