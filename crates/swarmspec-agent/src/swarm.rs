// ABOUTME: SwarmRouter binds built agents to a swarm spec and dispatches tasks across them.
// ABOUTME: Supports sequential, concurrent, flow-driven, and mixture-of-agents routing plus an automatic choice.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use swarmspec_core::{FlowError, FlowPlan, SwarmSpec, SwarmType};
use thiserror::Error;

use crate::persist;
use crate::runtime::{Agent, AgentError};
use crate::telemetry::{EventSink, PipelineEvent, TracingSink, emit};

/// Words in a task that suggest its parts must happen in order.
const SEQUENCING_CUES: [&str; 5] = ["then", "after", "step", "pipeline", "first"];
/// Words in a task that suggest several views should be merged.
const SYNTHESIS_CUES: [&str; 6] = [
    "combine",
    "synthesize",
    "summarize",
    "consensus",
    "compare",
    "aggregate",
];

/// Errors raised while binding a swarm or dispatching a task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("swarm '{0}' has no agents")]
    NoAgents(String),

    #[error("agent name '{0}' is used more than once")]
    DuplicateAgent(String),

    #[error("invalid flow: {0}")]
    InvalidFlow(#[from] FlowError),

    #[error("swarm type Rearrange requires a flow")]
    MissingFlow,

    #[error("aggregator agent '{0}' is not one of the swarm's agents")]
    UnknownAggregator(String),

    #[error("aggregator agent '{0}' has no other agents to aggregate")]
    NoWorkers(String),

    #[error("swarm '{0}' must run at least one loop")]
    NoLoops(String),

    #[error("no task was given and the swarm declares none")]
    MissingTask,

    #[error("every worker failed, so aggregator '{0}' has nothing to combine")]
    NoWorkerOutput(String),

    #[error("agent '{agent}' failed: {reason}")]
    AgentFailed { agent: String, reason: String },
}

/// Check the parts of a swarm spec that depend on which agents exist.
/// Returns the parsed flow, if the swarm declares one.
pub fn check_swarm(spec: &SwarmSpec, agent_names: &[&str]) -> Result<Option<FlowPlan>, DispatchError> {
    if agent_names.is_empty() {
        return Err(DispatchError::NoAgents(spec.name.clone()));
    }
    if spec.max_loops == 0 {
        return Err(DispatchError::NoLoops(spec.name.clone()));
    }

    let flow = spec
        .flow
        .as_deref()
        .map(|flow| FlowPlan::parse_for(flow, agent_names.iter().copied()))
        .transpose()?;
    if spec.swarm_type == SwarmType::Rearrange && flow.is_none() {
        return Err(DispatchError::MissingFlow);
    }

    if let Some(aggregator) = &spec.aggregator_agent {
        if !agent_names.contains(&aggregator.as_str()) {
            return Err(DispatchError::UnknownAggregator(aggregator.clone()));
        }
        if agent_names.len() < 2 {
            return Err(DispatchError::NoWorkers(aggregator.clone()));
        }
    }

    Ok(flow)
}

/// Pick a concrete topology for an `Auto` swarm. Deterministic in its inputs.
pub fn choose_strategy(task: &str, agent_count: usize, has_flow: bool, has_aggregator: bool) -> SwarmType {
    if has_flow {
        return SwarmType::Rearrange;
    }
    if agent_count <= 1 {
        return SwarmType::Sequential;
    }
    if has_aggregator {
        return SwarmType::MixtureOfAgents;
    }

    let task = task.to_lowercase();
    let words: Vec<&str> = task
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    if mentions_any(&words, &SEQUENCING_CUES) {
        SwarmType::Sequential
    } else if agent_count >= 3 && mentions_any(&words, &SYNTHESIS_CUES) {
        SwarmType::MixtureOfAgents
    } else {
        SwarmType::Concurrent
    }
}

fn mentions_any(words: &[&str], cues: &[&str]) -> bool {
    words.iter().any(|w| cues.contains(w))
}

/// What one agent produced in the final loop of a dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentOutcome {
    pub agent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentOutcome {
    fn from_result(agent: &str, result: Result<String, AgentError>) -> Self {
        match result {
            Ok(output) => Self {
                agent: agent.to_owned(),
                output: Some(output),
                error: None,
            },
            Err(e) => Self {
                agent: agent.to_owned(),
                output: None,
                error: Some(e.to_string()),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// The result of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionOutput {
    pub swarm_name: String,
    /// The topology actually used; never `Auto`.
    pub strategy: SwarmType,
    pub loops_completed: u32,
    /// Per-agent results of the final loop, in agent declaration order for
    /// fan-out steps and execution order otherwise.
    pub outcomes: Vec<AgentOutcome>,
    pub output: String,
}

impl ExecutionOutput {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Serialize)]
struct SwarmRunRecord<'a> {
    saved_at: DateTime<Utc>,
    #[serde(flatten)]
    execution: &'a ExecutionOutput,
}

/// Routes tasks across a fixed, ordered set of agents.
pub struct SwarmRouter {
    spec: SwarmSpec,
    agents: Vec<Arc<dyn Agent>>,
    index: HashMap<String, usize>,
    flow: Option<FlowPlan>,
    workspace_dir: Option<PathBuf>,
    sink: Arc<dyn EventSink>,
}

impl fmt::Debug for SwarmRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwarmRouter")
            .field("name", &self.spec.name)
            .field("swarm_type", &self.spec.swarm_type)
            .field("agents", &self.agent_names())
            .field("flow", &self.flow.as_ref().map(ToString::to_string))
            .finish()
    }
}

impl SwarmRouter {
    /// Bind `agents` (in declaration order) to `spec`.
    pub fn new(spec: SwarmSpec, agents: Vec<Arc<dyn Agent>>) -> Result<Self, DispatchError> {
        let mut index = HashMap::with_capacity(agents.len());
        for (i, agent) in agents.iter().enumerate() {
            if index.insert(agent.name().to_owned(), i).is_some() {
                return Err(DispatchError::DuplicateAgent(agent.name().to_owned()));
            }
        }

        let names: Vec<&str> = agents.iter().map(|a| a.name()).collect();
        let flow = check_swarm(&spec, &names)?;

        Ok(Self {
            spec,
            agents,
            index,
            flow,
            workspace_dir: None,
            sink: Arc::new(TracingSink),
        })
    }

    /// Directory swarm outputs are saved under when `autosave` is set.
    pub fn with_workspace(mut self, workspace_dir: Option<PathBuf>) -> Self {
        self.workspace_dir = workspace_dir;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn spec(&self) -> &SwarmSpec {
        &self.spec
    }

    pub fn agents(&self) -> &[Arc<dyn Agent>] {
        &self.agents
    }

    pub fn agent_names(&self) -> Vec<&str> {
        self.agents.iter().map(|a| a.name()).collect()
    }

    /// The topology a dispatch of `task` would use.
    pub fn resolve_strategy(&self, task: &str) -> SwarmType {
        match self.spec.swarm_type {
            SwarmType::Auto => choose_strategy(
                task,
                self.agents.len(),
                self.flow.is_some(),
                self.spec.aggregator_agent.is_some(),
            ),
            other => other,
        }
    }

    /// Run `task` (or the swarm's own task) through the swarm `max_loops`
    /// times, feeding each loop's output to the next.
    ///
    /// Dropping the returned future cancels every in-flight agent call.
    pub async fn dispatch(&self, task: Option<&str>) -> Result<ExecutionOutput, DispatchError> {
        let task = task
            .filter(|t| !t.trim().is_empty())
            .map(str::to_owned)
            .or_else(|| self.spec.task.clone())
            .ok_or(DispatchError::MissingTask)?;

        let strategy = self.resolve_strategy(&task);
        emit(
            self.sink.as_ref(),
            PipelineEvent::DispatchStarted {
                swarm: self.spec.name.clone(),
                strategy,
            },
        );

        let mut input = task;
        let mut outcomes = Vec::new();
        for round in 1..=self.spec.max_loops {
            let prompt = self.apply_rules(&input);
            let (round_outcomes, round_output) = match strategy {
                SwarmType::Sequential => self.run_sequential(&prompt).await,
                SwarmType::Rearrange => self.run_flow(&prompt).await,
                SwarmType::MixtureOfAgents => self.run_mixture(&prompt).await,
                SwarmType::Concurrent | SwarmType::Auto => Ok(self.run_concurrent(&prompt).await),
            }
            .inspect_err(|e| {
                tracing::warn!(swarm = %self.spec.name, strategy = %strategy, round, error = %e, "dispatch failed");
            })?;

            tracing::debug!(swarm = %self.spec.name, round, "swarm loop complete");
            outcomes = round_outcomes;
            input = round_output;
        }

        let execution = ExecutionOutput {
            swarm_name: self.spec.name.clone(),
            strategy,
            loops_completed: self.spec.max_loops,
            outcomes,
            output: input,
        };

        emit(
            self.sink.as_ref(),
            PipelineEvent::DispatchFinished {
                swarm: self.spec.name.clone(),
                strategy,
                loops: execution.loops_completed,
                failures: execution.outcomes.iter().filter(|o| !o.is_success()).count(),
            },
        );

        if self.spec.autosave {
            self.save(&execution);
        }
        Ok(execution)
    }

    fn apply_rules(&self, task: &str) -> String {
        match &self.spec.rules {
            Some(rules) => format!("Rules:\n{rules}\n\nTask:\n{task}"),
            None => task.to_owned(),
        }
    }

    fn save(&self, execution: &ExecutionOutput) {
        let Some(workspace) = self.workspace_dir.as_deref() else {
            tracing::debug!(swarm = %self.spec.name, "autosave requested but no workspace configured");
            return;
        };
        let path = persist::swarm_output_path(workspace, &self.spec.name);
        let record = SwarmRunRecord {
            saved_at: Utc::now(),
            execution,
        };
        if let Err(e) = persist::save_json(&path, &record) {
            emit(
                self.sink.as_ref(),
                PipelineEvent::PersistFailed {
                    target: path.display().to_string(),
                    error: e.to_string(),
                },
            );
        }
    }

    fn position(&self, name: &str) -> Result<usize, DispatchError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| DispatchError::InvalidFlow(FlowError::UnknownAgent(name.to_owned())))
    }

    /// Run the given agents on the same task concurrently. Outcomes come back
    /// in the order of `positions`, whatever order the agents finish in.
    async fn fan_out(&self, positions: &[usize], task: &str) -> Vec<AgentOutcome> {
        let runs = positions.iter().map(|&i| {
            let agent = &self.agents[i];
            async move { AgentOutcome::from_result(agent.name(), agent.run(task).await) }
        });
        join_all(runs).await
    }

    async fn run_sequential(&self, task: &str) -> Result<(Vec<AgentOutcome>, String), DispatchError> {
        let mut input = task.to_owned();
        let mut outcomes = Vec::with_capacity(self.agents.len());
        for agent in &self.agents {
            let output = agent.run(&input).await.map_err(|e| DispatchError::AgentFailed {
                agent: agent.name().to_owned(),
                reason: e.to_string(),
            })?;
            outcomes.push(AgentOutcome::from_result(agent.name(), Ok(output.clone())));
            input = output;
        }
        Ok((outcomes, input))
    }

    async fn run_concurrent(&self, task: &str) -> (Vec<AgentOutcome>, String) {
        let positions: Vec<usize> = (0..self.agents.len()).collect();
        let outcomes = self.fan_out(&positions, task).await;
        let output = join_outputs(&outcomes);
        (outcomes, output)
    }

    async fn run_flow(&self, task: &str) -> Result<(Vec<AgentOutcome>, String), DispatchError> {
        let Some(flow) = &self.flow else {
            return Err(DispatchError::MissingFlow);
        };

        let mut input = task.to_owned();
        let mut outcomes = Vec::new();
        for step in flow.steps() {
            let positions = step
                .iter()
                .map(|name| self.position(name))
                .collect::<Result<Vec<_>, _>>()?;
            let step_outcomes = self.fan_out(&positions, &input).await;
            if let Some(failed) = step_outcomes.iter().find(|o| !o.is_success()) {
                return Err(DispatchError::AgentFailed {
                    agent: failed.agent.clone(),
                    reason: failed.error.clone().unwrap_or_default(),
                });
            }
            input = join_outputs(&step_outcomes);
            outcomes.extend(step_outcomes);
        }
        Ok((outcomes, input))
    }

    async fn run_mixture(&self, task: &str) -> Result<(Vec<AgentOutcome>, String), DispatchError> {
        let aggregator = self
            .spec
            .aggregator_agent
            .as_deref()
            .map(|name| self.position(name))
            .transpose()?;
        let workers: Vec<usize> = (0..self.agents.len())
            .filter(|&i| Some(i) != aggregator)
            .collect();

        let mut outcomes = self.fan_out(&workers, task).await;
        let Some(aggregator) = aggregator else {
            let output = join_outputs(&outcomes);
            return Ok((outcomes, output));
        };

        let agent = &self.agents[aggregator];
        if !outcomes.iter().any(AgentOutcome::is_success) {
            return Err(DispatchError::NoWorkerOutput(agent.name().to_owned()));
        }

        let responses: Vec<String> = outcomes
            .iter()
            .map(|o| match (&o.output, &o.error) {
                (Some(out), _) => format!("[{}]\n{}", o.agent, out),
                (None, error) => format!(
                    "[{}] failed: {}",
                    o.agent,
                    error.as_deref().unwrap_or("no output")
                ),
            })
            .collect();
        let prompt = format!(
            "{task}\n\nResponses from the other agents:\n\n{}",
            responses.join("\n\n")
        );

        let output = agent.run(&prompt).await.map_err(|e| DispatchError::AgentFailed {
            agent: agent.name().to_owned(),
            reason: e.to_string(),
        })?;
        outcomes.push(AgentOutcome::from_result(agent.name(), Ok(output.clone())));
        Ok((outcomes, output))
    }
}

/// Successful outputs in outcome order, separated by blank lines.
fn join_outputs(outcomes: &[AgentOutcome]) -> String {
    outcomes
        .iter()
        .filter_map(|o| o.output.as_deref())
        .collect::<Vec<_>>()
        .join("\n\n")
}
