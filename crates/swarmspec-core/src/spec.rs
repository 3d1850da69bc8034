// ABOUTME: Typed agent and swarm specifications produced by the validator.
// ABOUTME: Defines AgentSpec, SwarmSpec, SwarmType, OutputType, and the pipeline ReturnType selector.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

/// Model used when neither the agent nor the caller names one.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_USER_NAME: &str = "default_user";
pub const DEFAULT_CONTEXT_LENGTH: u32 = 100_000;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_ARTIFACTS_EXTENSION: &str = ".md";
pub const DEFAULT_SWARM_NAME: &str = "swarm";

/// Output format an agent produces. Only plain strings are supported today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum OutputType {
    #[default]
    #[serde(rename = "str")]
    Str,
}

impl FromStr for OutputType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "str" | "string" => Ok(OutputType::Str),
            _ => Err(()),
        }
    }
}

/// One agent's configuration.
///
/// Documents are turned into specs by [`crate::validate::validate_agent`],
/// which guarantees a non-empty name and system prompt. Specs assembled by
/// hand with [`AgentSpec::new`] are checked again when an agent is built.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[non_exhaustive]
pub struct AgentSpec {
    pub name: String,
    pub system_prompt: String,
    pub model_name: String,
    pub max_loops: u32,
    pub description: Option<String>,
    /// Task run for this agent alone when the `tasks` return type is requested.
    pub task: Option<String>,

    pub autosave: bool,
    pub dashboard: bool,
    pub verbose: bool,
    pub dynamic_temperature_enabled: bool,
    pub auto_generate_prompt: bool,
    pub artifacts_on: bool,

    pub saved_state_path: Option<PathBuf>,
    pub user_name: String,
    pub context_length: u32,
    pub retry_attempts: u32,
    pub output_type: OutputType,
    pub artifacts_file_extension: String,
    pub artifacts_output_path: Option<PathBuf>,
}

impl AgentSpec {
    /// An agent with every optional field at its document default.
    pub fn new(name: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
            model_name: DEFAULT_MODEL.to_string(),
            max_loops: 1,
            description: None,
            task: None,
            autosave: true,
            dashboard: false,
            verbose: false,
            dynamic_temperature_enabled: false,
            auto_generate_prompt: false,
            artifacts_on: false,
            saved_state_path: None,
            user_name: DEFAULT_USER_NAME.to_string(),
            context_length: DEFAULT_CONTEXT_LENGTH,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            output_type: OutputType::Str,
            artifacts_file_extension: DEFAULT_ARTIFACTS_EXTENSION.to_string(),
            artifacts_output_path: None,
        }
    }
}

/// The execution topology a swarm uses to route a task across its agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SwarmType {
    Sequential,
    Concurrent,
    Rearrange,
    MixtureOfAgents,
    Auto,
}

impl SwarmType {
    pub const ALL: [SwarmType; 5] = [
        SwarmType::Sequential,
        SwarmType::Concurrent,
        SwarmType::Rearrange,
        SwarmType::MixtureOfAgents,
        SwarmType::Auto,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            SwarmType::Sequential => "Sequential",
            SwarmType::Concurrent => "Concurrent",
            SwarmType::Rearrange => "Rearrange",
            SwarmType::MixtureOfAgents => "MixtureOfAgents",
            SwarmType::Auto => "Auto",
        }
    }
}

impl fmt::Display for SwarmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for SwarmType {
    type Err = ();

    /// Exact, case-sensitive match against the five topology names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SwarmType::ALL
            .into_iter()
            .find(|t| t.label() == s)
            .ok_or(())
    }
}

/// The validated `swarm_architecture` block of a document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[non_exhaustive]
pub struct SwarmSpec {
    pub name: String,
    pub description: String,
    pub max_loops: u32,
    pub swarm_type: SwarmType,
    pub task: Option<String>,
    pub flow: Option<String>,
    pub autosave: bool,
    pub return_json: bool,
    pub rules: Option<String>,
    /// Agent that synthesizes worker outputs under MixtureOfAgents.
    pub aggregator_agent: Option<String>,
}

impl SwarmSpec {
    /// A swarm with every optional field at its document default. Agent
    /// membership and loop count are checked when it is bound to agents.
    pub fn new(name: impl Into<String>, swarm_type: SwarmType) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            max_loops: 1,
            swarm_type,
            task: None,
            flow: None,
            autosave: false,
            return_json: false,
            rules: None,
            aggregator_agent: None,
        }
    }
}

/// Which artifact(s) a pipeline run hands back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReturnType {
    Auto,
    Swarm,
    Agents,
    Both,
    Tasks,
    RunSwarm,
}

impl ReturnType {
    pub const ALL: [ReturnType; 6] = [
        ReturnType::Auto,
        ReturnType::Swarm,
        ReturnType::Agents,
        ReturnType::Both,
        ReturnType::Tasks,
        ReturnType::RunSwarm,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ReturnType::Auto => "auto",
            ReturnType::Swarm => "swarm",
            ReturnType::Agents => "agents",
            ReturnType::Both => "both",
            ReturnType::Tasks => "tasks",
            ReturnType::RunSwarm => "run_swarm",
        }
    }

    /// True for the return types that cannot be served without a swarm block.
    pub fn requires_swarm(&self) -> bool {
        matches!(self, ReturnType::Swarm | ReturnType::RunSwarm)
    }
}

impl fmt::Display for ReturnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Raised when a caller asks for a return type outside the supported set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported return type '{0}'; expected one of auto, swarm, agents, both, tasks, run_swarm")]
pub struct UnsupportedReturnTypeError(pub String);

impl FromStr for ReturnType {
    type Err = UnsupportedReturnTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReturnType::ALL
            .into_iter()
            .find(|t| t.label() == s)
            .ok_or_else(|| UnsupportedReturnTypeError(s.to_string()))
    }
}
