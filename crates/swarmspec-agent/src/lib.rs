// ABOUTME: Agent construction and swarm execution for swarmspec.
// ABOUTME: Turns validated specs into live agents behind a model-backend seam and routes tasks across them.

pub mod backend;
pub mod factory;
pub mod persist;
pub mod pipeline;
pub mod retry;
pub mod runtime;
pub mod swarm;
pub mod telemetry;
pub mod testing;

pub use backend::{
    BackendError, EchoBackend, Message, ModelBackend, ModelBackendFactory, Role, RunOptions,
};
pub use factory::{AgentConstructionError, ResilientAgentFactory};
pub use pipeline::{
    ErrorKind, PipelineError, PipelineOptions, PipelineRequest, PipelineResult, TaskResult,
    load_and_validate, run, run_validated,
};
pub use retry::{Backoff, RetryPolicy};
pub use runtime::{Agent, AgentError, AgentRuntime, ConstructError, LlmAgent, LlmAgentRuntime};
pub use swarm::{AgentOutcome, DispatchError, ExecutionOutput, SwarmRouter, choose_strategy};
pub use telemetry::{EventSink, PipelineEvent, TracingSink};
