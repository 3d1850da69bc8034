// ABOUTME: Defines the Agent and AgentRuntime traits plus the default LLM-backed runtime.
// ABOUTME: An LlmAgent runs max_loops reasoning passes against its backend, retrying transient failures.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use swarmspec_core::AgentSpec;
use tokio::sync::Mutex;

use crate::backend::{BackendError, Message, ModelBackend, RunOptions};
use crate::persist::{self, ConversationRecord};
use crate::retry::{Backoff, RetryFailure, RetryPolicy};
use crate::telemetry::{EventSink, PipelineEvent, TracingSink, emit};

const BASE_TEMPERATURE: f32 = 0.5;
/// Temperatures cycled through when dynamic temperature is enabled.
const TEMPERATURE_STEPS: [f32; 4] = [0.2, 0.5, 0.8, 1.0];

const REFINE_PROMPT: &str =
    "Review your previous answer. Correct any mistakes and improve it, then give the full revised answer.";

const PROMPT_WRITER: &str = "You write system prompts for AI agents. Given an agent's name, description and draft prompt, reply with an improved system prompt and nothing else.";

/// A ready-to-run agent.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    /// Run one task to completion and return the final answer.
    async fn run(&self, task: &str) -> Result<String, AgentError>;
}

impl fmt::Debug for dyn Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent").field("name", &self.name()).finish()
    }
}

/// Errors that can occur while an agent runs a task.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("model backend failed after {attempts} attempt(s): {source}")]
    Backend {
        attempts: u32,
        #[source]
        source: BackendError,
    },

    #[error("task is empty")]
    EmptyTask,
}

/// Errors that can occur while constructing an agent.
#[derive(Debug, thiserror::Error)]
pub enum ConstructError {
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("invalid agent configuration: {0}")]
    Invalid(String),
}

impl ConstructError {
    /// Only backend connectivity and capacity failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            ConstructError::Backend(e) => e.is_transient(),
            ConstructError::Invalid(_) => false,
        }
    }
}

/// Turns a validated spec and a backend into a runnable agent. Construction
/// is the single step the resilient factory retries.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn construct(
        &self,
        spec: &AgentSpec,
        backend: Arc<dyn ModelBackend>,
    ) -> Result<Arc<dyn Agent>, ConstructError>;
}

/// The default runtime: builds [`LlmAgent`]s.
#[derive(Clone)]
pub struct LlmAgentRuntime {
    workspace_dir: Option<PathBuf>,
    backoff: Backoff,
    sink: Arc<dyn EventSink>,
}

impl Default for LlmAgentRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmAgentRuntime {
    pub fn new() -> Self {
        Self {
            workspace_dir: None,
            backoff: Backoff::default(),
            sink: Arc::new(TracingSink),
        }
    }

    /// Directory agent state and artifacts default to when a spec names none.
    pub fn with_workspace(mut self, workspace_dir: Option<PathBuf>) -> Self {
        self.workspace_dir = workspace_dir;
        self
    }

    /// Backoff window for retrying transient backend failures during a run.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    async fn resolve_system_prompt(
        &self,
        spec: &AgentSpec,
        backend: &dyn ModelBackend,
    ) -> Result<String, ConstructError> {
        if !spec.auto_generate_prompt {
            return Ok(spec.system_prompt.clone());
        }

        let request = format!(
            "Agent name: {}\nDescription: {}\nDraft prompt:\n{}",
            spec.name,
            spec.description.as_deref().unwrap_or("(none)"),
            spec.system_prompt
        );
        let messages = [
            Message::system(PROMPT_WRITER),
            Message::user(&spec.user_name, request),
        ];
        let generated = backend
            .run(&messages, &RunOptions::for_agent(&spec.name))
            .await?;

        let generated = generated.trim();
        if generated.is_empty() {
            tracing::warn!(agent = %spec.name, "generated system prompt was blank, keeping the original");
            Ok(spec.system_prompt.clone())
        } else {
            Ok(generated.to_string())
        }
    }
}

#[async_trait]
impl AgentRuntime for LlmAgentRuntime {
    async fn construct(
        &self,
        spec: &AgentSpec,
        backend: Arc<dyn ModelBackend>,
    ) -> Result<Arc<dyn Agent>, ConstructError> {
        check_spec(spec)?;
        backend.handshake().await?;
        let system_prompt = self.resolve_system_prompt(spec, backend.as_ref()).await?;
        let prompt_tokens = estimate_tokens(&system_prompt);
        if prompt_tokens > spec.context_length as usize {
            return Err(ConstructError::Invalid(format!(
                "system prompt needs about {prompt_tokens} tokens but context_length is {}",
                spec.context_length
            )));
        }

        if spec.dashboard {
            tracing::info!(
                agent = %spec.name,
                model = %backend.model_name(),
                max_loops = spec.max_loops,
                context_length = spec.context_length,
                retry_attempts = spec.retry_attempts,
                autosave = spec.autosave,
                artifacts_on = spec.artifacts_on,
                "agent dashboard"
            );
        }

        Ok(Arc::new(LlmAgent {
            spec: spec.clone(),
            system_prompt,
            backend,
            retry: RetryPolicy::new(spec.retry_attempts).with_backoff(self.backoff),
            workspace_dir: self.workspace_dir.clone(),
            sink: Arc::clone(&self.sink),
            history: Mutex::new(Vec::new()),
        }))
    }
}

/// Reject specs that were assembled by hand and skipped validation.
fn check_spec(spec: &AgentSpec) -> Result<(), ConstructError> {
    if spec.name.trim().is_empty() {
        return Err(ConstructError::Invalid("agent name is blank".into()));
    }
    if spec.system_prompt.trim().is_empty() {
        return Err(ConstructError::Invalid(format!(
            "agent '{}' has a blank system prompt",
            spec.name
        )));
    }
    if spec.max_loops == 0 {
        return Err(ConstructError::Invalid(format!(
            "agent '{}' must run at least one loop",
            spec.name
        )));
    }
    Ok(())
}

/// An agent backed by a [`ModelBackend`]. Its conversation history is
/// exclusive to it and shared across the tasks it runs.
pub struct LlmAgent {
    spec: AgentSpec,
    system_prompt: String,
    backend: Arc<dyn ModelBackend>,
    retry: RetryPolicy,
    workspace_dir: Option<PathBuf>,
    sink: Arc<dyn EventSink>,
    history: Mutex<Vec<Message>>,
}

impl LlmAgent {
    fn temperature_for(&self, pass: u32) -> f32 {
        if self.spec.dynamic_temperature_enabled {
            TEMPERATURE_STEPS[pass as usize % TEMPERATURE_STEPS.len()]
        } else {
            BASE_TEMPERATURE
        }
    }

    async fn complete(&self, messages: &[Message], options: &RunOptions) -> Result<String, AgentError> {
        let backend = &self.backend;
        let agent = self.spec.name.as_str();
        let (reply, _) = self
            .retry
            .retry(
                move |_| backend.run(messages, options),
                BackendError::is_transient,
                |failure: &RetryFailure<'_, BackendError>| {
                    tracing::warn!(
                        agent = %agent,
                        attempt = failure.attempt,
                        max_attempts = failure.max_attempts,
                        error = %failure.error,
                        "model call failed"
                    );
                },
            )
            .await
            .map_err(|e| AgentError::Backend {
                attempts: e.attempts,
                source: e.source,
            })?;
        Ok(reply)
    }

    fn persist(&self, history: &[Message], answer: &str) {
        let workspace = self.workspace_dir.as_deref();

        let state_path = self
            .spec
            .autosave
            .then(|| persist::agent_state_path(&self.spec, workspace))
            .flatten();
        if let Some(path) = state_path {
            let record = ConversationRecord {
                agent_name: &self.spec.name,
                model_name: self.backend.model_name(),
                user_name: &self.spec.user_name,
                saved_at: Utc::now(),
                messages: history,
            };
            if let Err(e) = persist::save_json(&path, &record) {
                self.report_persist_failure(&path, e);
            }
        }

        let artifact_dir = self
            .spec
            .artifacts_on
            .then(|| persist::artifact_dir(&self.spec, workspace))
            .flatten();
        if let Some(dir) = artifact_dir {
            match persist::write_artifact(
                &dir,
                &self.spec.name,
                &self.spec.artifacts_file_extension,
                answer,
            ) {
                Ok(path) => tracing::debug!(agent = %self.spec.name, path = %path.display(), "artifact written"),
                Err(e) => self.report_persist_failure(&dir, e),
            }
        }
    }

    fn report_persist_failure(&self, target: &Path, error: persist::PersistError) {
        emit(
            self.sink.as_ref(),
            PipelineEvent::PersistFailed {
                target: target.display().to_string(),
                error: error.to_string(),
            },
        );
    }
}

#[async_trait]
impl Agent for LlmAgent {
    fn name(&self) -> &str {
        &self.spec.name
    }

    async fn run(&self, task: &str) -> Result<String, AgentError> {
        if task.trim().is_empty() {
            return Err(AgentError::EmptyTask);
        }

        let mut history = self.history.lock().await;
        history.push(Message::user(&self.spec.user_name, task));

        let mut answer = String::new();
        for pass in 0..self.spec.max_loops {
            if pass > 0 {
                history.push(Message::user(&self.spec.user_name, REFINE_PROMPT));
            }
            trim_history(&self.system_prompt, &mut history, self.spec.context_length);

            let messages: Vec<Message> = std::iter::once(Message::system(&self.system_prompt))
                .chain(history.iter().cloned())
                .collect();
            let options = RunOptions {
                temperature: self.temperature_for(pass),
                ..RunOptions::for_agent(&self.spec.name)
            };

            let reply = self.complete(&messages, &options).await?;

            if self.spec.verbose {
                tracing::info!(
                    agent = %self.spec.name,
                    pass = pass + 1,
                    max_loops = self.spec.max_loops,
                    chars = reply.len(),
                    "agent loop complete"
                );
            } else {
                tracing::debug!(agent = %self.spec.name, pass = pass + 1, "agent loop complete");
            }

            history.push(Message::assistant(&reply));
            answer = reply;
        }

        self.persist(&history, &answer);
        Ok(answer)
    }
}

/// Rough token estimate: four characters per token.
fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Drop the oldest messages until the conversation fits `context_length`
/// tokens. The newest message is always kept.
fn trim_history(system_prompt: &str, history: &mut Vec<Message>, context_length: u32) {
    let budget = context_length as usize;
    let mut total = estimate_tokens(system_prompt)
        + history
            .iter()
            .map(|m| estimate_tokens(&m.content))
            .sum::<usize>();

    let mut dropped = 0;
    while total > budget && history.len() - dropped > 1 {
        total -= estimate_tokens(&history[dropped].content);
        dropped += 1;
    }
    if dropped > 0 {
        history.drain(..dropped);
        tracing::debug!(dropped, "trimmed conversation to fit context length");
    }
}
