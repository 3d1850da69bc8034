// ABOUTME: Builds agents from validated specs, retrying transient construction failures with backoff.
// ABOUTME: Each attempt is reported to the event sink; the final error names the agent and its last cause.

use std::sync::Arc;

use swarmspec_core::AgentSpec;
use thiserror::Error;

use crate::backend::{ModelBackend, ModelBackendFactory};
use crate::retry::{Backoff, RetryFailure, RetryPolicy};
use crate::runtime::{Agent, AgentRuntime, ConstructError, LlmAgentRuntime};
use crate::telemetry::{EventSink, PipelineEvent, TracingSink, emit};

/// An agent could not be built. `attempts` is zero when no backend could be
/// obtained for it.
#[derive(Debug, Error)]
#[error("failed to construct agent '{agent}' ({attempts} attempt(s)): {source}")]
pub struct AgentConstructionError {
    pub agent: String,
    pub attempts: u32,
    #[source]
    pub source: ConstructError,
}

/// Wraps an [`AgentRuntime`] with a bounded retry policy per agent.
#[derive(Clone)]
pub struct ResilientAgentFactory {
    runtime: Arc<dyn AgentRuntime>,
    backoff: Backoff,
    sink: Arc<dyn EventSink>,
}

impl Default for ResilientAgentFactory {
    fn default() -> Self {
        Self::new(Arc::new(LlmAgentRuntime::new()))
    }
}

impl ResilientAgentFactory {
    pub fn new(runtime: Arc<dyn AgentRuntime>) -> Self {
        Self {
            runtime,
            backoff: Backoff::default(),
            sink: Arc::new(TracingSink),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// The policy applied to `spec`: `retry_attempts` total attempts, at
    /// least one.
    pub fn policy_for(&self, spec: &AgentSpec) -> RetryPolicy {
        RetryPolicy::new(spec.retry_attempts).with_backoff(self.backoff)
    }

    /// Construct one agent. Transient failures are retried up to the agent's
    /// attempt limit; anything else fails immediately.
    pub async fn build(
        &self,
        spec: &AgentSpec,
        backend: Arc<dyn ModelBackend>,
    ) -> Result<Arc<dyn Agent>, AgentConstructionError> {
        let policy = self.policy_for(spec);
        let model = backend.model_name().to_owned();
        let runtime = &self.runtime;
        let sink = self.sink.as_ref();

        let result = policy
            .retry(
                |_| runtime.construct(spec, Arc::clone(&backend)),
                ConstructError::is_transient,
                |failure: &RetryFailure<'_, ConstructError>| {
                    emit(
                        sink,
                        PipelineEvent::AttemptFailed {
                            agent: spec.name.clone(),
                            attempt: failure.attempt,
                            max_attempts: failure.max_attempts,
                            error: failure.error.to_string(),
                            retrying: failure.next_delay.is_some(),
                        },
                    );
                    if let Some(delay) = failure.next_delay {
                        tracing::debug!(agent = %spec.name, delay_ms = delay.as_millis() as u64, "backing off before next attempt");
                    }
                },
            )
            .await;

        match result {
            Ok((agent, attempts)) => {
                emit(
                    sink,
                    PipelineEvent::AgentBuilt {
                        agent: spec.name.clone(),
                        model,
                        attempts,
                    },
                );
                Ok(agent)
            }
            Err(e) => {
                tracing::error!(agent = %spec.name, attempts = e.attempts, error = %e.source, "giving up on agent construction");
                Err(AgentConstructionError {
                    agent: spec.name.clone(),
                    attempts: e.attempts,
                    source: e.source,
                })
            }
        }
    }

    /// Obtain a backend for the agent's model from `backends`, then build.
    pub async fn build_with(
        &self,
        spec: &AgentSpec,
        backends: &dyn ModelBackendFactory,
    ) -> Result<Arc<dyn Agent>, AgentConstructionError> {
        let backend = backends
            .create(&spec.model_name)
            .map_err(|e| AgentConstructionError {
                agent: spec.name.clone(),
                attempts: 0,
                source: ConstructError::Backend(e),
            })?;
        self.build(spec, backend).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;
    use crate::testing::{MemorySink, ScriptedBackend};
    use std::time::Duration;

    fn fast_factory(sink: Arc<MemorySink>) -> ResilientAgentFactory {
        let backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(2));
        ResilientAgentFactory::new(Arc::new(LlmAgentRuntime::new().with_backoff(backoff)))
            .with_backoff(backoff)
            .with_sink(sink)
    }

    fn spec(retry_attempts: u32) -> AgentSpec {
        let mut spec = AgentSpec::new("Analyst", "analyze");
        spec.retry_attempts = retry_attempts;
        spec.autosave = false;
        spec
    }

    fn failed_attempts(sink: &MemorySink) -> usize {
        sink.events()
            .iter()
            .filter(|e| matches!(e, PipelineEvent::AttemptFailed { .. }))
            .count()
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        for k in 0..3u32 {
            let sink = Arc::new(MemorySink::new());
            let backend = Arc::new(
                ScriptedBackend::new("m").failing_handshakes(k, BackendError::Timeout("slow".into())),
            );
            let agent = fast_factory(sink.clone())
                .build(&spec(3), backend.clone())
                .await
                .unwrap();

            assert_eq!(agent.name(), "Analyst");
            assert_eq!(backend.handshake_count(), k + 1);
            assert_eq!(failed_attempts(&sink), k as usize);
            assert!(sink.events().contains(&PipelineEvent::AgentBuilt {
                agent: "Analyst".into(),
                model: "m".into(),
                attempts: k + 1,
            }));
        }
    }

    #[tokio::test]
    async fn gives_up_after_retry_attempts() {
        for k in [3u32, 5] {
            let sink = Arc::new(MemorySink::new());
            let backend = Arc::new(
                ScriptedBackend::new("m").failing_handshakes(k, BackendError::Connection("reset".into())),
            );
            let err = match fast_factory(sink.clone()).build(&spec(3), backend.clone()).await {
                Err(e) => e,
                Ok(_) => panic!("expected construction to fail"),
            };

            assert_eq!(err.agent, "Analyst");
            assert_eq!(err.attempts, 3);
            assert!(matches!(err.source, ConstructError::Backend(BackendError::Connection(_))));
            assert_eq!(backend.handshake_count(), 3);
            assert_eq!(failed_attempts(&sink), 3);
        }
    }

    #[tokio::test]
    async fn zero_retry_attempts_still_tries_once() {
        let sink = Arc::new(MemorySink::new());
        let backend = Arc::new(
            ScriptedBackend::new("m").failing_handshakes(1, BackendError::RateLimited),
        );
        let result = fast_factory(sink).build(&spec(0), backend.clone()).await;
        assert!(result.is_err());
        assert_eq!(backend.handshake_count(), 1);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let sink = Arc::new(MemorySink::new());
        let backend = Arc::new(
            ScriptedBackend::new("m").failing_handshakes(1, BackendError::Rejected("bad key".into())),
        );
        let err = match fast_factory(sink).build(&spec(5), backend.clone()).await {
            Err(e) => e,
            Ok(_) => panic!("expected construction to fail"),
        };
        assert_eq!(err.attempts, 1);
        assert_eq!(backend.handshake_count(), 1);
        assert!(err.to_string().contains("Analyst"), "{err}");
    }

    #[tokio::test]
    async fn hand_built_spec_with_blank_prompt_is_rejected() {
        let sink = Arc::new(MemorySink::new());
        let backend = Arc::new(ScriptedBackend::new("m"));
        let mut blank = spec(3);
        blank.system_prompt = "   ".into();

        let err = match fast_factory(sink).build(&blank, backend.clone()).await {
            Err(e) => e,
            Ok(_) => panic!("expected construction to fail"),
        };

        assert_eq!(err.attempts, 1);
        assert!(matches!(err.source, ConstructError::Invalid(_)));
        assert_eq!(backend.handshake_count(), 0);
    }

    #[tokio::test]
    async fn backend_creation_failure_is_a_construction_error() {
        let factory = fast_factory(Arc::new(MemorySink::new()));
        let backends = |_: &str| -> Result<Arc<dyn ModelBackend>, BackendError> {
            Err(BackendError::InvalidRequest("unknown model".into()))
        };
        let err = match factory.build_with(&spec(3), &backends).await {
            Err(e) => e,
            Ok(_) => panic!("expected construction to fail"),
        };
        assert_eq!(err.attempts, 0);
        assert_eq!(err.agent, "Analyst");
    }
}
