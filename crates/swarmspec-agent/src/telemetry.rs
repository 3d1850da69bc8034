// ABOUTME: Structured pipeline events and the sink they are reported to.
// ABOUTME: Sinks are best-effort: a failing sink is logged and never alters pipeline results.

use serde::Serialize;
use swarmspec_core::SwarmType;

/// Something observable that happened while building or running a swarm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    AttemptFailed {
        agent: String,
        attempt: u32,
        max_attempts: u32,
        error: String,
        retrying: bool,
    },
    AgentBuilt {
        agent: String,
        model: String,
        attempts: u32,
    },
    DispatchStarted {
        swarm: String,
        strategy: SwarmType,
    },
    DispatchFinished {
        swarm: String,
        strategy: SwarmType,
        loops: u32,
        failures: usize,
    },
    PersistFailed {
        target: String,
        error: String,
    },
}

/// Receives pipeline events.
pub trait EventSink: Send + Sync {
    fn record(&self, event: &PipelineEvent) -> anyhow::Result<()>;
}

/// Default sink: turns every event into a tracing record.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: &PipelineEvent) -> anyhow::Result<()> {
        match event {
            PipelineEvent::AttemptFailed {
                agent,
                attempt,
                max_attempts,
                error,
                retrying,
            } => tracing::warn!(
                agent = %agent,
                attempt,
                max_attempts,
                retrying,
                error = %error,
                "agent construction attempt failed"
            ),
            PipelineEvent::AgentBuilt {
                agent,
                model,
                attempts,
            } => tracing::info!(agent = %agent, model = %model, attempts, "agent built"),
            PipelineEvent::DispatchStarted { swarm, strategy } => {
                tracing::info!(swarm = %swarm, strategy = %strategy, "dispatch started")
            }
            PipelineEvent::DispatchFinished {
                swarm,
                strategy,
                loops,
                failures,
            } => tracing::info!(
                swarm = %swarm,
                strategy = %strategy,
                loops,
                failures,
                "dispatch finished"
            ),
            PipelineEvent::PersistFailed { target, error } => {
                tracing::warn!(target_path = %target, error = %error, "failed to persist state")
            }
        }
        Ok(())
    }
}

/// Hand an event to the sink, logging and swallowing any sink failure.
pub fn emit(sink: &dyn EventSink, event: PipelineEvent) {
    if let Err(e) = sink.record(&event) {
        tracing::warn!(error = %e, ?event, "event sink failed, continuing");
    }
}
