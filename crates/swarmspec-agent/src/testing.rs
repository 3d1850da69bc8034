// ABOUTME: Test doubles for swarmspec-agent: scripted backends, a spying backend factory, stub agents, and a memory sink.
// ABOUTME: Used in unit and integration tests to drive the pipeline without real model calls.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::{BackendError, Message, ModelBackend, ModelBackendFactory, Role, RunOptions};
use crate::runtime::{Agent, AgentError};
use crate::telemetry::{EventSink, PipelineEvent};

/// Poisoning only happens after a panic in another test thread; keep going.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// A backend that plays back scripted handshake and run results, then falls
/// back to replying `"<agent>: <last user message>"`.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    model: String,
    handshakes: Mutex<VecDeque<Result<(), BackendError>>>,
    results: Mutex<VecDeque<Result<String, BackendError>>>,
    delay: Option<Duration>,
    handshake_calls: AtomicU32,
    run_calls: AtomicU32,
    received: Mutex<Vec<Vec<Message>>>,
    temperatures: Mutex<Vec<f32>>,
}

impl ScriptedBackend {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_owned(),
            ..Self::default()
        }
    }

    /// Fail the first `count` handshakes with `error`.
    pub fn failing_handshakes(self, count: u32, error: BackendError) -> Self {
        lock(&self.handshakes).extend((0..count).map(|_| Err(error.clone())));
        self
    }

    /// Queue successful replies for the next run calls.
    pub fn with_replies<I, S>(self, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        lock(&self.results).extend(replies.into_iter().map(|r| Ok(r.into())));
        self
    }

    /// Queue arbitrary results for the next run calls.
    pub fn with_results(self, results: impl IntoIterator<Item = Result<String, BackendError>>) -> Self {
        lock(&self.results).extend(results);
        self
    }

    /// Sleep this long inside every run call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn handshake_count(&self) -> u32 {
        self.handshake_calls.load(Ordering::SeqCst)
    }

    pub fn run_count(&self) -> u32 {
        self.run_calls.load(Ordering::SeqCst)
    }

    /// Every message list passed to `run`, in call order.
    pub fn received(&self) -> Vec<Vec<Message>> {
        lock(&self.received).clone()
    }

    /// Temperature of every `run` call, in call order.
    pub fn temperatures(&self) -> Vec<f32> {
        lock(&self.temperatures).clone()
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    async fn run(&self, messages: &[Message], options: &RunOptions) -> Result<String, BackendError> {
        self.run_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.received).push(messages.to_vec());
        lock(&self.temperatures).push(options.temperature);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = lock(&self.results).pop_front();
        match scripted {
            Some(result) => result,
            None => {
                let last_user = messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.content.as_str())
                    .unwrap_or_default();
                Ok(format!("{}: {}", options.agent_name, last_user))
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn handshake(&self) -> Result<(), BackendError> {
        self.handshake_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = lock(&self.handshakes).pop_front();
        scripted.unwrap_or(Ok(()))
    }
}

type BackendMaker = dyn Fn(&str) -> ScriptedBackend + Send + Sync;

/// A backend factory that records every model it is asked for and keeps the
/// backends it hands out so tests can inspect them.
pub struct SpyBackendFactory {
    make: Box<BackendMaker>,
    calls: Mutex<Vec<String>>,
    created: Mutex<Vec<Arc<ScriptedBackend>>>,
}

impl Default for SpyBackendFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl SpyBackendFactory {
    /// Hands out plain [`ScriptedBackend`]s.
    pub fn new() -> Self {
        Self::with(ScriptedBackend::new)
    }

    /// Hands out whatever `make` builds for the requested model.
    pub fn with(make: impl Fn(&str) -> ScriptedBackend + Send + Sync + 'static) -> Self {
        Self {
            make: Box::new(make),
            calls: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Model names requested, in call order.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn backends(&self) -> Vec<Arc<ScriptedBackend>> {
        lock(&self.created).clone()
    }
}

impl ModelBackendFactory for SpyBackendFactory {
    fn create(&self, model_name: &str) -> Result<Arc<dyn ModelBackend>, BackendError> {
        lock(&self.calls).push(model_name.to_owned());
        let backend = Arc::new((self.make)(model_name));
        lock(&self.created).push(Arc::clone(&backend));
        Ok(backend)
    }
}

/// Collects every event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        lock(&self.events).clone()
    }
}

impl EventSink for MemorySink {
    fn record(&self, event: &PipelineEvent) -> anyhow::Result<()> {
        lock(&self.events).push(event.clone());
        Ok(())
    }
}

/// A sink that always fails.
#[derive(Debug, Default)]
pub struct FailingSink;

impl EventSink for FailingSink {
    fn record(&self, _event: &PipelineEvent) -> anyhow::Result<()> {
        anyhow::bail!("sink unavailable")
    }
}

/// An agent with fixed behavior: replies `"<name>(<task>)"` or fails, after
/// an optional delay.
#[derive(Debug)]
pub struct StubAgent {
    name: String,
    failure: Option<String>,
    delay: Option<Duration>,
    tasks: Mutex<Vec<String>>,
    completed: AtomicU32,
}

impl StubAgent {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            failure: None,
            delay: None,
            tasks: Mutex::new(Vec::new()),
            completed: AtomicU32::new(0),
        }
    }

    /// Every run fails with a rejected-request error carrying `message`.
    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_owned());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Tasks received, in call order.
    pub fn tasks(&self) -> Vec<String> {
        lock(&self.tasks).clone()
    }

    /// Runs that reached the end (after the delay).
    pub fn completed(&self) -> u32 {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for StubAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, task: &str) -> Result<String, AgentError> {
        lock(&self.tasks).push(task.to_owned());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(message) => Err(AgentError::Backend {
                attempts: 1,
                source: BackendError::Rejected(message.clone()),
            }),
            None => Ok(format!("{}({})", self.name, task)),
        }
    }
}
