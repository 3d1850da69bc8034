// ABOUTME: The model backend seam: the one capability the orchestration layer needs from an LLM.
// ABOUTME: Defines ModelBackend, ModelBackendFactory, chat messages, BackendError, and the offline EchoBackend.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Who authored a message in an agent conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat message handed to a model backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            name: None,
            content: content.into(),
        }
    }

    pub fn user(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            name: Some(name.into()),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            name: None,
            content: content.into(),
        }
    }
}

/// Per-call options. The backend may ignore any of them.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub agent_name: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl RunOptions {
    pub fn for_agent(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            temperature: 0.5,
            max_tokens: None,
        }
    }
}

/// Errors a model backend can report. Only connectivity and capacity
/// failures are transient.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("rate limited")]
    RateLimited,

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl BackendError {
    /// True when retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BackendError::Timeout(_)
                | BackendError::Connection(_)
                | BackendError::RateLimited
                | BackendError::Unavailable(_)
        )
    }
}

/// A model the agents reason with. The pipeline never looks past this trait.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Run the conversation and return the model's reply text.
    async fn run(&self, messages: &[Message], options: &RunOptions) -> Result<String, BackendError>;

    /// Model identifier being used (e.g. "gpt-4o-mini").
    fn model_name(&self) -> &str;

    /// Verify the backend is reachable. Called once per agent construction
    /// attempt by the default runtime.
    async fn handshake(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Produces one backend per agent from the agent's resolved model name.
pub trait ModelBackendFactory: Send + Sync {
    fn create(&self, model_name: &str) -> Result<Arc<dyn ModelBackend>, BackendError>;
}

impl<F> ModelBackendFactory for F
where
    F: Fn(&str) -> Result<Arc<dyn ModelBackend>, BackendError> + Send + Sync,
{
    fn create(&self, model_name: &str) -> Result<Arc<dyn ModelBackend>, BackendError> {
        self(model_name)
    }
}

/// Offline backend that answers with the model name and the latest user
/// message. Lets a document be exercised end to end without a provider.
#[derive(Debug, Clone)]
pub struct EchoBackend {
    model: String,
}

impl EchoBackend {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }

    /// A factory producing one EchoBackend per requested model.
    pub fn factory() -> impl ModelBackendFactory {
        |model: &str| -> Result<Arc<dyn ModelBackend>, BackendError> {
            Ok(Arc::new(EchoBackend::new(model)))
        }
    }
}

#[async_trait]
impl ModelBackend for EchoBackend {
    async fn run(&self, messages: &[Message], options: &RunOptions) -> Result<String, BackendError> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .ok_or_else(|| BackendError::InvalidRequest("no user message".to_string()))?;
        Ok(format!(
            "[{} as {}] {}",
            self.model, options.agent_name, last_user.content
        ))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(BackendError::Timeout("t".into()).is_transient());
        assert!(BackendError::Connection("reset".into()).is_transient());
        assert!(BackendError::RateLimited.is_transient());
        assert!(BackendError::Unavailable("503".into()).is_transient());
        assert!(!BackendError::Rejected("401".into()).is_transient());
        assert!(!BackendError::InvalidRequest("bad".into()).is_transient());
    }

    #[tokio::test]
    async fn echo_replies_to_latest_user_message() {
        let backend = EchoBackend::new("echo-1");
        let messages = vec![
            Message::system("be brief"),
            Message::user("u", "first"),
            Message::assistant("ok"),
            Message::user("u", "second"),
        ];
        let reply = backend
            .run(&messages, &RunOptions::for_agent("A"))
            .await
            .unwrap();
        assert_eq!(reply, "[echo-1 as A] second");
    }

    #[tokio::test]
    async fn echo_without_user_message_is_invalid() {
        let backend = EchoBackend::new("echo-1");
        let err = backend
            .run(&[Message::system("s")], &RunOptions::for_agent("A"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn echo_factory_creates_backend_per_model() {
        let factory = EchoBackend::factory();
        let backend = factory.create("m-2").unwrap();
        assert_eq!(backend.model_name(), "m-2");
        assert!(backend.handshake().await.is_ok());
    }

    #[test]
    fn message_serializes_role_lowercase() {
        let json = serde_json::to_value(Message::user("alice", "hi")).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["name"], "alice");
        let json = serde_json::to_value(Message::system("s")).unwrap();
        assert!(json.get("name").is_none());
    }
}
