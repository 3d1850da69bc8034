// ABOUTME: Core library for swarmspec: document loading, validation, and typed specs.
// ABOUTME: Everything here is synchronous and free of model-backend concerns.

pub mod config;
pub mod flow;
pub mod loader;
pub mod spec;
pub mod validate;

pub use config::{RuntimeConfig, RuntimeConfigError};
pub use flow::{FlowError, FlowPlan};
pub use loader::{ConfigError, ConfigSource, RawDocument, load};
pub use spec::{
    AgentSpec, OutputType, ReturnType, SwarmSpec, SwarmType, UnsupportedReturnTypeError,
};
pub use validate::{
    AgentDefaults, ValidatedConfig, ValidationError, validate_agent, validate_document,
    validate_swarm,
};
