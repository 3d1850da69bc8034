// ABOUTME: Turns raw YAML agent and swarm nodes into typed AgentSpec and SwarmSpec values.
// ABOUTME: Applies field defaults, ignores unknown keys, and names the offending field on failure.

use std::collections::HashSet;
use std::path::PathBuf;

use serde_yaml::{Mapping, Value};
use thiserror::Error;

use crate::loader::RawDocument;
use crate::spec::{
    AgentSpec, DEFAULT_ARTIFACTS_EXTENSION, DEFAULT_CONTEXT_LENGTH, DEFAULT_MODEL,
    DEFAULT_RETRY_ATTEMPTS, DEFAULT_SWARM_NAME, DEFAULT_USER_NAME, OutputType, SwarmSpec,
    SwarmType,
};

/// A field that violates its contract. `field` is a dotted path such as
/// `agents[1].system_prompt`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {constraint}")]
pub struct ValidationError {
    pub field: String,
    pub constraint: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, constraint: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            constraint: constraint.into(),
        }
    }

    /// Prefix the field path with the location of the node it came from.
    fn within(self, prefix: &str) -> Self {
        Self {
            field: format!("{}.{}", prefix, self.field),
            constraint: self.constraint,
        }
    }
}

/// Values the caller supplies for fields a document may leave out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentDefaults {
    pub model_name: String,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_MODEL.to_string(),
        }
    }
}

/// A fully validated document.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedConfig {
    pub agents: Vec<AgentSpec>,
    pub swarm: Option<SwarmSpec>,
}

/// Read-only view over a YAML mapping with typed, field-naming accessors.
/// A key holding `null` is treated the same as a missing key.
struct Fields<'a> {
    map: &'a Mapping,
}

impl<'a> Fields<'a> {
    fn of(node: &'a Value) -> Result<Self, ValidationError> {
        match node {
            Value::Mapping(map) => Ok(Self { map }),
            _ => Err(ValidationError::new("<node>", "must be a mapping")),
        }
    }

    fn get(&self, key: &str) -> Option<&'a Value> {
        match self.map.get(key) {
            Some(Value::Null) | None => None,
            Some(value) => Some(value),
        }
    }

    fn string(&self, key: &str) -> Result<Option<String>, ValidationError> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(ValidationError::new(key, "must be a string")),
        }
    }

    /// A string that, when present, must not be blank. Returned trimmed.
    fn text(&self, key: &str) -> Result<Option<String>, ValidationError> {
        match self.string(key)? {
            None => Ok(None),
            Some(s) if s.trim().is_empty() => {
                Err(ValidationError::new(key, "must not be empty"))
            }
            Some(s) => Ok(Some(s.trim().to_string())),
        }
    }

    fn required_text(&self, key: &str) -> Result<String, ValidationError> {
        self.text(key)?
            .ok_or_else(|| ValidationError::new(key, "is required"))
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, ValidationError> {
        match self.get(key) {
            None => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(_) => Err(ValidationError::new(key, "must be a boolean")),
        }
    }

    fn count(&self, key: &str, default: u32, min: u32) -> Result<u32, ValidationError> {
        let constraint = if min == 0 {
            "must be a non-negative integer"
        } else {
            "must be a positive integer"
        };
        let Some(value) = self.get(key) else {
            return Ok(default);
        };
        value
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .filter(|n| *n >= min)
            .ok_or_else(|| ValidationError::new(key, constraint))
    }

    fn path(&self, key: &str) -> Result<Option<PathBuf>, ValidationError> {
        Ok(self.text(key)?.map(PathBuf::from))
    }
}

/// Validate one entry of the `agents` sequence.
///
/// Fails when the name or system prompt is missing, not a string, or blank
/// after trimming, and when any known field has the wrong type. Unknown keys
/// are ignored.
pub fn validate_agent(node: &Value, defaults: &AgentDefaults) -> Result<AgentSpec, ValidationError> {
    let fields = Fields::of(node)?;

    let name = match fields.text("agent_name")? {
        Some(name) => name,
        None => fields
            .text("name")?
            .ok_or_else(|| ValidationError::new("agent_name", "is required"))?,
    };

    let output_type = match fields.text("output_type")? {
        None => OutputType::default(),
        Some(raw) => raw
            .parse::<OutputType>()
            .map_err(|_| ValidationError::new("output_type", format!("unsupported value '{raw}'; expected 'str'")))?,
    };

    Ok(AgentSpec {
        system_prompt: fields.required_text("system_prompt")?,
        model_name: fields
            .text("model_name")?
            .unwrap_or_else(|| defaults.model_name.clone()),
        max_loops: fields.count("max_loops", 1, 1)?,
        description: fields.string("description")?,
        task: fields.text("task")?,
        autosave: fields.flag("autosave", true)?,
        dashboard: fields.flag("dashboard", false)?,
        verbose: fields.flag("verbose", false)?,
        dynamic_temperature_enabled: fields.flag("dynamic_temperature_enabled", false)?,
        auto_generate_prompt: fields.flag("auto_generate_prompt", false)?,
        artifacts_on: fields.flag("artifacts_on", false)?,
        saved_state_path: fields.path("saved_state_path")?,
        user_name: fields
            .text("user_name")?
            .unwrap_or_else(|| DEFAULT_USER_NAME.to_string()),
        context_length: fields.count("context_length", DEFAULT_CONTEXT_LENGTH, 1)?,
        retry_attempts: fields.count("retry_attempts", DEFAULT_RETRY_ATTEMPTS, 0)?,
        output_type,
        artifacts_file_extension: fields
            .text("artifacts_file_extension")?
            .unwrap_or_else(|| DEFAULT_ARTIFACTS_EXTENSION.to_string()),
        artifacts_output_path: fields.path("artifacts_output_path")?,
        name,
    })
}

/// Validate the `swarm_architecture` block.
///
/// Fails closed when `swarm_type` is absent or not one of the five topology
/// names; values are never coerced.
pub fn validate_swarm(node: &Value) -> Result<SwarmSpec, ValidationError> {
    let fields = Fields::of(node)?;

    let raw_type = fields
        .string("swarm_type")?
        .ok_or_else(|| ValidationError::new("swarm_type", "is required"))?;
    let swarm_type = raw_type.parse::<SwarmType>().map_err(|_| {
        ValidationError::new(
            "swarm_type",
            format!(
                "unknown value '{raw_type}'; expected one of Sequential, Concurrent, Rearrange, MixtureOfAgents, Auto"
            ),
        )
    })?;

    Ok(SwarmSpec {
        name: fields
            .text("name")?
            .unwrap_or_else(|| DEFAULT_SWARM_NAME.to_string()),
        description: fields.string("description")?.unwrap_or_default(),
        max_loops: fields.count("max_loops", 1, 1)?,
        swarm_type,
        task: fields.text("task")?,
        flow: fields.text("flow")?,
        autosave: fields.flag("autosave", false)?,
        return_json: fields.flag("return_json", false)?,
        rules: fields.text("rules")?,
        aggregator_agent: fields.text("aggregator_agent")?,
    })
}

/// Validate every agent and the optional swarm block of a loaded document.
/// Agent names must be unique within the document.
pub fn validate_document(
    raw: &RawDocument,
    defaults: &AgentDefaults,
) -> Result<ValidatedConfig, ValidationError> {
    let mut agents = Vec::with_capacity(raw.agents.len());
    let mut seen = HashSet::new();

    for (index, node) in raw.agents.iter().enumerate() {
        let location = format!("agents[{index}]");
        let spec = validate_agent(node, defaults).map_err(|e| e.within(&location))?;
        if !seen.insert(spec.name.clone()) {
            return Err(ValidationError::new(
                format!("{location}.agent_name"),
                format!("duplicate agent name '{}'", spec.name),
            ));
        }
        agents.push(spec);
    }

    let swarm = raw
        .swarm_architecture
        .as_ref()
        .map(|node| validate_swarm(node).map_err(|e| e.within("swarm_architecture")))
        .transpose()?;

    Ok(ValidatedConfig { agents, swarm })
}
