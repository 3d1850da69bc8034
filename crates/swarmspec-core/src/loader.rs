// ABOUTME: Reads a YAML agent/swarm document from a file or an in-memory string.
// ABOUTME: Parses it into an untyped tree and checks for a non-empty `agents` sequence.

use std::fs;
use std::path::PathBuf;

use serde_yaml::Value;
use thiserror::Error;

/// Errors raised while locating, parsing, or structurally checking a document.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no configuration source given; supply a YAML file path or YAML text")]
    MissingSource,

    #[error("both a YAML file path and YAML text were given; supply exactly one")]
    AmbiguousSource,

    #[error("cannot read config file {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid document structure: {0}")]
    Structure(String),
}

/// Where a document comes from. Built from the caller's optional inputs by
/// [`ConfigSource::from_parts`], which enforces that exactly one is given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Text(String),
}

impl ConfigSource {
    pub fn from_parts(
        file_path: Option<PathBuf>,
        yaml_text: Option<String>,
    ) -> Result<Self, ConfigError> {
        match (file_path, yaml_text) {
            (Some(path), None) => Ok(ConfigSource::File(path)),
            (None, Some(text)) => Ok(ConfigSource::Text(text)),
            (None, None) => Err(ConfigError::MissingSource),
            (Some(_), Some(_)) => Err(ConfigError::AmbiguousSource),
        }
    }
}

/// A parsed document that passed the structural check but has not been
/// validated field by field.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDocument {
    pub agents: Vec<Value>,
    pub swarm_architecture: Option<Value>,
}

/// Load and structurally check a document.
///
/// The only structural requirement is a top-level `agents` sequence with at
/// least one element. Other top-level keys are ignored.
pub fn load(source: &ConfigSource) -> Result<RawDocument, ConfigError> {
    let text = match source {
        ConfigSource::File(path) => {
            tracing::debug!(path = %path.display(), "reading config file");
            fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
                path: path.clone(),
                source,
            })?
        }
        ConfigSource::Text(text) => text.clone(),
    };

    let tree: Value = serde_yaml::from_str(&text)?;
    into_raw_document(tree)
}

fn into_raw_document(tree: Value) -> Result<RawDocument, ConfigError> {
    let Value::Mapping(mut root) = tree else {
        return Err(ConfigError::Structure(
            "top level must be a mapping with an 'agents' key".to_string(),
        ));
    };

    let agents = match root.remove("agents") {
        Some(Value::Sequence(agents)) if !agents.is_empty() => agents,
        Some(Value::Sequence(_)) => {
            return Err(ConfigError::Structure(
                "'agents' must contain at least one agent".to_string(),
            ));
        }
        Some(Value::Null) | None => {
            return Err(ConfigError::Structure(
                "missing required 'agents' sequence".to_string(),
            ));
        }
        Some(_) => {
            return Err(ConfigError::Structure("'agents' must be a sequence".to_string()));
        }
    };

    let swarm_architecture = match root.remove("swarm_architecture") {
        Some(Value::Null) | None => None,
        Some(node) => Some(node),
    };

    Ok(RawDocument {
        agents,
        swarm_architecture,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn load_text(yaml: &str) -> Result<RawDocument, ConfigError> {
        load(&ConfigSource::Text(yaml.to_string()))
    }

    #[test]
    fn from_parts_requires_exactly_one_source() {
        assert!(matches!(
            ConfigSource::from_parts(None, None),
            Err(ConfigError::MissingSource)
        ));
        assert!(matches!(
            ConfigSource::from_parts(Some("a.yaml".into()), Some("agents: []".into())),
            Err(ConfigError::AmbiguousSource)
        ));
        assert_eq!(
            ConfigSource::from_parts(Some("a.yaml".into()), None).unwrap(),
            ConfigSource::File("a.yaml".into())
        );
    }

    #[test]
    fn loads_agents_and_swarm_block() {
        let doc = load_text(
            "agents:\n  - agent_name: A\n    system_prompt: do X\nswarm_architecture:\n  swarm_type: Concurrent\n",
        )
        .unwrap();
        assert_eq!(doc.agents.len(), 1);
        assert!(doc.swarm_architecture.is_some());
    }

    #[test]
    fn ignores_unknown_top_level_keys() {
        let doc = load_text("version: 2\nagents:\n  - agent_name: A\nextra: {a: 1}\n").unwrap();
        assert_eq!(doc.agents.len(), 1);
        assert!(doc.swarm_architecture.is_none());
    }

    #[test]
    fn null_swarm_block_is_absent() {
        let doc = load_text("agents:\n  - agent_name: A\nswarm_architecture:\n").unwrap();
        assert!(doc.swarm_architecture.is_none());
    }

    #[test]
    fn syntax_error_is_parse_error_with_parser_message() {
        let err = load_text("agents: [unclosed").unwrap_err();
        match err {
            ConfigError::Parse(inner) => assert!(!inner.to_string().is_empty()),
            other => panic!("expected Parse, got {other:?}"),
        }
    }

    #[test]
    fn missing_or_empty_agents_is_structure_error() {
        for yaml in ["swarm_architecture: {}\n", "agents: []\n", "agents:\n", "agents: 3\n", "- a\n"] {
            let err = load_text(yaml).unwrap_err();
            assert!(
                matches!(err, ConfigError::Structure(_)),
                "{yaml:?} should be a structure error, got {err:?}"
            );
        }
    }

    #[test]
    fn reads_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("agents.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "agents:\n  - agent_name: FromFile\n    system_prompt: hi").unwrap();

        let doc = load(&ConfigSource::File(path)).unwrap();
        assert_eq!(doc.agents.len(), 1);
    }

    #[test]
    fn unreadable_file_is_source_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("missing.yaml");
        let err = load(&ConfigSource::File(path.clone())).unwrap_err();
        match err {
            ConfigError::Unreadable { path: p, .. } => assert_eq!(p, path),
            other => panic!("expected Unreadable, got {other:?}"),
        }
    }
}
