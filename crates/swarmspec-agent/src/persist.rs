// ABOUTME: Best-effort persistence of agent conversations, agent artifacts, and swarm run outputs.
// ABOUTME: JSON files are written atomically (write to .tmp, fsync, rename) under the workspace directory.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use swarmspec_core::AgentSpec;
use thiserror::Error;
use ulid::Ulid;

use crate::backend::Message;

/// Errors that can occur while writing persisted state.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The saved form of an agent's conversation.
#[derive(Debug, Serialize)]
pub struct ConversationRecord<'a> {
    pub agent_name: &'a str,
    pub model_name: &'a str,
    pub user_name: &'a str,
    pub saved_at: DateTime<Utc>,
    pub messages: &'a [Message],
}

/// Where an agent's conversation is saved: its explicit `saved_state_path`,
/// else `<workspace>/agents/<name>.json`. `None` when neither is available.
pub fn agent_state_path(spec: &AgentSpec, workspace: Option<&Path>) -> Option<PathBuf> {
    spec.saved_state_path.clone().or_else(|| {
        workspace.map(|dir| {
            dir.join("agents")
                .join(format!("{}.json", file_stem(&spec.name)))
        })
    })
}

/// Directory an agent writes artifacts into.
pub fn artifact_dir(spec: &AgentSpec, workspace: Option<&Path>) -> Option<PathBuf> {
    spec.artifacts_output_path
        .clone()
        .or_else(|| workspace.map(|dir| dir.join("artifacts")))
}

/// A fresh, unique output file for one swarm run.
pub fn swarm_output_path(workspace: &Path, swarm_name: &str) -> PathBuf {
    workspace
        .join("swarms")
        .join(format!("{}-{}.json", file_stem(swarm_name), Ulid::new()))
}

/// Serialize `value` as pretty JSON and atomically replace `path` with it.
/// Creates the parent directory if it does not exist.
pub fn save_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), PersistError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(value)?;
    let tmp_path = path.with_extension("tmp");

    let mut file = File::create(&tmp_path)?;
    file.write_all(json.as_bytes())?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Write one artifact as `<agent>-<ulid><extension>` inside `dir` and return
/// its path.
pub fn write_artifact(
    dir: &Path,
    agent_name: &str,
    extension: &str,
    content: &str,
) -> Result<PathBuf, PersistError> {
    fs::create_dir_all(dir)?;
    let extension = extension.trim();
    let dot = if extension.is_empty() || extension.starts_with('.') {
        ""
    } else {
        "."
    };
    let path = dir.join(format!(
        "{}-{}{}{}",
        file_stem(agent_name),
        Ulid::new(),
        dot,
        extension
    ));
    fs::write(&path, content)?;
    Ok(path)
}

/// Agent and swarm names are free text; keep file names portable.
fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
