//! The capability contract every skill implements, and the manifest format
//! of plugin files.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::AgentState;

/// Everything a skill sees during one invocation
pub struct SkillContext<'a> {
    /// Live agent state; skills may read and write any field
    pub state: &'a mut AgentState,
    /// Invocation time in float seconds
    pub now: f64,
}

impl<'a> SkillContext<'a> {
    pub fn new(state: &'a mut AgentState, now: f64) -> Self {
        Self { state, now }
    }

    /// JSON handed to out-of-process skills
    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        Ok(serde_json::json!({
            "time": self.now,
            "state": serde_json::to_value(&*self.state)?,
        }))
    }
}

/// A capability unit invoked at most once per tick.
///
/// Identity is the declared name, never the file it came from. `Ok(None)` is
/// a zero reward.
#[async_trait]
pub trait Skill: Send + Sync {
    fn name(&self) -> &str;

    async fn invoke(&self, ctx: &mut SkillContext<'_>) -> Result<Option<f64>, SkillError>;
}

/// Skill execution errors
#[derive(Debug, thiserror::Error)]
pub enum SkillError {
    #[error("Unknown skill: {0}")]
    Unknown(String),

    #[error("Skill process exited with {exit_code:?}: {stderr}")]
    Failed { exit_code: Option<i32>, stderr: String },

    #[error("Skill timed out after {0} seconds")]
    Timeout(u64),

    #[error("Skill panicked: {0}")]
    Panicked(String),

    #[error("Command blocked: {0}")]
    Blocked(String),

    #[error("Invalid skill output: {0}")]
    InvalidOutput(String),

    #[error("Skill error: {0}")]
    Internal(String),
}

/// Plugin manifest (`skill_*.toml`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    pub skill: ManifestHeader,
    pub execution: Execution,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestHeader {
    /// Skill identity; `[A-Za-z0-9_]+`
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: String,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// How a plugin produces its reward, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Execution {
    /// `sh -c <command>`, context on stdin, reward on stdout
    Shell {
        command: String,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
    /// Embedded source run by the interpreter for `language`
    Script {
        language: String,
        script: String,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
    /// Constant reward, no process
    Static { reward: f64 },
}

impl PluginManifest {
    pub fn new(name: &str, execution: Execution) -> Self {
        Self {
            skill: ManifestHeader {
                name: name.to_string(),
                version: default_version(),
                description: String::new(),
            },
            execution,
        }
    }

    pub fn validate(&self) -> Result<(), SkillValidationError> {
        let name = &self.skill.name;
        if name.is_empty() {
            return Err(SkillValidationError::EmptyField("skill.name"));
        }
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(SkillValidationError::InvalidName(name.clone()));
        }

        match &self.execution {
            Execution::Shell { command, .. } if command.trim().is_empty() => {
                Err(SkillValidationError::EmptyField("execution.command"))
            }
            Execution::Script { script, .. } if script.trim().is_empty() => {
                Err(SkillValidationError::EmptyField("execution.script"))
            }
            Execution::Static { reward } if !reward.is_finite() => {
                Err(SkillValidationError::NonFiniteReward(*reward))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SkillValidationError {
    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    #[error("Invalid skill name {0:?}: use letters, digits and underscores")]
    InvalidName(String),

    #[error("Static reward must be finite, got {0}")]
    NonFiniteReward(f64),
}
