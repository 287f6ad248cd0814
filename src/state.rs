//! Agent State Store
//!
//! The single mutable root of the agent, persisted as one JSON document.
//!
//! - Fixed core schema (`ticks`, `q`, `n`, `epsilon`, `alpha`, ...)
//! - Open side-table for skill-private keys, round-tripped verbatim
//! - Atomic replace on save (temp file + fsync + rename)
//! - Corrupt documents are quarantined, never deleted

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Number of `{tick, action, reward}` records kept in `last_actions`
pub const LAST_ACTIONS_CAP: usize = 25;

pub const STATE_VERSION: u32 = 1;

const DEFAULT_ORIGIN: &str = "seedloop: minimal tick core";

/// State store errors
#[derive(Error, Debug)]
pub enum StateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid state patch: {0}")]
    InvalidPatch(String),
}

/// One entry of the short-term audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    #[serde(alias = "t")]
    pub tick: u64,
    pub action: String,
    pub reward: f64,
}

/// Persistent agent state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default)]
    pub ticks: u64,
    /// Action-value estimates
    #[serde(default)]
    pub q: BTreeMap<String, f64>,
    /// Visit counts
    #[serde(default)]
    pub n: BTreeMap<String, u64>,
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default)]
    pub last_actions: VecDeque<ActionRecord>,
    #[serde(default)]
    pub notes: Vec<String>,
    /// Name of the most recent log archive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_rotation_file: Option<String>,
    /// Tick at which rotation was last considered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_rotation_check_tick: Option<u64>,
    /// Skill-private keys
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_version() -> u32 {
    STATE_VERSION
}

fn default_epsilon() -> f64 {
    0.2
}

fn default_alpha() -> f64 {
    0.3
}

impl Default for AgentState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            origin: Some(DEFAULT_ORIGIN.to_string()),
            ticks: 0,
            q: BTreeMap::new(),
            n: BTreeMap::new(),
            epsilon: default_epsilon(),
            alpha: default_alpha(),
            last_actions: VecDeque::new(),
            notes: Vec::new(),
            last_rotation_file: None,
            last_rotation_check_tick: None,
            extra: Map::new(),
        }
    }
}

impl AgentState {
    /// Append to the audit trail, evicting the oldest records past the cap
    pub fn push_action(&mut self, record: ActionRecord) {
        self.last_actions.push_back(record);
        while self.last_actions.len() > LAST_ACTIONS_CAP {
            self.last_actions.pop_front();
        }
    }

    /// Read a skill-private key
    pub fn get_extra<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.extra
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Write a skill-private key
    pub fn set_extra<T: Serialize>(&mut self, key: &str, value: T) -> Result<(), StateError> {
        self.extra.insert(key.to_string(), serde_json::to_value(value)?);
        Ok(())
    }

    /// Replace top-level keys from a JSON object.
    ///
    /// The patch is applied to a copy; if the result no longer fits the core
    /// schema the state is left untouched.
    pub fn apply_patch(&mut self, patch: &Map<String, Value>) -> Result<(), StateError> {
        if patch.is_empty() {
            return Ok(());
        }

        let mut doc = match serde_json::to_value(&*self)? {
            Value::Object(map) => map,
            _ => return Err(StateError::InvalidPatch("state is not an object".to_string())),
        };
        for (key, value) in patch {
            doc.insert(key.clone(), value.clone());
        }

        let patched: AgentState = serde_json::from_value(Value::Object(doc))
            .map_err(|e| StateError::InvalidPatch(e.to_string()))?;
        *self = patched;
        Ok(())
    }
}

/// File-backed store for [`AgentState`]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the state document.
    ///
    /// A missing document is created with defaults. An unreadable one is
    /// renamed aside and replaced with defaults.
    pub fn load(&self) -> Result<AgentState, StateError> {
        if self.path.exists() {
            match self.read() {
                Ok(state) => {
                    debug!("Loaded state at tick {}", state.ticks);
                    return Ok(state);
                }
                Err(e) => {
                    let quarantine = self.quarantine()?;
                    warn!(
                        "State file unreadable ({}), moved to {}",
                        e,
                        quarantine.display()
                    );
                }
            }
        }

        let state = AgentState::default();
        self.save(&state)?;
        info!("Created fresh state at {}", self.path.display());
        Ok(state)
    }

    /// Read the document without creating or quarantining anything, for
    /// processes other than the engine. A missing file reads as defaults.
    pub fn read(&self) -> Result<AgentState, StateError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AgentState::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist via temp file + rename so readers never see a partial document
    pub fn save(&self, state: &AgentState) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let data = serde_json::to_string_pretty(state)?;

        let temp_path = self.path.with_extension("tmp");
        {
            let mut file = std::fs::File::create(&temp_path)?;
            file.write_all(data.as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&temp_path, &self.path)?;

        Ok(())
    }

    /// Rename the current document aside without clobbering older quarantines
    fn quarantine(&self) -> Result<PathBuf, StateError> {
        let stem = self
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("state");

        let mut target = self.path.with_file_name(format!("{}.corrupt.json", stem));
        if target.exists() {
            let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
            target = self.path.with_file_name(format!("{}.corrupt-{}.json", stem, stamp));
            let mut n = 1;
            while target.exists() {
                target = self
                    .path
                    .with_file_name(format!("{}.corrupt-{}-{}.json", stem, stamp, n));
                n += 1;
            }
        }

        std::fs::rename(&self.path, &target)?;
        Ok(target)
    }
}
