//! Inbox control channel
//!
//! A plain text file any external process may append single-line commands to:
//!
//! ```text
//! reward <action> <float>   off-policy reward for <action>
//! note <free text>          append to state notes
//! set <key> <float>         change an allow-listed parameter (alpha)
//! quit                      request a graceful stop
//! ```
//!
//! Each drain claims the file by renaming it aside, so every line present at
//! claim time is processed exactly once. A writer that opened the file before
//! the rename and writes after it is the one racing case; its line is lost
//! (at-most-once). A claimed file left behind by a crash is consumed first on
//! the next drain.

use serde_json::json;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::events::EventLog;
use crate::state::AgentState;

/// Inbox line errors
#[derive(Error, Debug, PartialEq)]
pub enum InboxError {
    #[error("Invalid number {0:?}")]
    InvalidNumber(String),
    #[error("Non-finite number {0:?}")]
    NonFinite(String),
}

/// One parsed inbox line
#[derive(Debug, Clone, PartialEq)]
pub enum InboxCommand {
    Reward { action: String, value: f64 },
    Note(String),
    Set { key: String, value: f64 },
    Quit,
    Unknown(String),
}

/// Result of processing all claimed lines
#[derive(Debug, Default, Clone, PartialEq)]
pub struct InboxOutcome {
    /// Off-policy rewards in arrival order
    pub rewards: Vec<(String, f64)>,
    pub stop_requested: bool,
}

fn parse_number(raw: &str) -> Result<f64, InboxError> {
    let value: f64 = raw
        .parse()
        .map_err(|_| InboxError::InvalidNumber(raw.to_string()))?;
    if !value.is_finite() {
        return Err(InboxError::NonFinite(raw.to_string()));
    }
    Ok(value)
}

impl InboxCommand {
    /// Parse one line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, InboxError> {
        let trimmed = line.trim();
        let parts: Vec<&str> = trimmed.split_whitespace().collect();
        let Some(verb) = parts.first() else {
            return Ok(None);
        };

        let command = match verb.to_lowercase().as_str() {
            "reward" if parts.len() >= 3 => InboxCommand::Reward {
                action: parts[1].to_string(),
                value: parse_number(parts[2])?,
            },
            "note" => {
                let text = trimmed
                    .split_once(char::is_whitespace)
                    .map(|(_, rest)| rest.trim_start().to_string())
                    .unwrap_or_default();
                InboxCommand::Note(text)
            }
            "set" if parts.len() >= 3 => InboxCommand::Set {
                key: parts[1].to_lowercase(),
                value: parse_number(parts[2])?,
            },
            "quit" => InboxCommand::Quit,
            _ => InboxCommand::Unknown(line.to_string()),
        };

        Ok(Some(command))
    }
}

/// File-backed command queue
pub struct Inbox {
    path: PathBuf,
    settable_keys: Vec<String>,
}

impl Inbox {
    pub fn new(path: impl Into<PathBuf>, settable_keys: Vec<String>) -> Self {
        Self {
            path: path.into(),
            settable_keys,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn claimed_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".claimed");
        self.path.with_file_name(name)
    }

    /// Claim and return every line currently in the inbox
    pub fn drain(&self) -> std::io::Result<Vec<String>> {
        let claimed = self.claimed_path();
        let mut lines = Vec::new();

        // Leftover from a drain interrupted before the delete
        if claimed.exists() {
            lines.extend(read_lines(&claimed)?);
            std::fs::remove_file(&claimed)?;
        }

        match std::fs::rename(&self.path, &claimed) {
            Ok(()) => {
                lines.extend(read_lines(&claimed)?);
                std::fs::remove_file(&claimed)?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        Ok(lines)
    }

    /// Drain the inbox and apply notes, parameter changes and stop requests.
    /// Rewards are returned for the scheduler to merge.
    pub fn process(&self, state: &mut AgentState, log: &EventLog) -> InboxOutcome {
        let mut outcome = InboxOutcome::default();

        let lines = match self.drain() {
            Ok(lines) => lines,
            Err(e) => {
                warn!("Failed to drain inbox {}: {}", self.path.display(), e);
                return outcome;
            }
        };

        for line in lines {
            match InboxCommand::parse(&line) {
                Ok(None) => {}
                Ok(Some(InboxCommand::Reward { action, value })) => {
                    log.append("external_reward", json!({"action": action, "value": value}));
                    outcome.rewards.push((action, value));
                }
                Ok(Some(InboxCommand::Note(text))) => {
                    log.append("note", json!({"text": text}));
                    state.notes.push(text);
                }
                Ok(Some(InboxCommand::Set { key, value })) => {
                    let settable = self.settable_keys.iter().any(|k| k == &key);
                    if settable && apply_param(state, &key, value) {
                        log.append("param_update", json!({"key": key, "value": value}));
                    } else {
                        debug!("Ignoring inbox set for non-settable key {}", key);
                    }
                }
                Ok(Some(InboxCommand::Quit)) => {
                    info!("Stop requested through inbox");
                    outcome.stop_requested = true;
                }
                Ok(Some(InboxCommand::Unknown(line))) => {
                    log.append("inbox_unknown", json!({"line": line}));
                }
                Err(e) => {
                    log.append("inbox_error", json!({"line": line, "error": e.to_string()}));
                }
            }
        }

        outcome
    }

    /// Append one command line (operator helper)
    pub fn push(&self, command: &str) -> std::io::Result<()> {
        if command.contains('\n') || command.contains('\r') {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "inbox commands must be a single line",
            ));
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(format!("{}\n", command).as_bytes())
    }
}

fn read_lines(path: &Path) -> std::io::Result<Vec<String>> {
    let bytes = std::fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes)
        .lines()
        .map(|l| l.to_string())
        .collect())
}

/// Known numeric parameters; returns false for keys with no backing field
fn apply_param(state: &mut AgentState, key: &str, value: f64) -> bool {
    match key {
        "alpha" => state.alpha = value,
        "epsilon" => state.epsilon = value,
        _ => return false,
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RotationConfig;
    use tempfile::TempDir;

    fn setup() -> (Inbox, EventLog, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let inbox = Inbox::new(temp_dir.path().join("inbox.txt"), vec!["alpha".to_string()]);
        let log = EventLog::new(temp_dir.path().join("events.log"), RotationConfig::default());
        (inbox, log, temp_dir)
    }

    fn kinds(log: &EventLog) -> Vec<String> {
        std::fs::read_to_string(log.path())
            .unwrap_or_default()
            .lines()
            .map(|l| {
                let event: serde_json::Value = serde_json::from_str(l).unwrap();
                event["kind"].as_str().unwrap().to_string()
            })
            .collect()
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            InboxCommand::parse("reward heartbeat +0.50").unwrap(),
            Some(InboxCommand::Reward { action: "heartbeat".to_string(), value: 0.5 })
        );
        assert_eq!(
            InboxCommand::parse("NOTE  hello   world").unwrap(),
            Some(InboxCommand::Note("hello   world".to_string()))
        );
        assert_eq!(InboxCommand::parse("note").unwrap(), Some(InboxCommand::Note(String::new())));
        assert_eq!(
            InboxCommand::parse("set Alpha 0.1").unwrap(),
            Some(InboxCommand::Set { key: "alpha".to_string(), value: 0.1 })
        );
        assert_eq!(InboxCommand::parse("quit").unwrap(), Some(InboxCommand::Quit));
        assert_eq!(InboxCommand::parse("   ").unwrap(), None);
        assert_eq!(
            InboxCommand::parse("reward heartbeat").unwrap(),
            Some(InboxCommand::Unknown("reward heartbeat".to_string()))
        );
        assert_eq!(
            InboxCommand::parse("dance now").unwrap(),
            Some(InboxCommand::Unknown("dance now".to_string()))
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            InboxCommand::parse("reward heartbeat lots"),
            Err(InboxError::InvalidNumber(_))
        ));
        assert!(matches!(InboxCommand::parse("set alpha NaN"), Err(InboxError::NonFinite(_))));
    }

    #[test]
    fn test_drain_empties_inbox() {
        let (inbox, _log, _temp) = setup();
        inbox.push("note one").unwrap();
        inbox.push("note two").unwrap();

        assert_eq!(inbox.drain().unwrap(), vec!["note one", "note two"]);
        assert!(inbox.drain().unwrap().is_empty());
    }

    #[test]
    fn test_drain_picks_up_leftover_claim() {
        let (inbox, _log, temp) = setup();
        std::fs::write(temp.path().join("inbox.txt.claimed"), "note stranded\n").unwrap();
        inbox.push("note fresh").unwrap();

        assert_eq!(inbox.drain().unwrap(), vec!["note stranded", "note fresh"]);
        assert!(!temp.path().join("inbox.txt.claimed").exists());
    }

    #[test]
    fn test_process_mixed_lines() {
        let (inbox, log, _temp) = setup();
        let mut state = AgentState::default();

        for line in [
            "reward heartbeat +0.50",
            "reward reflect oops",
            "note remember the river",
            "set alpha 0.1",
            "set epsilon 0.9",
            "wiggle",
            "reward reflect -0.25",
            "quit",
        ] {
            inbox.push(line).unwrap();
        }

        let outcome = inbox.process(&mut state, &log);
        assert_eq!(
            outcome.rewards,
            vec![("heartbeat".to_string(), 0.5), ("reflect".to_string(), -0.25)]
        );
        assert!(outcome.stop_requested);
        assert_eq!(state.notes, vec!["remember the river".to_string()]);
        assert_eq!(state.alpha, 0.1);
        assert_eq!(state.epsilon, 0.2);

        assert_eq!(
            kinds(&log),
            vec![
                "external_reward",
                "inbox_error",
                "note",
                "param_update",
                "inbox_unknown",
                "external_reward"
            ]
        );

        let again = inbox.process(&mut state, &log);
        assert_eq!(again, InboxOutcome::default());
    }

    #[test]
    fn test_push_rejects_multiline() {
        let (inbox, _log, _temp) = setup();
        assert!(inbox.push("note a\nquit").is_err());
    }
}
