//! Event Log
//!
//! Append-only JSONL record sink with size-triggered rotation.
//!
//! Every record is one line: `{"ts": <seconds>, "kind": <kind>, ...payload}`.
//! Appends never fail the caller. Rotation is driven by the scheduler at a
//! throttled cadence: rename the active file to a timestamped name, gzip it,
//! drop the uncompressed copy, then prune old archives.

use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

use crate::state::AgentState;

/// Rotation knobs
#[derive(Debug, Clone)]
pub struct RotationConfig {
    /// Rotate once the active log reaches this size
    pub max_bytes: u64,
    /// Compressed archives to keep
    pub keep: usize,
    /// Only stat the log every N ticks
    pub check_every_ticks: u64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            max_bytes: 5 * 1024 * 1024, // 5 MiB
            keep: 7,
            check_every_ticks: 60,
        }
    }
}

/// Current wall-clock time as float seconds
pub fn now_ts() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Append-only structured event log
pub struct EventLog {
    path: PathBuf,
    rotation: RotationConfig,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>, rotation: RotationConfig) -> Self {
        Self {
            path: path.into(),
            rotation,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record. Errors are reported through tracing and swallowed.
    pub fn append(&self, kind: &str, payload: Value) {
        if let Err(e) = self.try_append(kind, payload) {
            warn!("Failed to append {} event to {}: {}", kind, self.path.display(), e);
        }
    }

    fn try_append(&self, kind: &str, payload: Value) -> std::io::Result<()> {
        let mut record = Map::new();
        record.insert("ts".to_string(), Value::from(now_ts()));
        record.insert("kind".to_string(), Value::from(kind));

        match payload {
            Value::Object(fields) => {
                for (key, value) in fields {
                    if key != "ts" && key != "kind" {
                        record.insert(key, value);
                    }
                }
            }
            Value::Null => {}
            other => {
                record.insert("value".to_string(), other);
            }
        }

        // serde_json escapes control characters, so a record never spans lines
        let mut line = serde_json::to_string(&Value::Object(record))?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;

        debug!(kind, "event appended");
        Ok(())
    }

    /// Last `max` records of `kind` from the active log, oldest first
    pub fn tail(&self, kind: &str, max: usize) -> Vec<Value> {
        let mut out = VecDeque::with_capacity(max.min(1024));
        if max == 0 {
            return Vec::new();
        }

        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(_) => return Vec::new(),
        };

        for line in BufReader::new(file).lines() {
            let Ok(line) = line else { continue };
            let Ok(record) = serde_json::from_str::<Value>(&line) else {
                continue;
            };
            if record.get("kind").and_then(|k| k.as_str()) == Some(kind) {
                if out.len() == max {
                    out.pop_front();
                }
                out.push_back(record);
            }
        }

        out.into()
    }

    /// Rotate the active log if the throttle window has passed and it is
    /// over the size threshold. Never appends events and never fails.
    ///
    /// Returns the archive path when a rotation happened.
    pub fn maybe_rotate(&self, state: &mut AgentState) -> Option<PathBuf> {
        let tick = state.ticks;
        if let Some(last) = state.last_rotation_check_tick {
            if tick.saturating_sub(last) < self.rotation.check_every_ticks {
                return None;
            }
        }
        state.last_rotation_check_tick = Some(tick);

        match self.rotate_if_oversized() {
            Ok(Some(archive)) => {
                state.last_rotation_file = archive
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned());
                info!("Rotated event log into {}", archive.display());
                Some(archive)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Log rotation failed: {}", e);
                None
            }
        }
    }

    fn rotate_if_oversized(&self) -> std::io::Result<Option<PathBuf>> {
        let size = match std::fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        if size < self.rotation.max_bytes {
            return Ok(None);
        }

        let rotated = self.rotated_name();
        std::fs::rename(&self.path, &rotated)?;

        let archive = PathBuf::from(format!("{}.gz", rotated.display()));
        {
            let mut input = File::open(&rotated)?;
            let output = File::create(&archive)?;
            let mut encoder = GzEncoder::new(output, Compression::default());
            std::io::copy(&mut input, &mut encoder)?;
            encoder.finish()?.sync_all()?;
        }
        if let Err(e) = std::fs::remove_file(&rotated) {
            debug!("Could not remove {}: {}", rotated.display(), e);
        }

        self.prune_archives();
        Ok(Some(archive))
    }

    fn log_stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "events".to_string())
    }

    fn log_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn rotated_name(&self) -> PathBuf {
        let stem = self.log_stem();
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let dir = self.log_dir();

        let mut candidate = dir.join(format!("{}-{}.log", stem, stamp));
        let mut n = 1;
        while candidate.exists() || PathBuf::from(format!("{}.gz", candidate.display())).exists() {
            candidate = dir.join(format!("{}-{}-{}.log", stem, stamp, n));
            n += 1;
        }
        candidate
    }

    /// Compressed archives, newest first
    pub fn archives(&self) -> Vec<PathBuf> {
        let prefix = format!("{}-", self.log_stem());
        let Ok(entries) = std::fs::read_dir(self.log_dir()) else {
            return Vec::new();
        };

        let mut archives: Vec<(SystemTime, PathBuf)> = entries
            .filter_map(|e| e.ok())
            .filter(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                name.starts_with(&prefix) && name.ends_with(".log.gz")
            })
            .map(|e| {
                let mtime = e
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                (mtime, e.path())
            })
            .collect();

        // Timestamped names break mtime ties
        archives.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
        archives.into_iter().map(|(_, p)| p).collect()
    }

    fn prune_archives(&self) {
        for old in self.archives().into_iter().skip(self.rotation.keep) {
            if let Err(e) = std::fs::remove_file(&old) {
                debug!("Could not prune {}: {}", old.display(), e);
            }
        }
    }
}
