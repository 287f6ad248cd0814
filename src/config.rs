//! Configuration management

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::events::RotationConfig;
use crate::skills::SandboxConfig;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding state, inbox and event log
    pub data_dir: PathBuf,

    /// Plugin directory scanned for `skill_*.toml` manifests
    pub skills_dir: PathBuf,

    /// Fixed sleep between ticks (not adjusted for work duration)
    pub tick_interval: Duration,

    /// Sleep after a tick body fails
    pub error_backoff: Duration,

    /// Wall-clock period between plugin re-discovery
    pub scan_period: Duration,

    /// Event log rotation knobs
    pub rotation: RotationConfig,

    /// Reward recorded when a skill fails, panics or times out
    pub failure_reward: f64,

    /// Deadline for a single skill invocation
    pub skill_timeout: Duration,

    /// When set, epsilon is forced to this value after every tick and at shutdown
    pub epsilon_baseline: Option<f64>,

    /// Fixed RNG seed for reproducible runs
    pub seed: Option<u64>,

    /// Keys the inbox `set` command may change
    pub settable_keys: Vec<String>,

    /// Plugin process sandbox
    pub sandbox: SandboxConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let root = std::env::var("SEEDLOOP_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let mut config = Self::with_root(&root);

        if let Ok(dir) = std::env::var("SEEDLOOP_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("SEEDLOOP_SKILLS_DIR") {
            config.skills_dir = PathBuf::from(dir);
        }

        if let Some(ms) = env_parse::<u64>("SEEDLOOP_TICK_MS")? {
            config.tick_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("SEEDLOOP_BACKOFF_MS")? {
            config.error_backoff = Duration::from_millis(ms);
        }
        if let Some(secs) = env_parse::<u64>("SEEDLOOP_SCAN_SECS")? {
            config.scan_period = Duration::from_secs(secs);
        }
        if let Some(bytes) = env_parse::<u64>("SEEDLOOP_LOG_MAX_BYTES")? {
            config.rotation.max_bytes = bytes;
        }
        if let Some(keep) = env_parse::<usize>("SEEDLOOP_LOG_KEEP")? {
            config.rotation.keep = keep;
        }
        if let Some(ticks) = env_parse::<u64>("SEEDLOOP_LOG_CHECK_TICKS")? {
            config.rotation.check_every_ticks = ticks;
        }
        if let Some(reward) = env_parse::<f64>("SEEDLOOP_FAILURE_REWARD")? {
            config.failure_reward = reward;
        }
        if let Some(secs) = env_parse::<u64>("SEEDLOOP_SKILL_TIMEOUT_SECS")? {
            config.skill_timeout = Duration::from_secs(secs);
            config.sandbox.timeout_secs = secs;
        }

        config.epsilon_baseline = env_parse::<f64>("SEEDLOOP_EPSILON_BASELINE")?;
        config.seed = env_parse::<u64>("SEEDLOOP_SEED")?;

        if let Ok(keys) = std::env::var("SEEDLOOP_SETTABLE_KEYS") {
            config.settable_keys = keys
                .split(',')
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect();
        }

        config.sandbox.enabled = std::env::var("SEEDLOOP_SANDBOX")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(true);
        config.sandbox.working_dir = Some(root);

        Ok(config)
    }

    /// Defaults rooted at `root` (`<root>/data`, `<root>/skills`)
    pub fn with_root(root: &Path) -> Self {
        Self {
            data_dir: root.join("data"),
            skills_dir: root.join("skills"),
            tick_interval: Duration::from_secs(1),
            error_backoff: Duration::from_millis(500),
            scan_period: Duration::from_secs(10),
            rotation: RotationConfig::default(),
            failure_reward: -0.2,
            skill_timeout: Duration::from_secs(30),
            epsilon_baseline: None,
            seed: None,
            settable_keys: vec!["alpha".to_string()],
            sandbox: SandboxConfig {
                working_dir: Some(root.to_path_buf()),
                ..SandboxConfig::default()
            },
        }
    }

    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }

    pub fn inbox_path(&self) -> PathBuf {
        self.data_dir.join("inbox.txt")
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join("events.log")
    }

    /// Create the data and plugin directories
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("Failed to create {}", self.data_dir.display()))?;
        std::fs::create_dir_all(&self.skills_dir)
            .with_context(|| format!("Failed to create {}", self.skills_dir.display()))?;
        Ok(())
    }
}

/// Parse an optional environment variable, failing on malformed values
fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("Invalid {}: {:?}", key, raw)),
        _ => Ok(None),
    }
}
