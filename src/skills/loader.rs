//! Skill Loader
//!
//! Discovers plugin manifests (`skill_*.toml`) in the skills directory and
//! turns each into a [`PluginSkill`].

use super::sandbox::{Program, RunStatus, SkillSandbox};
use super::types::*;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

const PLUGIN_PREFIX: &str = "skill_";
const PLUGIN_EXTENSION: &str = "toml";

/// A skill backed by a manifest file
pub struct PluginSkill {
    manifest: PluginManifest,
    path: PathBuf,
    sandbox: Arc<SkillSandbox>,
}

impl PluginSkill {
    pub fn new(manifest: PluginManifest, path: PathBuf, sandbox: Arc<SkillSandbox>) -> Self {
        Self {
            manifest,
            path,
            sandbox,
        }
    }

}

#[async_trait]
impl Skill for PluginSkill {
    fn name(&self) -> &str {
        &self.manifest.skill.name
    }

    async fn invoke(&self, ctx: &mut SkillContext<'_>) -> Result<Option<f64>, SkillError> {
        let (program, timeout_secs) = match &self.manifest.execution {
            Execution::Static { reward } => return Ok(Some(*reward)),
            Execution::Shell { command, timeout_secs } => (Program::Shell(command), *timeout_secs),
            Execution::Script {
                language,
                script,
                timeout_secs,
            } => (
                Program::Inline {
                    language,
                    source: script,
                },
                *timeout_secs,
            ),
        };

        let input = context_input(ctx)?;
        let result = self
            .sandbox
            .run(program, &input, timeout_secs)
            .await
            .map_err(|e| SkillError::Internal(format!("{:#}", e)))?;

        debug!(
            skill = self.name(),
            elapsed_ms = result.elapsed.as_millis() as u64,
            "plugin process finished"
        );
        if result.truncated {
            warn!(
                "Output of {} was truncated; the reward line may be missing",
                self.path.display()
            );
        }

        match result.status {
            RunStatus::Succeeded => parse_output(&result.stdout, ctx),
            RunStatus::Failed(exit_code) => Err(SkillError::Failed {
                exit_code,
                stderr: result.stderr.trim().to_string(),
            }),
            RunStatus::TimedOut(limit) => Err(SkillError::Timeout(limit.as_secs())),
            RunStatus::Denied(reason) => Err(SkillError::Blocked(reason)),
        }
    }
}

fn context_input(ctx: &SkillContext<'_>) -> Result<Vec<u8>, SkillError> {
    let json = ctx
        .to_json()
        .map_err(|e| SkillError::Internal(e.to_string()))?;
    serde_json::to_vec(&json).map_err(|e| SkillError::Internal(e.to_string()))
}

/// Interpret the last non-empty stdout line.
///
/// A number is the reward. A JSON object may carry `reward` and a top-level
/// `state` patch. Anything else is a zero reward.
pub fn parse_output(stdout: &str, ctx: &mut SkillContext<'_>) -> Result<Option<f64>, SkillError> {
    let Some(line) = stdout.lines().rev().map(str::trim).find(|l| !l.is_empty()) else {
        return Ok(None);
    };

    if let Ok(reward) = line.parse::<f64>() {
        return Ok(reward.is_finite().then_some(reward));
    }

    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(output)) => {
            if let Some(patch) = output.get("state") {
                let patch = patch.as_object().ok_or_else(|| {
                    SkillError::InvalidOutput("\"state\" must be an object".to_string())
                })?;
                ctx.state
                    .apply_patch(patch)
                    .map_err(|e| SkillError::InvalidOutput(e.to_string()))?;
            }
            Ok(output
                .get("reward")
                .and_then(Value::as_f64)
                .filter(|r| r.is_finite()))
        }
        Ok(Value::Number(n)) => Ok(n.as_f64()),
        _ => {
            debug!("Non-numeric skill output treated as zero: {}", line);
            Ok(None)
        }
    }
}

/// Whether `path` names a plugin manifest
pub fn is_plugin_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.starts_with(PLUGIN_PREFIX)
        && path.extension().and_then(|e| e.to_str()) == Some(PLUGIN_EXTENSION)
        && path.is_file()
}

/// Skill loader for the plugin directory
pub struct SkillLoader {
    dir: PathBuf,
    sandbox: Arc<SkillSandbox>,
}

/// Outcome of one directory scan
#[derive(Default)]
pub struct Discovery {
    /// Loaded skills in file-name order
    pub skills: Vec<Arc<dyn Skill>>,
    /// Files that failed to load, with the reason
    pub errors: Vec<(PathBuf, String)>,
}

impl SkillLoader {
    pub fn new(dir: impl Into<PathBuf>, sandbox: Arc<SkillSandbox>) -> Self {
        Self {
            dir: dir.into(),
            sandbox,
        }
    }

    /// Load a manifest from a local file
    pub async fn load_from_file(&self, path: &Path) -> Result<PluginManifest> {
        let content = tokio::fs::read_to_string(path)
            .await
            .context("Failed to read skill file")?;

        let manifest: PluginManifest = toml::from_str(&content).context("Failed to parse TOML")?;
        manifest.validate()?;

        Ok(manifest)
    }

    /// Sorted list of manifest files currently in the directory
    pub async fn plugin_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e).context("Failed to read skills directory"),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if is_plugin_file(&path) {
                files.push(path);
            }
        }

        files.sort();
        Ok(files)
    }

    /// Load every manifest; a bad file never stops the others from loading
    pub async fn discover(&self) -> Discovery {
        let mut discovery = Discovery::default();

        let files = match self.plugin_files().await {
            Ok(files) => files,
            Err(e) => {
                discovery.errors.push((self.dir.clone(), format!("{:#}", e)));
                return discovery;
            }
        };

        for path in files {
            match self.load_from_file(&path).await {
                Ok(manifest) => {
                    debug!("Loaded skill '{}' from {}", manifest.skill.name, path.display());
                    discovery.skills.push(Arc::new(PluginSkill::new(
                        manifest,
                        path,
                        self.sandbox.clone(),
                    )));
                }
                Err(e) => discovery.errors.push((path, format!("{:#}", e))),
            }
        }

        discovery
    }
}
