//! Plugin process sandbox
//!
//! Shell and script plugins run as child processes. Before spawning, every
//! pipeline stage is checked against a deny-list; the child then gets a
//! scrubbed environment, the invocation context as JSON on stdin, a capped
//! stdout, and is killed when its deadline passes.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

const DENIED_COMMANDS: &[&str] = &[
    "rm", "rmdir", "dd", "mkfs", "fdisk", "parted", "sudo", "su", "doas", "pkexec", "chmod",
    "chown", "chgrp", "chroot", "kill", "killall", "pkill", "shutdown", "reboot",
];

const DENIED_FRAGMENTS: &[&str] = &[
    ">/etc/", ">>/etc/", ">/dev/sd", "| sh", "|sh", "| bash", "|bash",
];

const PASSTHROUGH_ENV: &[&str] = &["PATH", "HOME", "USER", "LANG", "LC_ALL", "TERM", "TZ"];

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Scrub the environment down to `passthrough_env` (false inherits it)
    pub enabled: bool,
    /// Deadline when the manifest sets none
    pub timeout_secs: u64,
    /// Stdout cap; stderr gets a quarter of it
    pub max_output_bytes: usize,
    pub working_dir: Option<PathBuf>,
    pub denied_commands: Vec<String>,
    pub denied_fragments: Vec<String>,
    pub passthrough_env: Vec<String>,
    /// Always set, even when scrubbing
    pub extra_env: Vec<(String, String)>,
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 30,
            max_output_bytes: 64 * 1024,
            working_dir: None,
            denied_commands: owned(DENIED_COMMANDS),
            denied_fragments: owned(DENIED_FRAGMENTS),
            passthrough_env: owned(PASSTHROUGH_ENV),
            extra_env: vec![("SEEDLOOP_PLUGIN".to_string(), "1".to_string())],
        }
    }
}

/// What a plugin asks to run
#[derive(Debug, Clone, Copy)]
pub enum Program<'a> {
    /// A command line for `sh -c`
    Shell(&'a str),
    /// Source handed straight to an interpreter (`python3 -c <source>`)
    Inline { language: &'a str, source: &'a str },
}

impl Program<'_> {
    fn interpreter(language: &str) -> Option<(&'static str, &'static str)> {
        match language {
            "python" | "python3" => Some(("python3", "-c")),
            "javascript" | "js" | "node" => Some(("node", "-e")),
            "ruby" => Some(("ruby", "-e")),
            "sh" | "bash" => Some(("sh", "-c")),
            _ => None,
        }
    }

    /// Text the deny-lists are applied to
    fn screened_text(&self) -> Option<&str> {
        match self {
            Program::Shell(line) => Some(*line),
            Program::Inline { language, source } if matches!(*language, "sh" | "bash") => {
                Some(*source)
            }
            Program::Inline { .. } => None,
        }
    }

    fn command(&self) -> Result<Command> {
        let (program, flag, body) = match self {
            Program::Shell(line) => ("sh", "-c", *line),
            Program::Inline { language, source } => {
                let (program, flag) = Self::interpreter(language)
                    .with_context(|| format!("Unsupported script language: {}", language))?;
                (program, flag, *source)
            }
        };
        let mut cmd = Command::new(program);
        cmd.arg(flag).arg(body);
        Ok(cmd)
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    /// Exit code zero
    Succeeded,
    /// Non-zero exit, `None` when killed by a signal
    Failed(Option<i32>),
    TimedOut(Duration),
    /// Refused before spawning
    Denied(String),
}

#[derive(Debug, Clone)]
pub struct SandboxResult {
    pub status: RunStatus,
    pub stdout: String,
    pub stderr: String,
    /// Stdout exceeded the cap
    pub truncated: bool,
    pub elapsed: Duration,
}

impl SandboxResult {
    fn denied(reason: String) -> Self {
        Self {
            status: RunStatus::Denied(reason),
            stdout: String::new(),
            stderr: String::new(),
            truncated: false,
            elapsed: Duration::ZERO,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}

pub struct SkillSandbox {
    config: SandboxConfig,
}

impl SkillSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Reason `command` must not run, if any
    pub fn screen(&self, command: &str) -> Option<String> {
        let mut reasons = Vec::new();

        for stage in command.split(['|', ';', '&']) {
            let Some(word) = stage.split_whitespace().next() else {
                continue;
            };
            let base = word.rsplit('/').next().unwrap_or(word);
            if self.config.denied_commands.iter().any(|c| c == base) {
                reasons.push(format!("command '{}' is denied", base));
            }
        }
        for fragment in &self.config.denied_fragments {
            if command.contains(fragment.as_str()) {
                reasons.push(format!("contains '{}'", fragment));
            }
        }

        (!reasons.is_empty()).then(|| reasons.join("; "))
    }

    /// Run `program` with `input` on stdin
    pub async fn run(
        &self,
        program: Program<'_>,
        input: &[u8],
        timeout_secs: Option<u64>,
    ) -> Result<SandboxResult> {
        if let Some(reason) = program.screened_text().and_then(|text| self.screen(text)) {
            return Ok(SandboxResult::denied(reason));
        }

        let mut cmd = program.command()?;
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if self.config.enabled {
            cmd.env_clear();
            for key in &self.config.passthrough_env {
                if let Ok(value) = std::env::var(key) {
                    cmd.env(key, value);
                }
            }
        }
        cmd.envs(self.config.extra_env.iter().map(|(k, v)| (k, v)));
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        let started = Instant::now();
        let mut child = cmd.spawn().context("Failed to spawn plugin process")?;
        let mut stdin = child.stdin.take().context("Plugin stdin not piped")?;
        let mut stdout = child.stdout.take().context("Plugin stdout not piped")?;
        let mut stderr = child.stderr.take().context("Plugin stderr not piped")?;

        let limit = Duration::from_secs(timeout_secs.unwrap_or(self.config.timeout_secs));
        let cap = self.config.max_output_bytes;

        let finished = tokio::time::timeout(limit, async {
            let feed = async move {
                if let Err(e) = stdin.write_all(input).await {
                    debug!("Plugin closed stdin early: {}", e);
                }
            };
            let ((), out, err) = tokio::join!(
                feed,
                capture(&mut stdout, cap),
                capture(&mut stderr, cap / 4)
            );
            let status = child.wait().await.context("Failed to wait for plugin process")?;
            Ok::<_, anyhow::Error>((status, out, err))
        })
        .await;

        let Ok(finished) = finished else {
            if let Err(e) = child.kill().await {
                debug!("Failed to kill plugin process: {}", e);
            }
            warn!("Plugin process exceeded {:?}", limit);
            return Ok(SandboxResult {
                status: RunStatus::TimedOut(limit),
                stdout: String::new(),
                stderr: String::new(),
                truncated: false,
                elapsed: started.elapsed(),
            });
        };

        let (status, (out, truncated), (err, _)) = finished?;
        Ok(SandboxResult {
            status: if status.success() {
                RunStatus::Succeeded
            } else {
                RunStatus::Failed(status.code())
            },
            stdout: String::from_utf8_lossy(&out).into_owned(),
            stderr: String::from_utf8_lossy(&err).into_owned(),
            truncated,
            elapsed: started.elapsed(),
        })
    }
}

/// Keep the first `cap` bytes, then drain the rest so the child never blocks
/// on a full pipe. Reports whether anything was dropped.
async fn capture<R: AsyncRead + Unpin>(reader: &mut R, cap: usize) -> (Vec<u8>, bool) {
    let mut kept = Vec::new();
    if let Err(e) = (&mut *reader).take(cap as u64).read_to_end(&mut kept).await {
        debug!("Plugin output read failed: {}", e);
        return (kept, false);
    }
    let dropped = tokio::io::copy(reader, &mut tokio::io::sink()).await.unwrap_or(0);
    (kept, dropped > 0)
}
