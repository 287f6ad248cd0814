//! Hot-Loadable Skills System
//!
//! Skills are the actions the agent chooses between each tick.
//!
//! # Architecture
//!
//! ```text
//! skills/skill_*.toml ──► SkillLoader ──► SkillRegistry ◄── built-ins
//!                          (rescan)            │
//!                                              ▼
//!                               invoke(name) ──► reward
//!                          (deadline, panic + error isolation)
//! ```
//!
//! # Skill Format
//!
//! Plugins are TOML manifests:
//!
//! ```toml
//! [skill]
//! name = "howl"
//! version = "1.0.0"
//! description = "Howl when the pack is idle"
//!
//! [execution]
//! type = "shell"  # or "script", "static"
//! command = "python3 skills/howl.py"
//! timeout_secs = 5
//! ```
//!
//! Shell and script skills receive `{"time": .., "state": {..}}` on stdin and
//! print a reward (or `{"reward": .., "state": {..}}`) as their last line.
//!
//! # Security
//!
//! Plugin processes are sandboxed with:
//! - Command blocklist and dangerous-pattern checks
//! - Environment sanitization
//! - Output size limit and hard timeout

pub mod builtin;
pub mod loader;
pub mod registry;
pub mod sandbox;
pub mod types;

pub use builtin::builtin_skills;
pub use loader::{PluginSkill, SkillLoader};
pub use registry::{RegistryConfig, SkillRegistry};
pub use sandbox::{Program, RunStatus, SandboxConfig, SandboxResult, SkillSandbox};
pub use types::{Execution, PluginManifest, Skill, SkillContext, SkillError};
