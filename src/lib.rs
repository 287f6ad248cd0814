//! Seedloop
//!
//! A long-running agent that, once per tick, picks one skill with an
//! epsilon-greedy bandit, runs it, folds in external feedback and persists
//! what it learned.
//!
//! # Features
//!
//! - **State Store**: one JSON document, atomic replace, corrupt-file quarantine
//! - **Event Log**: JSONL records with size-based gzip rotation
//! - **Bandit**: epsilon-greedy over a scalar action-value table
//! - **Skills**: built-ins plus hot-reloaded TOML plugins, fault isolated
//! - **Inbox**: file-based control channel (rewards, notes, params, quit)
//!
//! # Architecture
//!
//! ```text
//! inbox.txt ──► Inbox ─┐
//!                      ▼
//! skills/ ──► SkillRegistry ──► TickEngine ──► StateStore (state.json)
//!                      ▲            │
//!                   Bandit          └──► EventLog (events.log + archives)
//! ```

pub mod bandit;
pub mod config;
pub mod events;
pub mod inbox;
pub mod lifecycle;
pub mod scheduler;
pub mod skills;
pub mod state;
pub mod status;

pub use bandit::Bandit;
pub use config::Config;
pub use events::{EventLog, RotationConfig};
pub use inbox::{Inbox, InboxCommand, InboxOutcome};
pub use lifecycle::{Lifecycle, Phase};
pub use scheduler::{TickEngine, TickReport};
pub use skills::{Skill, SkillContext, SkillError, SkillRegistry};
pub use state::{ActionRecord, AgentState, StateStore};
pub use status::StatusReport;
