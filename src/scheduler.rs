//! Tick Scheduler
//!
//! One tick, strictly in order:
//!
//! 1. throttled log rotation check
//! 2. periodic skill re-discovery
//! 3. bandit selection over the current skill names
//! 4. dispatch with fault isolation
//! 5. inbox drain, reward merge
//! 6. one combined bandit update for the chosen action
//! 7. tick counter + `last_actions`
//! 8. `tick` event
//! 9. persist
//! 10. sleep the fixed interval
//!
//! A failed tick is logged as `loop_error` and retried after a short backoff;
//! only a stop request ends the loop.

use anyhow::{Context, Result};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::bandit::Bandit;
use crate::config::Config;
use crate::events::{now_ts, EventLog};
use crate::inbox::Inbox;
use crate::lifecycle::{Lifecycle, Phase};
use crate::skills::{RegistryConfig, SkillContext, SkillRegistry};
use crate::state::{ActionRecord, AgentState, StateStore};

/// Summary of one completed tick
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub tick: u64,
    pub action: String,
    /// Skill reward plus any inbox reward aimed at the same action
    pub reward: f64,
    /// Inbox rewards applied to other actions
    pub offpolicy_updates: usize,
    pub rotated: bool,
}

pub struct TickEngine {
    config: Config,
    store: StateStore,
    log: EventLog,
    inbox: Inbox,
    registry: SkillRegistry,
    bandit: Bandit,
    lifecycle: Arc<Lifecycle>,
    state: AgentState,
}

impl TickEngine {
    /// Load state and build every component; no skills are scanned yet
    pub fn new(config: Config) -> Result<Self> {
        config.ensure_dirs()?;

        let store = StateStore::new(config.state_path());
        let state = store.load().with_context(|| {
            format!("Failed to load state from {}", config.state_path().display())
        })?;

        let log = EventLog::new(config.log_path(), config.rotation.clone());
        let inbox = Inbox::new(config.inbox_path(), config.settable_keys.clone());
        let registry = SkillRegistry::new(RegistryConfig {
            skills_dir: config.skills_dir.clone(),
            scan_period: config.scan_period,
            invoke_timeout: config.skill_timeout,
            failure_reward: config.failure_reward,
            sandbox: config.sandbox.clone(),
        });
        let bandit = Bandit::from_seed(config.seed);

        Ok(Self {
            config,
            store,
            log,
            inbox,
            registry,
            bandit,
            lifecycle: Lifecycle::new(),
            state,
        })
    }

    pub fn state(&self) -> &AgentState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut AgentState {
        &mut self.state
    }

    pub fn registry(&self) -> &SkillRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut SkillRegistry {
        &mut self.registry
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn inbox(&self) -> &Inbox {
        &self.inbox
    }

    pub fn lifecycle(&self) -> Arc<Lifecycle> {
        self.lifecycle.clone()
    }

    /// Initial discovery plus the `startup` event
    pub async fn start(&mut self) {
        self.registry.discover(&self.log).await;
        let skills = self.registry.names();

        if let Some(baseline) = self.config.epsilon_baseline {
            warn!(
                "Epsilon is reset to {} after every tick; \
                 skill adjustments to epsilon will not persist",
                baseline
            );
        }

        info!("Starting at tick {} with skills {:?}", self.state.ticks, skills);
        self.log.append(
            "startup",
            json!({
                "origin": self.state.origin,
                "epsilon": self.state.epsilon,
                "alpha": self.state.alpha,
                "skills": skills,
            }),
        );
    }

    /// Run one tick (steps 1-9)
    pub async fn tick(&mut self) -> Result<TickReport> {
        // 1. rotation
        let rotated = self.log.maybe_rotate(&mut self.state).is_some();

        // 2. re-discovery
        self.registry.refresh_if_due(&self.log).await;

        // 3. selection
        let actions = self.registry.names();
        let action = self
            .bandit
            .choose(&mut self.state, &actions)
            .context("No skills registered")?;

        // 4. dispatch
        let mut reward = {
            let mut ctx = SkillContext::new(&mut self.state, now_ts());
            self.registry.invoke(&action, &mut ctx, &self.log).await
        };

        // 5. external feedback
        let outcome = self.inbox.process(&mut self.state, &self.log);
        if outcome.stop_requested {
            self.lifecycle.request_stop();
        }

        let mut offpolicy_updates = 0;
        for (rewarded, value) in outcome.rewards {
            if rewarded == action {
                reward += value;
            } else if self.bandit.update(&mut self.state, &rewarded, value) {
                self.log
                    .append("offpolicy_update", json!({"action": rewarded, "reward": value}));
                offpolicy_updates += 1;
            } else {
                self.reject_reward(&rewarded, value);
            }
        }

        // 6. learn; a reward that overflowed is dropped, never persisted
        if !reward.is_finite() {
            self.reject_reward(&action, reward);
            reward = 0.0;
        } else if !self.bandit.update(&mut self.state, &action, reward) {
            self.reject_reward(&action, reward);
        }

        // 7. bookkeeping
        self.state.ticks += 1;
        let tick = self.state.ticks;
        self.state.push_action(ActionRecord {
            tick,
            action: action.clone(),
            reward,
        });

        // 8. record
        let q: BTreeMap<&str, f64> = self
            .state
            .q
            .iter()
            .map(|(k, v)| (k.as_str(), round4(*v)))
            .collect();
        self.log.append(
            "tick",
            json!({
                "tick": tick,
                "action": action,
                "reward": reward,
                "q": q,
                "epsilon": self.state.epsilon,
                "alpha": self.state.alpha,
            }),
        );

        if let Some(baseline) = self.config.epsilon_baseline {
            self.state.epsilon = baseline;
        }

        // 9. persist
        self.store.save(&self.state).context("Failed to persist state")?;

        debug!(tick, action = %action, reward, "tick complete");
        Ok(TickReport {
            tick,
            action,
            reward,
            offpolicy_updates,
            rotated,
        })
    }

    fn reject_reward(&self, action: &str, reward: f64) {
        warn!("Dropping reward {} for '{}': value table would not stay finite", reward, action);
        self.log.append(
            "reward_rejected",
            json!({"action": action, "reward": reward.to_string(), "alpha": self.state.alpha}),
        );
    }

    /// Tick until a stop is requested, then shut down cleanly
    pub async fn run(&mut self) -> Result<()> {
        self.lifecycle.transition_to(Phase::Running);
        self.start().await;

        while !self.lifecycle.stop_requested() {
            match self.tick().await {
                Ok(_) => self.lifecycle.sleep(self.config.tick_interval).await,
                Err(e) => {
                    warn!("Tick failed: {:#}", e);
                    self.log.append("loop_error", json!({"error": format!("{:#}", e)}));
                    self.lifecycle.sleep(self.config.error_backoff).await;
                }
            }
        }

        self.shutdown()
    }

    /// `shutdown` event and final persist
    pub fn shutdown(&mut self) -> Result<()> {
        self.lifecycle.transition_to(Phase::Stopping);
        info!("Shutting down at tick {}", self.state.ticks);

        self.log.append("shutdown", json!({"ticks": self.state.ticks}));
        if let Some(baseline) = self.config.epsilon_baseline {
            self.state.epsilon = baseline;
        }
        let saved = self.store.save(&self.state).context("Failed to persist state on shutdown");

        self.lifecycle.transition_to(Phase::Stopped);
        saved
    }
}

fn round4(v: f64) -> f64 {
    let rounded = (v * 10_000.0).round() / 10_000.0;
    if rounded.is_finite() {
        rounded
    } else {
        v
    }
}
