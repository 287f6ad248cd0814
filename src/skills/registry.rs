//! Skill Registry & Dispatcher
//!
//! Holds the name → skill map the bandit chooses from. Built-ins are always
//! present; plugins found in the skills directory are merged on top (a plugin
//! with a built-in's name replaces it in place). The directory is re-scanned
//! on a fixed wall-clock period so plugins written at runtime become
//! selectable without a restart.

use futures_util::FutureExt;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::builtin::builtin_skills;
use super::loader::SkillLoader;
use super::sandbox::{SandboxConfig, SkillSandbox};
use super::types::{Skill, SkillContext, SkillError};
use crate::events::EventLog;

/// Registry tuning
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub skills_dir: PathBuf,
    /// Wall-clock period between re-scans
    pub scan_period: Duration,
    /// Deadline for one invocation
    pub invoke_timeout: Duration,
    /// Reward for a failed, panicking or timed-out invocation
    pub failure_reward: f64,
    pub sandbox: SandboxConfig,
}

pub struct SkillRegistry {
    config: RegistryConfig,
    loader: SkillLoader,
    builtins: Vec<Arc<dyn Skill>>,
    skills: Vec<Arc<dyn Skill>>,
    last_scan: Option<Instant>,
}

impl SkillRegistry {
    /// Registry holding only the built-ins until the first discovery
    pub fn new(config: RegistryConfig) -> Self {
        let sandbox = Arc::new(SkillSandbox::new(config.sandbox.clone()));
        let loader = SkillLoader::new(config.skills_dir.clone(), sandbox);
        let builtins = builtin_skills();

        Self {
            config,
            loader,
            skills: builtins.clone(),
            builtins,
            last_scan: None,
        }
    }

    /// Add an in-process skill that survives every re-scan
    pub fn register_builtin(&mut self, skill: Arc<dyn Skill>) {
        merge(&mut self.builtins, skill.clone());
        merge(&mut self.skills, skill);
    }

    /// Rebuild the map from built-ins plus a fresh directory scan.
    /// Returns the number of plugins loaded.
    pub async fn discover(&mut self, log: &EventLog) -> usize {
        let discovery = self.loader.discover().await;

        for (file, error) in &discovery.errors {
            warn!("Failed to load skill {}: {}", file.display(), error);
            log.append(
                "skill_load_error",
                json!({"file": file.display().to_string(), "error": error}),
            );
        }

        let loaded = discovery.skills.len();
        let mut skills = self.builtins.clone();
        for skill in discovery.skills {
            merge(&mut skills, skill);
        }

        self.skills = skills;
        self.last_scan = Some(Instant::now());
        loaded
    }

    /// Re-scan when the period has elapsed; logs `skills_refreshed`
    pub async fn refresh_if_due(&mut self, log: &EventLog) -> bool {
        let due = self
            .last_scan
            .map_or(true, |t| t.elapsed() >= self.config.scan_period);
        if !due {
            return false;
        }

        let before = self.names();
        self.discover(log).await;
        let after = self.names();

        if before != after {
            info!("Skills changed: {:?}", after);
        }
        log.append("skills_refreshed", json!({"skills": after}));
        true
    }

    /// Candidate names in registry order
    pub fn names(&self) -> Vec<String> {
        self.skills.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Skill>> {
        self.skills.iter().find(|s| s.name() == name).cloned()
    }

    /// Invoke `name`, converting any failure into the fixed failure reward
    /// and a `skill_error` event. A missing reward counts as zero.
    pub async fn invoke(&self, name: &str, ctx: &mut SkillContext<'_>, log: &EventLog) -> f64 {
        match self.try_invoke(name, ctx).await {
            Ok(reward) => reward.unwrap_or(0.0),
            Err(e) => {
                warn!("Skill '{}' failed: {}", name, e);
                log.append("skill_error", json!({"action": name, "error": e.to_string()}));
                self.config.failure_reward
            }
        }
    }

    async fn try_invoke(
        &self,
        name: &str,
        ctx: &mut SkillContext<'_>,
    ) -> Result<Option<f64>, SkillError> {
        let skill = self
            .get(name)
            .ok_or_else(|| SkillError::Unknown(name.to_string()))?;

        let timeout = self.config.invoke_timeout;
        let guarded = AssertUnwindSafe(skill.invoke(ctx)).catch_unwind();

        match tokio::time::timeout(timeout, guarded).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(SkillError::Panicked(panic_message(panic))),
            Err(_) => Err(SkillError::Timeout(timeout.as_secs())),
        }
    }
}

/// Replace a same-named entry in place, else append
fn merge(skills: &mut Vec<Arc<dyn Skill>>, skill: Arc<dyn Skill>) {
    match skills.iter().position(|s| s.name() == skill.name()) {
        Some(idx) => skills[idx] = skill,
        None => skills.push(skill),
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RotationConfig;
    use crate::state::AgentState;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct Flaky;

    #[async_trait]
    impl Skill for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn invoke(&self, _ctx: &mut SkillContext<'_>) -> Result<Option<f64>, SkillError> {
            Err(SkillError::Internal("sensor offline".to_string()))
        }
    }

    struct Panicky;

    #[async_trait]
    impl Skill for Panicky {
        fn name(&self) -> &str {
            "panicky"
        }

        async fn invoke(&self, _ctx: &mut SkillContext<'_>) -> Result<Option<f64>, SkillError> {
            panic!("lost the plot");
        }
    }

    struct Sleepy;

    #[async_trait]
    impl Skill for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }

        async fn invoke(&self, _ctx: &mut SkillContext<'_>) -> Result<Option<f64>, SkillError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Some(1.0))
        }
    }

    struct Silent;

    #[async_trait]
    impl Skill for Silent {
        fn name(&self) -> &str {
            "heartbeat"
        }

        async fn invoke(&self, _ctx: &mut SkillContext<'_>) -> Result<Option<f64>, SkillError> {
            Ok(None)
        }
    }

    fn setup(invoke_timeout: Duration) -> (SkillRegistry, EventLog, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let registry = SkillRegistry::new(RegistryConfig {
            skills_dir: temp_dir.path().join("skills"),
            scan_period: Duration::from_secs(10),
            invoke_timeout,
            failure_reward: -0.2,
            sandbox: SandboxConfig::default(),
        });
        let log = EventLog::new(temp_dir.path().join("events.log"), RotationConfig::default());
        (registry, log, temp_dir)
    }

    #[tokio::test]
    async fn test_builtins_present() {
        let (registry, _log, _temp) = setup(Duration::from_secs(5));
        assert_eq!(registry.names(), vec!["heartbeat", "compress_memory", "reflect"]);
    }

    #[tokio::test]
    async fn test_error_becomes_failure_reward() {
        let (mut registry, log, _temp) = setup(Duration::from_secs(5));
        registry.register_builtin(Arc::new(Flaky));

        let mut state = AgentState::default();
        for _ in 0..3 {
            let mut ctx = SkillContext::new(&mut state, 0.0);
            assert_eq!(registry.invoke("flaky", &mut ctx, &log).await, -0.2);
        }

        let errors = log.tail("skill_error", 10);
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[0]["action"], "flaky");
        assert!(errors[0]["error"].as_str().unwrap().contains("sensor offline"));

        let mut ctx = SkillContext::new(&mut state, 0.0);
        assert_eq!(registry.invoke("heartbeat", &mut ctx, &log).await, 0.01);
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let (mut registry, log, _temp) = setup(Duration::from_secs(5));
        registry.register_builtin(Arc::new(Panicky));

        let mut state = AgentState::default();
        let mut ctx = SkillContext::new(&mut state, 0.0);
        assert_eq!(registry.invoke("panicky", &mut ctx, &log).await, -0.2);

        let errors = log.tail("skill_error", 10);
        assert!(errors[0]["error"].as_str().unwrap().contains("lost the plot"));
    }

    #[tokio::test]
    async fn test_deadline() {
        let (mut registry, log, _temp) = setup(Duration::from_millis(50));
        registry.register_builtin(Arc::new(Sleepy));

        let mut state = AgentState::default();
        let mut ctx = SkillContext::new(&mut state, 0.0);
        assert_eq!(registry.invoke("sleepy", &mut ctx, &log).await, -0.2);
        assert_eq!(log.tail("skill_error", 10).len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_skill() {
        let (registry, log, _temp) = setup(Duration::from_secs(5));
        let mut state = AgentState::default();
        let mut ctx = SkillContext::new(&mut state, 0.0);
        assert_eq!(registry.invoke("ghost", &mut ctx, &log).await, -0.2);
    }

    #[tokio::test]
    async fn test_missing_reward_is_zero_and_override_keeps_slot() {
        let (mut registry, log, _temp) = setup(Duration::from_secs(5));
        registry.register_builtin(Arc::new(Silent));
        assert_eq!(registry.names(), vec!["heartbeat", "compress_memory", "reflect"]);

        let mut state = AgentState::default();
        let mut ctx = SkillContext::new(&mut state, 0.0);
        assert_eq!(registry.invoke("heartbeat", &mut ctx, &log).await, 0.0);
    }

    #[tokio::test]
    async fn test_refresh_throttled() {
        let (mut registry, log, _temp) = setup(Duration::from_secs(5));
        assert!(registry.refresh_if_due(&log).await);
        assert!(!registry.refresh_if_due(&log).await);
        assert_eq!(log.tail("skills_refreshed", 10).len(), 1);
    }
}
