//! End-to-end tick loop tests against a temporary home directory

use async_trait::async_trait;
use seedloop::{
    Config, Inbox, Phase, RotationConfig, Skill, SkillContext, SkillError, StateStore, TickEngine,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn test_config(root: &TempDir) -> Config {
    let mut config = Config::with_root(root.path());
    config.tick_interval = Duration::from_millis(5);
    config.error_backoff = Duration::from_millis(5);
    config.seed = Some(7);
    config
}

fn inbox(config: &Config) -> Inbox {
    Inbox::new(config.inbox_path(), config.settable_keys.clone())
}

async fn greedy_engine(config: Config, favorite: &str) -> TickEngine {
    let mut engine = TickEngine::new(config).unwrap();
    engine.start().await;
    let state = engine.state_mut();
    state.epsilon = 0.0;
    state.q.insert(favorite.to_string(), 1.0);
    engine
}

struct Exploding;

#[async_trait]
impl Skill for Exploding {
    fn name(&self) -> &str {
        "exploding"
    }

    async fn invoke(&self, _ctx: &mut SkillContext<'_>) -> Result<Option<f64>, SkillError> {
        Err(SkillError::Internal("disk on fire".to_string()))
    }
}

#[tokio::test]
async fn test_inbox_reward_merges_into_chosen_action() {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);
    inbox(&config).push("reward heartbeat +0.50").unwrap();

    let mut engine = greedy_engine(config, "heartbeat").await;
    let report = engine.tick().await.unwrap();

    assert_eq!(report.tick, 1);
    assert_eq!(report.action, "heartbeat");
    assert!((report.reward - 0.51).abs() < 1e-9);
    assert_eq!(report.offpolicy_updates, 0);

    let expected_q = 1.0 + 0.3 * (report.reward - 1.0);
    assert!((engine.state().q["heartbeat"] - expected_q).abs() < 1e-9);
    assert_eq!(engine.state().n["heartbeat"], 1);

    assert!(engine.log().tail("offpolicy_update", 10).is_empty());
    assert_eq!(engine.log().tail("external_reward", 10).len(), 1);

    let ticks = engine.log().tail("tick", 10);
    assert_eq!(ticks.len(), 1);
    assert_eq!(ticks[0]["action"], "heartbeat");
}

#[tokio::test]
async fn test_inbox_reward_for_other_action_is_offpolicy() {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);
    inbox(&config).push("reward reflect 1.0").unwrap();

    let mut engine = greedy_engine(config, "heartbeat").await;
    let report = engine.tick().await.unwrap();

    assert_eq!(report.action, "heartbeat");
    assert!((report.reward - 0.01).abs() < 1e-9);
    assert_eq!(report.offpolicy_updates, 1);

    assert!((engine.state().q["reflect"] - 0.3).abs() < 1e-9);
    assert_eq!(engine.state().n["reflect"], 1);

    let updates = engine.log().tail("offpolicy_update", 10);
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["action"], "reflect");
}

#[tokio::test]
async fn test_failing_skill_does_not_stop_the_loop() {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);
    let failure_reward = config.failure_reward;

    let mut engine = TickEngine::new(config).unwrap();
    engine.registry_mut().register_builtin(Arc::new(Exploding));
    engine.start().await;
    engine.state_mut().epsilon = 0.0;
    engine.state_mut().q.insert("exploding".to_string(), 5.0);

    let report = engine.tick().await.unwrap();
    assert_eq!(report.action, "exploding");
    assert_eq!(report.reward, failure_reward);

    let errors = engine.log().tail("skill_error", 10);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["action"], "exploding");

    let report = engine.tick().await.unwrap();
    assert_eq!(report.tick, 2);
}

#[tokio::test]
async fn test_failing_skill_loses_to_other_skills() {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);

    let mut engine = TickEngine::new(config).unwrap();
    engine.registry_mut().register_builtin(Arc::new(Exploding));
    engine.start().await;
    engine.state_mut().epsilon = 0.0;
    engine.state_mut().q.insert("exploding".to_string(), 5.0);

    let mut actions = Vec::new();
    for _ in 0..30 {
        actions.push(engine.tick().await.unwrap().action);
    }

    assert_eq!(actions[0], "exploding");
    assert!(actions.iter().any(|a| a == "heartbeat"));
    let exploded = actions.iter().filter(|a| *a == "exploding").count();
    assert!(exploded < actions.len());
    assert_eq!(engine.log().tail("skill_error", 100).len(), exploded);
    assert!(engine.state().q["exploding"] < 0.0);
}

#[tokio::test]
async fn test_overflowing_rewards_keep_state_loadable() {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);
    let queue = inbox(&config);
    queue.push("reward heartbeat 1e308").unwrap();
    queue.push("reward heartbeat 1e308").unwrap();

    let mut engine = greedy_engine(config.clone(), "heartbeat").await;
    let report = engine.tick().await.unwrap();
    assert_eq!(report.action, "heartbeat");
    assert_eq!(report.reward, 0.0);
    assert_eq!(engine.log().tail("reward_rejected", 10).len(), 1);
    assert_eq!(engine.state().q["heartbeat"], 1.0);

    // finite reward, but alpha = 5 pushes the update past f64::MAX
    queue.push("set alpha 5").unwrap();
    queue.push("reward heartbeat 1e308").unwrap();
    engine.tick().await.unwrap();
    assert_eq!(engine.log().tail("reward_rejected", 10).len(), 2);
    assert_eq!(engine.state().q["heartbeat"], 1.0);

    let saved = StateStore::new(config.state_path()).load().unwrap();
    assert_eq!(saved.ticks, 2);
    assert_eq!(saved.q["heartbeat"], 1.0);
    assert_eq!(saved.alpha, 5.0);
    assert!(!config.data_dir.join("state.corrupt.json").exists());
}

#[tokio::test]
async fn test_tick_error_is_logged_and_loop_continues() {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);
    let state_path = config.state_path();

    let mut engine = TickEngine::new(config.clone()).unwrap();
    // a directory at the state path makes every persist fail
    std::fs::remove_file(&state_path).unwrap();
    std::fs::create_dir(&state_path).unwrap();

    let lifecycle = engine.lifecycle();
    let blocker = state_path.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(60)).await;
        std::fs::remove_dir(&blocker).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        lifecycle.request_stop();
    });

    tokio::time::timeout(Duration::from_secs(10), engine.run())
        .await
        .expect("run did not stop")
        .unwrap();

    let errors = engine.log().tail("loop_error", 1000);
    assert!(!errors.is_empty());
    assert!(errors[0]["error"].as_str().unwrap().contains("persist"));

    let saved = StateStore::new(state_path.clone()).read().unwrap();
    assert!(saved.ticks as usize > errors.len());
    assert_eq!(saved.ticks, engine.state().ticks);
}

#[tokio::test]
async fn test_tick_rotates_oversized_log() {
    let root = TempDir::new().unwrap();
    let mut config = test_config(&root);
    config.rotation = RotationConfig {
        max_bytes: 256,
        keep: 3,
        check_every_ticks: 1,
    };

    let mut engine = TickEngine::new(config).unwrap();
    engine.start().await;

    let mut rotations = 0;
    for _ in 0..10 {
        if engine.tick().await.unwrap().rotated {
            rotations += 1;
        }
    }

    assert!(rotations > 0);
    let archives = engine.log().archives();
    assert!(!archives.is_empty());
    assert!(archives.len() <= 3);
    assert!(engine.state().last_rotation_file.is_some());
    assert!(engine.log().path().exists());
}

#[tokio::test]
async fn test_inbox_set_respects_allow_list() {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);
    let queue = inbox(&config);
    queue.push("set alpha 0.5").unwrap();
    queue.push("set epsilon 0.9").unwrap();
    queue.push("note hello there").unwrap();
    queue.push("dance").unwrap();

    let mut engine = TickEngine::new(config).unwrap();
    engine.start().await;
    let epsilon_before = engine.state().epsilon;
    engine.tick().await.unwrap();

    assert_eq!(engine.state().alpha, 0.5);
    assert_eq!(engine.state().epsilon, epsilon_before);
    assert!(engine.state().notes.contains(&"hello there".to_string()));
    assert_eq!(engine.log().tail("param_update", 10).len(), 1);
    assert_eq!(engine.log().tail("inbox_unknown", 10).len(), 1);
    assert!(!engine.inbox().path().exists());
}

#[tokio::test]
async fn test_state_persists_across_restarts() {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);

    let mut engine = TickEngine::new(config.clone()).unwrap();
    engine.start().await;
    for _ in 0..3 {
        engine.tick().await.unwrap();
    }

    let saved = StateStore::new(config.state_path()).load().unwrap();
    assert_eq!(saved.ticks, 3);
    assert_eq!(saved.last_actions.len(), 3);
    assert_eq!(saved.last_actions.back().unwrap().tick, 3);

    let mut restarted = TickEngine::new(config).unwrap();
    restarted.start().await;
    let report = restarted.tick().await.unwrap();
    assert_eq!(report.tick, 4);
}

#[tokio::test]
async fn test_corrupt_state_is_quarantined_on_startup() {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);
    std::fs::create_dir_all(&config.data_dir).unwrap();
    std::fs::write(config.state_path(), "{not json").unwrap();

    let mut engine = TickEngine::new(config.clone()).unwrap();
    assert_eq!(engine.state().ticks, 0);
    assert!(config.data_dir.join("state.corrupt.json").exists());

    engine.start().await;
    engine.tick().await.unwrap();
    let saved = StateStore::new(config.state_path()).load().unwrap();
    assert_eq!(saved.ticks, 1);
}

#[tokio::test]
async fn test_quit_stops_run() {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);
    inbox(&config).push("quit").unwrap();

    let mut engine = TickEngine::new(config.clone()).unwrap();
    let lifecycle = engine.lifecycle();

    tokio::time::timeout(Duration::from_secs(10), engine.run())
        .await
        .expect("run did not stop")
        .unwrap();

    assert_eq!(lifecycle.current_phase(), Phase::Stopped);
    assert_eq!(engine.state().ticks, 1);
    assert_eq!(engine.log().tail("startup", 10).len(), 1);
    assert_eq!(engine.log().tail("shutdown", 10).len(), 1);

    let saved = StateStore::new(config.state_path()).load().unwrap();
    assert_eq!(saved.ticks, 1);
}

#[tokio::test]
async fn test_external_stop_ends_run() {
    let root = TempDir::new().unwrap();
    let mut config = test_config(&root);
    config.tick_interval = Duration::from_secs(60);

    let mut engine = TickEngine::new(config).unwrap();
    let lifecycle = engine.lifecycle();
    let stopper = lifecycle.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        stopper.request_stop();
    });

    tokio::time::timeout(Duration::from_secs(10), engine.run())
        .await
        .expect("run did not stop")
        .unwrap();
    assert_eq!(lifecycle.current_phase(), Phase::Stopped);
    assert_eq!(engine.log().tail("shutdown", 10).len(), 1);
}

#[tokio::test]
async fn test_epsilon_baseline_resets_after_tick() {
    let root = TempDir::new().unwrap();
    let mut config = test_config(&root);
    config.epsilon_baseline = Some(0.2);

    let mut engine = TickEngine::new(config).unwrap();
    engine.start().await;
    engine.state_mut().epsilon = 0.9;
    engine.tick().await.unwrap();

    assert_eq!(engine.state().epsilon, 0.2);
    let ticks = engine.log().tail("tick", 1);
    assert_eq!(ticks[0]["epsilon"], 0.9);
}
