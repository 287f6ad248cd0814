//! Learned-status report for operators.
//!
//! Summarizes the value table plus the recent `tick` history from the event
//! log, and flags a single action dominating recent behavior.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

use crate::events::EventLog;
use crate::state::AgentState;

/// Recent `tick` events considered
pub const RECENT_WINDOW: usize = 1000;

const TOP_Q: usize = 10;
const DOMINANCE_MIN_TICKS: usize = 50;
const DOMINANCE_SHARE: f64 = 0.80;

#[derive(Debug, Clone, PartialEq)]
pub struct ActionUsage {
    pub action: String,
    pub count: usize,
    pub avg_reward: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub ticks: u64,
    pub epsilon: f64,
    pub alpha: f64,
    /// `(action, q, n)` by descending q
    pub top_q: Vec<(String, f64, u64)>,
    /// Most used first
    pub recent: Vec<ActionUsage>,
    pub recent_total: usize,
    /// `(action, share)` when one action holds most recent ticks
    pub dominance: Option<(String, f64)>,
    pub last_rotation_file: Option<String>,
}

impl StatusReport {
    pub fn build(state: &AgentState, log: &EventLog) -> Self {
        let mut top_q: Vec<(String, f64, u64)> = state
            .q
            .iter()
            .map(|(k, v)| (k.clone(), *v, state.n.get(k).copied().unwrap_or(0)))
            .collect();
        top_q.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_q.truncate(TOP_Q);

        let recent_ticks = log.tail("tick", RECENT_WINDOW);
        let (recent, recent_total) = summarize(&recent_ticks);

        let dominance = recent.first().and_then(|top| {
            let share = top.count as f64 / recent_total as f64;
            (recent_total >= DOMINANCE_MIN_TICKS && share >= DOMINANCE_SHARE)
                .then(|| (top.action.clone(), share))
        });

        Self {
            ticks: state.ticks,
            epsilon: state.epsilon,
            alpha: state.alpha,
            top_q,
            recent,
            recent_total,
            dominance,
            last_rotation_file: state.last_rotation_file.clone(),
        }
    }
}

fn summarize(ticks: &[Value]) -> (Vec<ActionUsage>, usize) {
    let mut totals: HashMap<&str, (usize, f64)> = HashMap::new();
    for event in ticks {
        let Some(action) = event.get("action").and_then(Value::as_str) else {
            continue;
        };
        let reward = event.get("reward").and_then(Value::as_f64).unwrap_or(0.0);
        let entry = totals.entry(action).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += reward;
    }

    let total: usize = totals.values().map(|(c, _)| c).sum();
    let mut usage: Vec<ActionUsage> = totals
        .into_iter()
        .map(|(action, (count, sum))| ActionUsage {
            action: action.to_string(),
            count,
            avg_reward: sum / count as f64,
        })
        .collect();
    usage.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.action.cmp(&b.action)));

    (usage, total)
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Learned Status ===")?;
        writeln!(
            f,
            "ticks={}  epsilon={:.4}  alpha={:.4}",
            self.ticks, self.epsilon, self.alpha
        )?;

        writeln!(f)?;
        writeln!(f, "-- Top Q-values --")?;
        if self.top_q.is_empty() {
            writeln!(f, "(no Q-values yet)")?;
        }
        for (action, q, n) in &self.top_q {
            writeln!(f, "{:18} Q={:8.4}   n={}", action, q, n)?;
        }

        writeln!(f)?;
        writeln!(f, "-- Recent actions (last {} ticks) --", self.recent_total)?;
        if self.recent.is_empty() {
            writeln!(f, "(no recent tick data)")?;
        }
        for usage in &self.recent {
            writeln!(
                f,
                "{:18} {:5}  ({:6.2}%)   avg_reward={:6.3}",
                usage.action,
                usage.count,
                100.0 * usage.count as f64 / self.recent_total as f64,
                usage.avg_reward
            )?;
        }

        if let Some((action, share)) = &self.dominance {
            writeln!(f)?;
            writeln!(
                f,
                "WARNING: {} holds {:.2}% of the last {} ticks",
                action,
                share * 100.0,
                self.recent_total
            )?;
        }

        if let Some(file) = &self.last_rotation_file {
            writeln!(f)?;
            writeln!(f, "last rotation: {}", file)?;
        }

        Ok(())
    }
}
