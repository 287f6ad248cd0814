//! Epsilon-greedy bandit over the state's action-value table.
//!
//! `choose` explores with probability `epsilon`, otherwise exploits the first
//! maximum of `q` in candidate order. `update` applies the constant step-size
//! rule `q <- (1 - alpha) * q + alpha * r`. Values are never clamped, but an
//! update that would leave `q` non-finite is refused so the table always
//! serializes.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::warn;

use crate::state::AgentState;

pub struct Bandit<R: Rng = StdRng> {
    rng: R,
}

impl Bandit<StdRng> {
    /// Seeded when `seed` is given, otherwise from OS entropy
    pub fn from_seed(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }
}

impl<R: Rng> Bandit<R> {
    pub fn with_rng(rng: R) -> Self {
        Self { rng }
    }

    pub fn ensure_action(&self, state: &mut AgentState, action: &str) {
        state.q.entry(action.to_string()).or_insert(0.0);
        state.n.entry(action.to_string()).or_insert(0);
    }

    /// Pick one of `actions`; `None` only when there are no candidates
    pub fn choose(&mut self, state: &mut AgentState, actions: &[String]) -> Option<String> {
        if actions.is_empty() {
            return None;
        }
        for action in actions {
            self.ensure_action(state, action);
        }

        if self.rng.gen::<f64>() < state.epsilon {
            let idx = self.rng.gen_range(0..actions.len());
            return Some(actions[idx].clone());
        }

        let mut best = &actions[0];
        let mut best_q = state.q[best.as_str()];
        for action in &actions[1..] {
            let q = state.q[action.as_str()];
            if q > best_q {
                best = action;
                best_q = q;
            }
        }
        Some(best.clone())
    }

    /// Apply one reward. Returns false, leaving `q` and `n` untouched, when
    /// the reward or the updated value is not finite.
    pub fn update(&self, state: &mut AgentState, action: &str, reward: f64) -> bool {
        self.ensure_action(state, action);
        let alpha = state.alpha;
        let old = state.q.get(action).copied().unwrap_or(0.0);
        let new = (1.0 - alpha) * old + alpha * reward;
        if !reward.is_finite() || !new.is_finite() {
            warn!(action, reward, alpha, "Refusing non-finite value update");
            return false;
        }

        state.q.insert(action.to_string(), new);
        *state.n.entry(action.to_string()).or_insert(0) += 1;
        true
    }
}
