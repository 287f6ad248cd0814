//! Built-in skills, always registered ahead of plugins.

use async_trait::async_trait;
use std::sync::Arc;

use super::types::{Skill, SkillContext, SkillError};

/// Steady low reward, the fallback action
pub struct Heartbeat;

#[async_trait]
impl Skill for Heartbeat {
    fn name(&self) -> &str {
        "heartbeat"
    }

    async fn invoke(&self, _ctx: &mut SkillContext<'_>) -> Result<Option<f64>, SkillError> {
        Ok(Some(0.01))
    }
}

/// Pays off every 20th tick
pub struct CompressMemory;

#[async_trait]
impl Skill for CompressMemory {
    fn name(&self) -> &str {
        "compress_memory"
    }

    async fn invoke(&self, ctx: &mut SkillContext<'_>) -> Result<Option<f64>, SkillError> {
        if ctx.state.ticks % 20 == 0 {
            return Ok(Some(0.2));
        }
        Ok(Some(0.0))
    }
}

/// Leaves a note every 15th tick
pub struct Reflect;

#[async_trait]
impl Skill for Reflect {
    fn name(&self) -> &str {
        "reflect"
    }

    async fn invoke(&self, ctx: &mut SkillContext<'_>) -> Result<Option<f64>, SkillError> {
        let ticks = ctx.state.ticks;
        if ticks % 15 == 0 {
            ctx.state
                .notes
                .push(format!("tick {}: staying curious", ticks));
            return Ok(Some(0.1));
        }
        Ok(Some(0.0))
    }
}

/// Built-ins in registration order
pub fn builtin_skills() -> Vec<Arc<dyn Skill>> {
    vec![
        Arc::new(Heartbeat),
        Arc::new(CompressMemory),
        Arc::new(Reflect),
    ]
}
