//! 防挂机：空闲超过随机阈值且没有活动在跑时，做一个不起眼的小动作

use std::f32::consts::PI;
use std::time::Duration;

use async_trait::async_trait;

use crate::behavior::AgentContext;
use crate::client::Action;
use crate::core::ClientError;
use crate::watchdog::{TickOutcome, WatchdogCheck};

#[derive(Debug, Default)]
pub struct IdleGuard {
    /// 上一次抽到的阈值，仅用于日志
    last_threshold: Option<Duration>,
}

impl IdleGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_threshold(&self) -> Option<Duration> {
        self.last_threshold
    }
}

#[async_trait]
impl WatchdogCheck for IdleGuard {
    fn name(&self) -> &'static str {
        "idle_guard"
    }

    async fn tick(&mut self, ctx: &AgentContext) -> Result<TickOutcome, ClientError> {
        if ctx.busy.is_busy() {
            return Ok(TickOutcome::Quiet);
        }

        // 每次检查重新抽取，避免周期性特征
        let (low, high) = ctx.config.watchdog.idle_threshold_range_ms.bounds();
        let threshold = ctx.random.duration_between(low, high);
        self.last_threshold = Some(threshold);

        let idle = ctx.clock.idle_for();
        if idle < threshold {
            return Ok(TickOutcome::Quiet);
        }

        let detail = match ctx.random.range_u64(0, 2) {
            0 => {
                let yaw = ctx.random.range_f64(-PI as f64, PI as f64) as f32;
                let pitch = ctx.random.range_f64(-0.4, 0.4) as f32;
                ctx.client.perform_action(Action::Look { yaw, pitch }).await?;
                "look"
            }
            // 单次调用完成；tick 内不等待，避免第二步落进刚开始的活动
            1 => {
                ctx.client.perform_action(Action::Swing).await?;
                "swing"
            }
            _ => {
                ctx.client.perform_action(Action::Jump).await?;
                "jump"
            }
        };
        ctx.clock.touch();
        tracing::debug!(
            idle_ms = idle.as_millis() as u64,
            threshold_ms = threshold.as_millis() as u64,
            action = detail,
            "Idle threshold exceeded"
        );
        Ok(TickOutcome::Corrected(format!(
            "idle {}s, performed {detail}",
            idle.as_secs()
        )))
    }
}
