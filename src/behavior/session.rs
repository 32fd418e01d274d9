//! ActivitySession：一次正在运行的活动
//!
//! 由调度器在调用处理器前创建，处理器返回、失败或被取消后销毁。
//! 处理器的每个挂起点都经由这里的 pause / move_to / act，保证会话取消后立刻退出，不对已断开的连接继续动作。

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::behavior::{ActivityKind, AgentContext, SleepOutcome};
use crate::client::{Action, Point};
use crate::core::ActivityError;

/// 处理器正常结束时的结果
#[derive(Debug, Clone, PartialEq)]
pub enum ActivityOutcome {
    Completed,
    /// 夜晚到来，提前收尾让位给睡眠
    WoundDown,
    /// 条件不满足，什么也没做
    Skipped(String),
    Slept(SleepOutcome),
}

impl ActivityOutcome {
    pub fn describe(&self) -> String {
        match self {
            ActivityOutcome::Completed => "completed".to_string(),
            ActivityOutcome::WoundDown => "wound_down".to_string(),
            ActivityOutcome::Skipped(why) => format!("skipped: {why}"),
            ActivityOutcome::Slept(outcome) => format!("slept: {}", outcome.as_str()),
        }
    }
}

#[derive(Debug)]
pub struct ActivitySession {
    id: Uuid,
    kind: ActivityKind,
    started_at: DateTime<Utc>,
    started: Instant,
    cancel: CancellationToken,
    /// 夜晚是否应让普通活动收尾（自动睡眠开启且未被抑制）
    yields_to_night: bool,
}

impl ActivitySession {
    pub fn new(kind: ActivityKind, cancel: CancellationToken, yields_to_night: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            started_at: Utc::now(),
            started: Instant::now(),
            cancel,
            yields_to_night,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> ActivityKind {
        self.kind
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 取消检查点
    pub fn checkpoint(&self) -> Result<(), ActivityError> {
        if self.cancel.is_cancelled() {
            Err(ActivityError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// 普通活动是否应该收尾，让下一次调度进入睡眠；睡眠本身永远不会因此结束
    pub fn should_wind_down(&self, ctx: &AgentContext) -> bool {
        self.kind != ActivityKind::Sleep && self.yields_to_night && ctx.is_night()
    }

    /// 可取消的等待
    pub async fn pause(&self, duration: Duration) -> Result<(), ActivityError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ActivityError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// 有界移动：超时由配置决定，取消时立即放弃
    pub async fn move_to(&self, ctx: &AgentContext, target: Point, tolerance: f64) -> Result<bool, ActivityError> {
        self.checkpoint()?;
        let timeout = ctx.config.behavior.move_timeout();
        let arrived = tokio::select! {
            _ = self.cancel.cancelled() => return Err(ActivityError::Cancelled),
            r = ctx.client.move_to(target, tolerance, timeout) => r?,
        };
        ctx.clock.touch();
        Ok(arrived)
    }

    pub async fn act(&self, ctx: &AgentContext, action: Action) -> Result<(), ActivityError> {
        self.checkpoint()?;
        ctx.client.perform_action(action).await?;
        ctx.clock.touch();
        Ok(())
    }
}
