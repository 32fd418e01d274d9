//! 单飞活动调度器
//!
//! 只在 SessionState=Active 时运行。每一轮：夜间且允许睡眠 → Sleep；否则按权重随机选一种活动，
//! 运行到结束后随机停顿一段时间（固定停顿是明显的机器特征）。处理器失败只记录日志，
//! 短暂随机退避后继续，单次失败永远不会让循环停下。
//!
//! 互斥：开始任何 ActivitySession 之前必须拿到 BusyFlag；并发请求方（聊天触发、看门狗）
//! 只看 BusyView，忙时直接 no-op，从不阻塞。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::behavior::{
    ActivityKind, ActivityOutcome, ActivitySession, AgentContext, BusyFlag, BusyView,
    HandlerRegistry,
};
use crate::core::ActivityError;
use crate::observability::LifecycleEvent;

/// 对外句柄：查询当前活动、请求跳过停顿
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    busy: BusyView,
    bump: Arc<Notify>,
}

impl SchedulerHandle {
    /// 请求尽快开始下一项活动；有活动在跑时什么也不做并返回 false
    pub fn request_bump(&self) -> bool {
        if self.busy.is_busy() {
            return false;
        }
        self.bump.notify_one();
        true
    }

    pub fn current(&self) -> Option<ActivityKind> {
        self.busy.current()
    }
}

pub struct ActivityScheduler {
    ctx: AgentContext,
    handlers: HandlerRegistry,
    busy: BusyFlag,
    bump: Arc<Notify>,
    /// 睡眠失败后在此之前不再因夜晚抢占
    sleep_suppressed_until: Option<Instant>,
}

impl ActivityScheduler {
    pub fn new(ctx: AgentContext, handlers: HandlerRegistry, busy: BusyFlag) -> Self {
        Self {
            ctx,
            handlers,
            busy,
            bump: Arc::new(Notify::new()),
            sleep_suppressed_until: None,
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            busy: self.busy.view(),
            bump: Arc::clone(&self.bump),
        }
    }

    /// 主循环：令牌取消或会话离开 Active 时退出
    pub async fn run(mut self, token: CancellationToken) {
        tracing::info!("Activity scheduler started");
        loop {
            if token.is_cancelled() || !self.ctx.session.is_active() {
                break;
            }

            let pause = match self.run_once(&token).await {
                Some(Err(ActivityError::Cancelled)) => break,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Activity failed, backing off");
                    let (low, high) = self.ctx.config.behavior.failure_backoff_ms.bounds();
                    self.ctx.random.duration_between(low, high)
                }
                Some(Ok(_)) | None => {
                    let (low, high) = self.ctx.config.behavior.pause_range_ms.bounds();
                    self.ctx.random.duration_between(low, high)
                }
            };

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
                _ = self.bump.notified() => {
                    tracing::debug!("Pause cut short by bump request");
                }
            }
        }
        tracing::info!("Activity scheduler stopped");
    }

    /// 选出并运行一项活动；没有可选活动或标志被占用时返回 None
    pub async fn run_once(&mut self, token: &CancellationToken) -> Option<Result<ActivityOutcome, ActivityError>> {
        let kind = self.next_kind()?;
        let Some(guard) = self.busy.try_acquire(kind) else {
            tracing::debug!(%kind, "Busy flag held, skipping");
            return None;
        };

        let session = ActivitySession::new(kind, token.child_token(), self.sleep_allowed());
        let activity_id = session.id().to_string();
        self.ctx.events.emit(LifecycleEvent::ActivityStarted {
            kind,
            activity_id: activity_id.clone(),
        });

        let result = match self.handlers.get(kind) {
            Some(handler) => {
                tokio::select! {
                    _ = token.cancelled() => Err(ActivityError::Cancelled),
                    r = handler.run(&self.ctx, &session) => r,
                }
            }
            None => Err(ActivityError::NoHandler(kind.to_string())),
        };

        let elapsed = session.elapsed();
        drop(session);
        drop(guard);

        let outcome = match &result {
            Ok(outcome) => outcome.describe(),
            Err(e) => format!("failed: {e}"),
        };
        self.ctx.events.emit(LifecycleEvent::ActivityEnded {
            kind,
            activity_id,
            outcome,
            elapsed_ms: elapsed.as_millis() as u64,
        });

        if kind == ActivityKind::Sleep {
            self.after_sleep(&result);
        }
        Some(result)
    }

    /// 夜间抢占优先，否则按权重随机
    pub fn next_kind(&self) -> Option<ActivityKind> {
        if self.sleep_due() {
            return Some(ActivityKind::Sleep);
        }

        let behavior = &self.ctx.config.behavior;
        let w = behavior.activity_weights;
        let weights: Vec<u32> = ActivityKind::ROTATION
            .iter()
            .map(|kind| {
                let weight = match kind {
                    ActivityKind::Explore => w.explore,
                    ActivityKind::Build if behavior.building_enabled => w.build,
                    ActivityKind::Idle => w.idle,
                    ActivityKind::Interact if behavior.chest_interaction_enabled => w.interact,
                    _ => 0,
                };
                if self.handlers.contains(*kind) {
                    weight
                } else {
                    0
                }
            })
            .collect();

        self.ctx
            .random
            .pick_weighted(&weights)
            .map(|i| ActivityKind::ROTATION[i])
    }

    fn sleep_allowed(&self) -> bool {
        self.ctx.config.behavior.auto_sleep_enabled
            && self.handlers.contains(ActivityKind::Sleep)
            && self
                .sleep_suppressed_until
                .map_or(true, |until| Instant::now() >= until)
    }

    /// 世界时间每次现查
    fn sleep_due(&self) -> bool {
        self.sleep_allowed() && self.ctx.is_night()
    }

    fn after_sleep(&mut self, result: &Result<ActivityOutcome, ActivityError>) {
        let rested = matches!(result, Ok(ActivityOutcome::Slept(outcome)) if outcome.is_rested());
        if rested {
            self.sleep_suppressed_until = None;
            return;
        }
        let cooldown = Duration::from_secs(self.ctx.config.sleep.retry_cooldown_secs);
        tracing::info!(
            cooldown_secs = cooldown.as_secs(),
            "Sleep did not complete, returning to normal rotation"
        );
        self.sleep_suppressed_until = Some(Instant::now() + cooldown);
    }
}
