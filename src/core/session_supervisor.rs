//! 会话监管：会话级任务的启动与拆除
//!
//! 每个 Active 会话拥有一个从根令牌派生的子 CancellationToken：调度器、两个看门狗、聊天监听都挂在它下面。
//! 会话丢失时取消子令牌、停掉看门狗，在 drain 超时内等待任务退出，超时则强制中止；
//! 之后才允许下一次会话启动任何东西。

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::behavior::{ActivityScheduler, AgentContext, BusyFlag, HandlerRegistry, SchedulerHandle};
use crate::client::GameEvent;
use crate::core::SessionListener;
use crate::watchdog::{IdleGuard, ModeGuard, Watchdog};

/// 一个存活会话的任务集合
struct LiveSession {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

pub struct SessionSupervisor {
    ctx: AgentContext,
    handlers: HandlerRegistry,
    busy: BusyFlag,
    /// 整个进程的根令牌
    cancel_token: CancellationToken,
    drain_timeout: Duration,
    idle_guard: Watchdog<IdleGuard>,
    mode_guard: Watchdog<ModeGuard>,
    live: Option<LiveSession>,
}

impl SessionSupervisor {
    pub fn new(ctx: AgentContext, handlers: HandlerRegistry, busy: BusyFlag, cancel_token: CancellationToken) -> Self {
        let watchdog = &ctx.config.watchdog;
        let idle_guard = Watchdog::new(IdleGuard::new(), Duration::from_millis(watchdog.idle_interval_ms));
        let mode_guard = Watchdog::new(ModeGuard::new(), Duration::from_millis(watchdog.mode_interval_ms));
        let drain_timeout = Duration::from_secs(ctx.config.runtime.drain_timeout_secs);
        Self {
            ctx,
            handlers,
            busy,
            cancel_token,
            drain_timeout,
            idle_guard,
            mode_guard,
            live: None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }

    pub fn idle_guard(&self) -> &Watchdog<IdleGuard> {
        &self.idle_guard
    }

    pub fn mode_guard(&self) -> &Watchdog<ModeGuard> {
        &self.mode_guard
    }

    /// 创建子 token（用于单个会话）
    fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    async fn start_session(&mut self) {
        if self.live.is_some() {
            tracing::warn!("Previous session still live, tearing it down first");
            self.teardown("superseded").await;
        }

        let token = self.child_token();
        self.ctx.clock.touch();

        let scheduler = ActivityScheduler::new(self.ctx.clone(), self.handlers.clone(), self.busy.clone());
        let handle = scheduler.handle();
        let mut tasks = vec![tokio::spawn(scheduler.run(token.clone()))];

        self.idle_guard.start(self.ctx.clone(), &token);
        self.mode_guard.start(self.ctx.clone(), &token);

        tasks.push(tokio::spawn(listen_chat(
            self.ctx.client.subscribe(),
            self.ctx.config.server.username.clone(),
            handle,
            token.clone(),
        )));

        tracing::info!("Session tasks started");
        self.live = Some(LiveSession { token, tasks });
    }

    async fn teardown(&mut self, reason: &str) {
        self.idle_guard.stop();
        self.mode_guard.stop();

        let Some(live) = self.live.take() else {
            return;
        };
        live.token.cancel();

        let deadline = tokio::time::Instant::now() + self.drain_timeout;
        for mut task in live.tasks {
            if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                tracing::warn!("Session task did not exit within drain timeout, aborting");
                task.abort();
            }
        }
        tracing::info!(%reason, "Session tasks stopped");
    }
}

#[async_trait]
impl SessionListener for SessionSupervisor {
    async fn session_established(&mut self) {
        self.start_session().await;
    }

    async fn session_lost(&mut self, reason: &str) {
        self.teardown(reason).await;
    }
}

/// 聊天消息触发一次提前调度；有活动在跑时什么也不做
async fn listen_chat(
    mut events: broadcast::Receiver<GameEvent>,
    own_name: String,
    scheduler: SchedulerHandle,
    token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            e = events.recv() => e,
        };
        match event {
            Ok(GameEvent::Chat { sender, message }) if sender != own_name => {
                tracing::info!(%sender, %message, "Chat received");
                if scheduler.request_bump() {
                    tracing::debug!("Chat bumped the scheduler");
                }
            }
            Ok(GameEvent::ModeChanged(mode)) => {
                tracing::debug!(mode = mode.as_str(), "Mode change reported by client");
            }
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
