//! 连接生命周期状态机
//!
//! ```text
//! Disconnected -> Connecting -> Active -> Disconnected -> (退避) -> Connecting ...
//!                                   \-> Draining -> Disconnected   (stop)
//! ```
//!
//! ConnectionManager 是 SessionState 与 RetryState 的唯一写者：
//! - 进入 Active：清零重试计数，通知监听者启动会话级任务
//! - 连接失败或中途断开：先置 Disconnected，再通知监听者拆除，随后按恢复引擎的建议退避重连
//! - 认证失败：上报 Fatal 并返回错误，不再重试
//! - stop：不再重连，Draining 后断开

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::client::{GameClient, GameEvent, ServerOptions};
use crate::config::AppConfig;
use crate::core::{
    BackoffPolicy, ClientError, KeeperError, KeywordThrottleHint, LossCause, RecoveryAction,
    RecoveryEngine, RetryLimits, RetryPlan, RetryState, SessionState, SessionStateWriter,
};
use crate::observability::{EventBus, LifecycleEvent};

/// 会话建立 / 丢失的回调；由 ConnectionManager 串行调用
#[async_trait]
pub trait SessionListener: Send {
    async fn session_established(&mut self);

    /// 调用时 SessionState 已经离开 Active
    async fn session_lost(&mut self, reason: &str);
}

/// 用于请求主动关闭
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    shutdown: CancellationToken,
}

impl ConnectionHandle {
    /// 主动关闭：不再重连
    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

pub struct ConnectionManager<L: SessionListener> {
    client: Arc<dyn GameClient>,
    options: ServerOptions,
    connect_timeout: Duration,
    policy: BackoffPolicy,
    limits: RetryLimits,
    recovery: RecoveryEngine,
    retry: RetryState,
    state: SessionStateWriter,
    events: EventBus,
    listener: L,
    shutdown: CancellationToken,
}

impl<L: SessionListener> ConnectionManager<L> {
    pub fn new(
        client: Arc<dyn GameClient>,
        config: &AppConfig,
        state: SessionStateWriter,
        events: EventBus,
        listener: L,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            client,
            options: config.server.options(),
            connect_timeout: Duration::from_secs(config.server.connect_timeout_secs),
            policy: config.backoff.policy(),
            limits: config.backoff.limits(),
            recovery: RecoveryEngine::new(KeywordThrottleHint::new(
                config.backoff.throttle_keywords.clone(),
            )),
            retry: RetryState::new(),
            state,
            events,
            listener,
            shutdown,
        }
    }

    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            shutdown: self.shutdown.clone(),
        }
    }

    /// 运行生命周期，直到 stop 或遇到致命错误
    pub async fn run(mut self) -> Result<(), KeeperError> {
        tracing::info!(
            host = %self.options.host,
            port = self.options.port,
            username = %self.options.username,
            "Connection manager started"
        );

        let result = loop {
            if self.shutdown.is_cancelled() {
                break Ok(());
            }

            let cause = match self.connect_once().await {
                Some(cause) => cause,
                None => break Ok(()),
            };

            match self.recovery.handle(&cause) {
                RecoveryAction::Halt(reason) => {
                    self.events.emit(LifecycleEvent::Fatal {
                        reason: reason.clone(),
                    });
                    break Err(KeeperError::Fatal(reason));
                }
                RecoveryAction::Retry { kicked, throttled } => {
                    if !self.wait_before_retry(kicked, throttled).await {
                        break Ok(());
                    }
                }
            }
        };

        self.state.set(SessionState::Disconnected);
        tracing::info!("Connection manager stopped");
        result
    }

    /// 一次连接加一个会话的完整生命；主动关闭时返回 None
    async fn connect_once(&mut self) -> Option<LossCause> {
        // 先订阅再连接，避免漏掉紧随其后的断线事件
        let mut game_events = self.client.subscribe();
        self.state.set(SessionState::Connecting);
        self.events.emit(LifecycleEvent::ConnectionAttempt {
            attempt: self.retry.attempt_count(),
            host: self.options.host.clone(),
            port: self.options.port,
        });

        let connected = tokio::select! {
            _ = self.shutdown.cancelled() => {
                self.state.set(SessionState::Disconnected);
                return None;
            }
            r = tokio::time::timeout(self.connect_timeout, self.client.connect(&self.options)) => {
                r.unwrap_or(Err(ClientError::Timeout))
            }
        };

        if let Err(e) = connected {
            self.state.set(SessionState::Disconnected);
            self.events.emit(LifecycleEvent::ConnectionFailed {
                error: e.to_string(),
            });
            return Some(LossCause::ConnectFailed(e));
        }

        self.state.set(SessionState::Active);
        self.retry.record_success(Utc::now());
        self.events.emit(LifecycleEvent::SessionEstablished {
            session_id: Uuid::new_v4().to_string(),
        });
        self.listener.session_established().await;

        let lost = tokio::select! {
            _ = self.shutdown.cancelled() => None,
            cause = wait_for_loss(&mut game_events) => Some(cause),
        };

        match lost {
            None => {
                self.state.set(SessionState::Draining);
                self.listener.session_lost("shutdown").await;
                self.client.disconnect().await;
                self.state.set(SessionState::Disconnected);
                self.events.emit(LifecycleEvent::SessionLost {
                    reason: "shutdown".to_string(),
                    deliberate: true,
                });
                None
            }
            Some(cause) => {
                let reason = cause.describe();
                self.state.set(SessionState::Disconnected);
                self.events.emit(LifecycleEvent::SessionLost {
                    reason: reason.clone(),
                    deliberate: false,
                });
                self.listener.session_lost(&reason).await;
                Some(cause)
            }
        }
    }

    /// 按重试计划等待；等待中被要求关闭时返回 false
    async fn wait_before_retry(&mut self, kicked: bool, throttled: bool) -> bool {
        let floor = self.limits.floor(kicked, throttled);
        let delay = match self.retry.plan(&self.policy, &self.limits, floor) {
            RetryPlan::Retry { delay, attempt } => {
                self.events.emit(LifecycleEvent::RetryScheduled {
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                    throttled,
                });
                delay
            }
            RetryPlan::Cooldown { delay } => {
                self.events.emit(LifecycleEvent::CooldownEntered {
                    delay_ms: delay.as_millis() as u64,
                });
                delay
            }
        };

        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

async fn wait_for_loss(events: &mut broadcast::Receiver<GameEvent>) -> LossCause {
    loop {
        match events.recv().await {
            Ok(GameEvent::Lost { reason }) => return LossCause::Lost(reason),
            Ok(GameEvent::Kicked { reason }) => {
                tracing::warn!(%reason, "Kicked from server");
                return LossCause::Kicked(reason);
            }
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::debug!(skipped = n, "Game event stream lagged");
            }
            Err(broadcast::error::RecvError::Closed) => {
                return LossCause::Lost("event stream closed".to_string());
            }
        }
    }
}
