//! Keeper 构建器：统一的初始化逻辑
//!
//! 把配置、游戏客户端、随机源、活动处理器装配成一个 Keeper：
//! SessionState 写端交给 ConnectionManager，读端分发给调度器、看门狗与健康检查。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::behavior::{ActionClock, AgentContext, BusyFlag, BusyView, HandlerRegistry, RandomSource, StdRandom};
use crate::client::{GameClient, SimulatedClient};
use crate::config::AppConfig;
use crate::core::{
    session_state, ConnectionHandle, ConnectionManager, KeeperError, SessionSupervisor, SessionView,
};
use crate::observability::EventBus;

/// Keeper 构建器：未指定的部分使用默认实现
pub struct KeeperBuilder {
    config: AppConfig,
    client: Option<Arc<dyn GameClient>>,
    random: Option<Arc<dyn RandomSource>>,
    handlers: Option<HandlerRegistry>,
    shutdown: Option<CancellationToken>,
    events: Option<EventBus>,
}

impl KeeperBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            client: None,
            random: None,
            handlers: None,
            shutdown: None,
            events: None,
        }
    }

    /// 游戏客户端（协议适配器）；不设置时使用内存模拟世界
    pub fn with_client(mut self, client: Arc<dyn GameClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = Some(random);
        self
    }

    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = Some(handlers);
        self
    }

    /// 外部关闭令牌（通常来自 ShutdownManager）
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn build(self) -> Keeper {
        let config = Arc::new(self.config);
        let client = self.client.unwrap_or_else(|| {
            tracing::warn!("No game client configured, running against the simulated world");
            Arc::new(SimulatedClient::new())
        });
        let random = self
            .random
            .unwrap_or_else(|| Arc::new(StdRandom::from_entropy()));
        let handlers = self.handlers.unwrap_or_else(HandlerRegistry::with_defaults);
        let shutdown = self.shutdown.unwrap_or_default();
        let events = self.events.unwrap_or_default();

        let (writer, view) = session_state();
        let busy = BusyFlag::new();
        let ctx = AgentContext {
            client: Arc::clone(&client),
            session: view.clone(),
            busy: busy.view(),
            clock: ActionClock::new(),
            random,
            config: Arc::clone(&config),
            events: events.clone(),
        };

        // 会话级任务挂在关闭令牌下，关闭时一并取消
        let supervisor = SessionSupervisor::new(ctx, handlers, busy.clone(), shutdown.child_token());
        let manager = ConnectionManager::new(client, &config, writer, events.clone(), supervisor, shutdown);

        Keeper {
            status: KeeperStatus {
                session: view,
                busy: busy.view(),
                events,
                started_at: Utc::now(),
            },
            manager,
        }
    }
}

/// 只读状态：健康检查与嵌入方使用
#[derive(Debug, Clone)]
pub struct KeeperStatus {
    pub session: SessionView,
    pub busy: BusyView,
    pub events: EventBus,
    pub started_at: DateTime<Utc>,
}

/// 装配完成、尚未启动的 Keeper
pub struct Keeper {
    status: KeeperStatus,
    manager: ConnectionManager<SessionSupervisor>,
}

impl Keeper {
    pub fn builder(config: AppConfig) -> KeeperBuilder {
        KeeperBuilder::new(config)
    }

    pub fn status(&self) -> KeeperStatus {
        self.status.clone()
    }

    /// 开始生命周期
    pub fn start(self) -> RunningKeeper {
        let handle = self.manager.handle();
        let task = tokio::spawn(self.manager.run());
        RunningKeeper {
            status: self.status,
            handle,
            task,
        }
    }
}

/// 已启动的 Keeper
pub struct RunningKeeper {
    status: KeeperStatus,
    handle: ConnectionHandle,
    task: JoinHandle<Result<(), KeeperError>>,
}

impl RunningKeeper {
    pub fn status(&self) -> &KeeperStatus {
        &self.status
    }

    /// 主动关闭：不再重连
    pub fn stop(&self) {
        self.handle.stop();
    }

    /// 等待生命周期结束（stop 之后或遇到致命错误）
    pub async fn wait(self) -> Result<(), KeeperError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(KeeperError::Fatal(format!("lifecycle task failed: {e}"))),
        }
    }
}
