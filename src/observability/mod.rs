//! 可观测性：日志初始化与生命周期事件
//!
//! 每次状态迁移都是一条 LifecycleEvent：以 JSON 字段写入 tracing 日志，
//! 同时广播给订阅者（嵌入方、健康检查、测试）。

use serde::Serialize;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::behavior::ActivityKind;

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}

/// 对外暴露的结构化生命周期事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    ConnectionAttempt {
        attempt: u32,
        host: String,
        port: u16,
    },
    SessionEstablished {
        session_id: String,
    },
    ConnectionFailed {
        error: String,
    },
    SessionLost {
        reason: String,
        deliberate: bool,
    },
    RetryScheduled {
        attempt: u32,
        delay_ms: u64,
        throttled: bool,
    },
    CooldownEntered {
        delay_ms: u64,
    },
    ActivityStarted {
        kind: ActivityKind,
        activity_id: String,
    },
    ActivityEnded {
        kind: ActivityKind,
        activity_id: String,
        outcome: String,
        elapsed_ms: u64,
    },
    WatchdogCorrected {
        watchdog: String,
        detail: String,
    },
    Fatal {
        reason: String,
    },
}

/// 事件总线：克隆即共享同一广播通道
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }

    /// 记录日志并广播；无订阅者时广播失败可忽略
    pub fn emit(&self, event: LifecycleEvent) {
        let line = serde_json::to_string(&event).unwrap_or_default();
        match &event {
            LifecycleEvent::ConnectionFailed { .. }
            | LifecycleEvent::SessionLost { .. }
            | LifecycleEvent::CooldownEntered { .. } => {
                tracing::warn!(lifecycle = %line, "lifecycle");
            }
            LifecycleEvent::Fatal { .. } => {
                tracing::error!(lifecycle = %line, "lifecycle");
            }
            _ => tracing::info!(lifecycle = %line, "lifecycle"),
        }
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
