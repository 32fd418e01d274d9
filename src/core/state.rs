//! 会话状态：SessionState 与读写句柄
//!
//! 进程内只有一个 SessionState。写端 SessionStateWriter 不可克隆，只由 ConnectionManager 持有；
//! 其余组件（调度器、看门狗、健康检查）只拿到只读的 SessionView。

use serde::Serialize;
use tokio::sync::watch;

/// 连接生命周期阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Active,
    /// 主动关闭中：不再重连，正在拆除会话
    Draining,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Draining => "draining",
        }
    }
}

/// 唯一写端
#[derive(Debug)]
pub struct SessionStateWriter {
    tx: watch::Sender<SessionState>,
}

/// 只读视图，可随意克隆
#[derive(Debug, Clone)]
pub struct SessionView {
    rx: watch::Receiver<SessionState>,
}

/// 创建初始为 Disconnected 的状态对
pub fn session_state() -> (SessionStateWriter, SessionView) {
    let (tx, rx) = watch::channel(SessionState::Disconnected);
    (SessionStateWriter { tx }, SessionView { rx })
}

impl SessionStateWriter {
    /// 切换状态，返回旧值
    pub fn set(&self, next: SessionState) -> SessionState {
        self.tx.send_replace(next)
    }

    pub fn get(&self) -> SessionState {
        *self.tx.borrow()
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            rx: self.tx.subscribe(),
        }
    }
}

impl SessionView {
    pub fn get(&self) -> SessionState {
        *self.rx.borrow()
    }

    pub fn is_active(&self) -> bool {
        self.get() == SessionState::Active
    }

    /// 等待状态离开 Active（写端被丢弃也视为离开）
    pub async fn wait_inactive(&mut self) {
        let _ = self.rx.wait_for(|s| *s != SessionState::Active).await;
    }
}
