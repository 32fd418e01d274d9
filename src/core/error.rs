//! 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 ClientError / 断线原因决定 Retry（退避重连）或 Halt（终止进程）。

use std::time::Duration;

use thiserror::Error;

/// 外部游戏客户端返回的错误（传输、认证、踢出、动作被拒绝等）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("Connection timed out")]
    Timeout,

    #[error("Connection refused: {0}")]
    Refused(String),

    #[error("Connection reset: {0}")]
    Reset(String),

    /// 凭据无效：重试不可能成功
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Kicked: {0}")]
    Kicked(String),

    #[error("Action rejected: {0}")]
    Rejected(String),

    #[error("Not connected")]
    NotConnected,
}

/// 单个活动内部的错误；调度器记录后吞掉，不向上传播
#[derive(Error, Debug)]
pub enum ActivityError {
    /// 会话结束或被抢占，处理器应立即退出
    #[error("Activity cancelled")]
    Cancelled,

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("Target unreachable within {0:?}")]
    Unreachable(Duration),

    #[error("Missing item: {0}")]
    MissingItem(String),

    #[error("No handler registered for {0}")]
    NoHandler(String),
}

/// 跨越会话边界的错误：只有 Fatal 会终止生命周期
#[derive(Error, Debug)]
pub enum KeeperError {
    #[error("Fatal: {0}")]
    Fatal(String),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 进入退避重连；kicked 表示被服务器踢出，throttled 表示提示连接过快，两者都要前置更长等待
    Retry { kicked: bool, throttled: bool },
    /// 不可恢复，上报给运维并停止进程
    Halt(String),
}
