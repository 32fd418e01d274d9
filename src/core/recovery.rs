//! 连接错误恢复引擎
//!
//! 根据 ClientError 或断线原因返回 RecoveryAction，供 ConnectionManager 决定是退避重连还是终止。
//! 「被限流」的判断基于踢出原因的关键字匹配，只作为策略钩子，不保证服务器措辞稳定。

use crate::core::{ClientError, RecoveryAction};

/// 限流提示检测：给定踢出/断线原因，判断是否需要前置更长的退避
pub trait ThrottleHint: Send + Sync {
    fn is_throttled(&self, reason: &str) -> bool;
}

/// 默认实现：大小写不敏感的关键字包含匹配
#[derive(Debug, Clone)]
pub struct KeywordThrottleHint {
    keywords: Vec<String>,
}

impl KeywordThrottleHint {
    pub fn new(keywords: Vec<String>) -> Self {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }
}

impl Default for KeywordThrottleHint {
    fn default() -> Self {
        Self::new(vec![
            "throttle".into(),
            "too fast".into(),
            "wait before reconnecting".into(),
        ])
    }
}

impl ThrottleHint for KeywordThrottleHint {
    fn is_throttled(&self, reason: &str) -> bool {
        let reason = reason.to_lowercase();
        self.keywords.iter().any(|k| reason.contains(k.as_str()))
    }
}

/// 会话结束的原因（连接失败、会话中途断开、被踢出）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LossCause {
    ConnectFailed(ClientError),
    Lost(String),
    Kicked(String),
}

impl LossCause {
    pub fn describe(&self) -> String {
        match self {
            LossCause::ConnectFailed(e) => e.to_string(),
            LossCause::Lost(reason) => reason.clone(),
            LossCause::Kicked(reason) => format!("kicked: {reason}"),
        }
    }
}

/// 语义化错误分类：传输类可重试，认证类致命，踢出可重试并可能带限流提示
pub struct RecoveryEngine {
    throttle: Box<dyn ThrottleHint>,
}

impl RecoveryEngine {
    pub fn new(throttle: impl ThrottleHint + 'static) -> Self {
        Self {
            throttle: Box::new(throttle),
        }
    }

    pub fn handle(&self, cause: &LossCause) -> RecoveryAction {
        match cause {
            LossCause::ConnectFailed(ClientError::Auth(msg)) => {
                RecoveryAction::Halt(format!("authentication rejected: {msg}"))
            }
            LossCause::ConnectFailed(ClientError::Kicked(reason)) | LossCause::Kicked(reason) => {
                RecoveryAction::Retry {
                    kicked: true,
                    throttled: self.throttle.is_throttled(reason),
                }
            }
            LossCause::ConnectFailed(_) => RecoveryAction::Retry {
                kicked: false,
                throttled: false,
            },
            LossCause::Lost(reason) => RecoveryAction::Retry {
                kicked: false,
                throttled: self.throttle.is_throttled(reason),
            },
        }
    }
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::new(KeywordThrottleHint::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_auth_is_fatal() {
        let engine = RecoveryEngine::default();
        let cause = LossCause::ConnectFailed(ClientError::Auth("invalid session".into()));
        match engine.handle(&cause) {
            RecoveryAction::Halt(msg) => assert!(msg.contains("invalid session")),
            other => panic!("Expected Halt, got {other:?}"),
        }
    }

    #[test]
    fn test_recovery_transport_errors_retry() {
        let engine = RecoveryEngine::default();
        for err in [
            ClientError::Timeout,
            ClientError::Refused("ECONNREFUSED".into()),
            ClientError::Reset("ECONNRESET".into()),
        ] {
            let action = engine.handle(&LossCause::ConnectFailed(err));
            assert_eq!(
                action,
                RecoveryAction::Retry {
                    kicked: false,
                    throttled: false
                }
            );
        }
    }

    #[test]
    fn test_recovery_throttled_kick() {
        let engine = RecoveryEngine::default();
        let cause = LossCause::Kicked("Connection throttled! Please wait before reconnecting.".into());
        assert_eq!(
            engine.handle(&cause),
            RecoveryAction::Retry {
                kicked: true,
                throttled: true
            }
        );

        let cause = LossCause::Kicked("You have been idle for too long".into());
        assert_eq!(
            engine.handle(&cause),
            RecoveryAction::Retry {
                kicked: true,
                throttled: false
            }
        );
    }

    #[test]
    fn test_custom_keywords() {
        let engine = RecoveryEngine::new(KeywordThrottleHint::new(vec!["Slow Down".into()]));
        assert_eq!(
            engine.handle(&LossCause::Kicked("please slow down".into())),
            RecoveryAction::Retry {
                kicked: true,
                throttled: true
            }
        );
        assert_eq!(
            engine.handle(&LossCause::Kicked("throttled".into())),
            RecoveryAction::Retry {
                kicked: true,
                throttled: false
            }
        );
    }
}
