//! 核心层：错误与恢复、退避与重试、会话状态、连接状态机、会话监管、优雅关闭、装配

pub mod backoff;
pub mod builder;
pub mod connection;
pub mod error;
pub mod recovery;
pub mod retry;
pub mod session_supervisor;
pub mod shutdown;
pub mod state;

pub use backoff::{BackoffPolicy, Growth, GrowthKind};
pub use builder::{Keeper, KeeperBuilder, KeeperStatus, RunningKeeper};
pub use connection::{ConnectionHandle, ConnectionManager, SessionListener};
pub use error::{ActivityError, ClientError, KeeperError, RecoveryAction};
pub use recovery::{KeywordThrottleHint, LossCause, RecoveryEngine, ThrottleHint};
pub use retry::{RetryLimits, RetryPlan, RetryState};
pub use session_supervisor::SessionSupervisor;
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use state::{session_state, SessionState, SessionStateWriter, SessionView};
