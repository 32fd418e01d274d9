//! 重试状态与重试计划
//!
//! RetryState 只由 ConnectionManager 持有与修改：成功进入 Active 时清零，
//! 每次非主动断开时先按退避计算等待、再自增。达到上限后进入长冷却并清零。

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::core::BackoffPolicy;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryState {
    attempt_count: u32,
    last_success_at: Option<DateTime<Utc>>,
}

/// 下一次重连前要做什么
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPlan {
    /// 等待 delay 后进行第 attempt 次重连（从 1 开始计数）
    Retry { delay: Duration, attempt: u32 },
    /// 连续失败达到上限：长冷却后从 0 开始
    Cooldown { delay: Duration },
}

/// 计划参数（来自 [backoff] 配置段）
#[derive(Debug, Clone, Copy)]
pub struct RetryLimits {
    /// None 表示不设上限
    pub max_attempts: Option<u32>,
    pub cooldown: Duration,
    /// 限流提示出现时 attempt_count 的下限
    pub throttle_floor: u32,
    /// 被踢出（无论是否限流）时 attempt_count 的下限
    pub kick_floor: u32,
}

impl RetryLimits {
    /// 本次断开适用的计数下限，取各项中最大的
    pub fn floor(&self, kicked: bool, throttled: bool) -> u32 {
        let kick = if kicked { self.kick_floor } else { 0 };
        let throttle = if throttled { self.throttle_floor } else { 0 };
        kick.max(throttle)
    }
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn last_success_at(&self) -> Option<DateTime<Utc>> {
        self.last_success_at
    }

    /// 成功进入 Active
    pub fn record_success(&mut self, at: DateTime<Utc>) {
        self.attempt_count = 0;
        self.last_success_at = Some(at);
    }

    /// 只升不降
    pub fn raise_to_floor(&mut self, floor: u32) {
        self.attempt_count = self.attempt_count.max(floor);
    }

    /// 非主动断开后：先把计数抬到 floor，再计算等待并推进计数
    pub fn plan(&mut self, policy: &BackoffPolicy, limits: &RetryLimits, floor: u32) -> RetryPlan {
        self.raise_to_floor(floor);

        if let Some(max) = limits.max_attempts {
            if self.attempt_count >= max {
                self.attempt_count = 0;
                return RetryPlan::Cooldown {
                    delay: limits.cooldown,
                };
            }
        }

        let delay = policy.delay(self.attempt_count);
        self.attempt_count = self.attempt_count.saturating_add(1);
        RetryPlan::Retry {
            delay,
            attempt: self.attempt_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::exponential(
            Duration::from_millis(60_000),
            2.0,
            Duration::from_millis(180_000),
        )
    }

    fn limits() -> RetryLimits {
        RetryLimits {
            max_attempts: Some(5),
            cooldown: Duration::from_secs(600),
            throttle_floor: 2,
            kick_floor: 1,
        }
    }

    fn delay_of(plan: RetryPlan) -> Duration {
        match plan {
            RetryPlan::Retry { delay, .. } | RetryPlan::Cooldown { delay } => delay,
        }
    }

    #[test]
    fn test_plan_sequence_then_success_resets() {
        let mut state = RetryState::new();
        let delays: Vec<u64> = (0..4)
            .map(|_| delay_of(state.plan(&policy(), &limits(), 0)).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![60_000, 120_000, 180_000, 180_000]);
        assert_eq!(state.attempt_count(), 4);

        state.record_success(Utc::now());
        assert_eq!(state.attempt_count(), 0);
        assert!(state.last_success_at().is_some());
        assert_eq!(
            state.plan(&policy(), &limits(), 0),
            RetryPlan::Retry {
                delay: Duration::from_millis(60_000),
                attempt: 1
            }
        );
    }

    #[test]
    fn test_throttled_raises_floor_from_zero() {
        let mut state = RetryState::new();
        let plan = state.plan(&policy(), &limits(), limits().floor(true, true));
        assert!(delay_of(plan) >= policy().delay(limits().throttle_floor));
        assert_eq!(state.attempt_count(), 3);
    }

    #[test]
    fn test_floor_takes_largest_applicable() {
        let limits = limits();
        assert_eq!(limits.floor(false, false), 0);
        assert_eq!(limits.floor(true, false), 1);
        assert_eq!(limits.floor(false, true), 2);
        assert_eq!(limits.floor(true, true), 2);

        let mut state = RetryState::new();
        assert_eq!(
            state.plan(&policy(), &limits, limits.floor(true, false)),
            RetryPlan::Retry {
                delay: Duration::from_millis(120_000),
                attempt: 2
            }
        );
    }

    #[test]
    fn test_throttle_never_lowers() {
        let mut state = RetryState::new();
        for _ in 0..4 {
            state.plan(&policy(), &limits(), 0);
        }
        state.raise_to_floor(1);
        assert_eq!(state.attempt_count(), 4);
    }

    #[test]
    fn test_cooldown_after_max_attempts() {
        let mut state = RetryState::new();
        for _ in 0..5 {
            assert!(matches!(
                state.plan(&policy(), &limits(), 0),
                RetryPlan::Retry { .. }
            ));
        }
        assert_eq!(
            state.plan(&policy(), &limits(), 0),
            RetryPlan::Cooldown {
                delay: Duration::from_secs(600)
            }
        );
        assert_eq!(state.attempt_count(), 0);
    }

    #[test]
    fn test_unlimited_attempts_never_cool_down() {
        let mut state = RetryState::new();
        let limits = RetryLimits {
            max_attempts: None,
            ..limits()
        };
        for _ in 0..1000 {
            assert!(matches!(
                state.plan(&policy(), &limits, 0),
                RetryPlan::Retry { .. }
            ));
        }
    }
}
