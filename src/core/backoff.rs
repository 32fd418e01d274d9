//! 重连退避策略
//!
//! 纯函数：`delay(n) = min(base * growth(n), cap)`。不同部署可接受的节奏差异很大
//! （30s/2x/2min 与 2min/步进/20min 都出现过），所以 base / growth / cap 全部来自配置。

use std::time::Duration;

use serde::Deserialize;

/// 增长方式
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Growth {
    /// base * factor^n；factor < 1 按 1 处理，保证单调
    Exponential { factor: f64 },
    /// base + step * n
    Linear { step: Duration },
}

/// 配置中的增长方式名
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GrowthKind {
    #[default]
    Exponential,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    base: Duration,
    growth: Growth,
    cap: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, growth: Growth, cap: Duration) -> Self {
        Self { base, growth, cap }
    }

    pub fn exponential(base: Duration, factor: f64, cap: Duration) -> Self {
        Self::new(base, Growth::Exponential { factor }, cap)
    }

    pub fn linear(base: Duration, step: Duration, cap: Duration) -> Self {
        Self::new(base, Growth::Linear { step }, cap)
    }

    pub fn cap(&self) -> Duration {
        self.cap
    }

    /// 第 n 次重试（从 0 开始）前的等待时间
    pub fn delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis() as f64;
        let cap_ms = self.cap.as_millis() as f64;

        let raw_ms = match self.growth {
            Growth::Exponential { factor } => {
                let factor = if factor.is_finite() { factor.max(1.0) } else { 1.0 };
                base_ms * factor.powi(attempt.min(i32::MAX as u32) as i32)
            }
            Growth::Linear { step } => base_ms + step.as_millis() as f64 * attempt as f64,
        };

        let ms = if raw_ms.is_finite() { raw_ms.min(cap_ms) } else { cap_ms };
        Duration::from_millis(ms as u64)
    }
}
