//! 夜间窗口判定
//!
//! 只是对世界时间的谓词，每次现查，不缓存。

/// 一天 24000 刻
pub const DAY_TICKS: u32 = 24_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NightWindow {
    pub start: u32,
    pub end: u32,
}

impl NightWindow {
    pub fn new(start: u32, end: u32) -> Self {
        Self {
            start: start % DAY_TICKS,
            end: end % DAY_TICKS,
        }
    }

    /// 支持跨越 0 点的窗口（start > end）
    pub fn contains(&self, time_of_day: u32) -> bool {
        let t = time_of_day % DAY_TICKS;
        if self.start <= self.end {
            t >= self.start && t < self.end
        } else {
            t >= self.start || t < self.end
        }
    }
}

impl Default for NightWindow {
    /// 可以上床的时间段
    fn default() -> Self {
        Self::new(12_541, 23_458)
    }
}
