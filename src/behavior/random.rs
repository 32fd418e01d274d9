//! 可注入的随机源
//!
//! 活动选择、停顿时长、空闲阈值都走 RandomSource；生产用 StdRandom，
//! 测试用固定种子或 ScriptedRandom 让行为确定。

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub trait RandomSource: Send + Sync {
    /// [low, high] 闭区间；low > high 时交换
    fn range_u64(&self, low: u64, high: u64) -> u64;

    /// [0, 1)
    fn unit(&self) -> f64;

    /// 按权重选下标；全为 0 时返回 None
    fn pick_weighted(&self, weights: &[u32]) -> Option<usize>;

    fn duration_between(&self, low: Duration, high: Duration) -> Duration {
        Duration::from_millis(self.range_u64(low.as_millis() as u64, high.as_millis() as u64))
    }

    fn range_f64(&self, low: f64, high: f64) -> f64 {
        low + (high - low) * self.unit()
    }

    /// 原地洗牌（Fisher–Yates）
    fn shuffle<T>(&self, items: &mut [T])
    where
        Self: Sized,
    {
        shuffle_with(self, items);
    }
}

/// 供 `dyn RandomSource` 使用的洗牌
pub fn shuffle_with<T, R: RandomSource + ?Sized>(random: &R, items: &mut [T]) {
    for i in (1..items.len()).rev() {
        let j = random.range_u64(0, i as u64) as usize;
        items.swap(i, j);
    }
}

fn ordered(low: u64, high: u64) -> (u64, u64) {
    if low <= high {
        (low, high)
    } else {
        (high, low)
    }
}

/// 基于 StdRng 的随机源
pub struct StdRandom {
    rng: Mutex<StdRng>,
}

impl StdRandom {
    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut rng = self.rng.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut rng)
    }
}

impl RandomSource for StdRandom {
    fn range_u64(&self, low: u64, high: u64) -> u64 {
        let (low, high) = ordered(low, high);
        self.with_rng(|rng| rng.gen_range(low..=high))
    }

    fn unit(&self) -> f64 {
        self.with_rng(|rng| rng.gen::<f64>())
    }

    fn pick_weighted(&self, weights: &[u32]) -> Option<usize> {
        let dist = WeightedIndex::new(weights).ok()?;
        Some(self.with_rng(|rng| dist.sample(rng)))
    }
}

/// 按脚本依次吐出的值；脚本耗尽后一直返回 0（即区间下限 / 第一个非零权重）
#[derive(Default)]
pub struct ScriptedRandom {
    values: Mutex<VecDeque<u64>>,
}

impl ScriptedRandom {
    pub fn new(values: impl IntoIterator<Item = u64>) -> Self {
        Self {
            values: Mutex::new(values.into_iter().collect()),
        }
    }

    fn next(&self) -> u64 {
        self.values
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front()
            .unwrap_or(0)
    }
}

impl RandomSource for ScriptedRandom {
    fn range_u64(&self, low: u64, high: u64) -> u64 {
        let (low, high) = ordered(low, high);
        let span = high - low;
        if span == u64::MAX {
            return self.next();
        }
        low + self.next() % (span + 1)
    }

    fn unit(&self) -> f64 {
        (self.next() % 1000) as f64 / 1000.0
    }

    /// 脚本值落在累计权重区间中对应的下标
    fn pick_weighted(&self, weights: &[u32]) -> Option<usize> {
        let total: u64 = weights.iter().map(|w| *w as u64).sum();
        if total == 0 {
            return None;
        }
        let mut point = self.next() % total;
        for (i, w) in weights.iter().enumerate() {
            let w = *w as u64;
            if point < w {
                return Some(i);
            }
            point -= w;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_std_random_respects_bounds() {
        let random = StdRandom::seeded(7);
        for _ in 0..500 {
            let v = random.range_u64(20, 45);
            assert!((20..=45).contains(&v));
            let d = random.duration_between(Duration::from_secs(5), Duration::from_secs(2));
            assert!(d >= Duration::from_secs(2) && d <= Duration::from_secs(5));
        }
    }

    #[test]
    fn test_std_random_weighted_skips_zero() {
        let random = StdRandom::seeded(42);
        for _ in 0..500 {
            let i = random.pick_weighted(&[3, 0, 1, 0]).unwrap();
            assert!(i == 0 || i == 2);
        }
        assert_eq!(random.pick_weighted(&[0, 0]), None);
    }

    #[test]
    fn test_scripted_weighted_points() {
        // 累计区间：[0,3) -> 0, [3,4) -> 1, [4,5) -> 2, [5,6) -> 3
        let random = ScriptedRandom::new([0, 2, 3, 4, 5, 6]);
        let picks: Vec<usize> = (0..6)
            .map(|_| random.pick_weighted(&[3, 1, 1, 1]).unwrap())
            .collect();
        assert_eq!(picks, vec![0, 0, 1, 2, 3, 0]);
    }

    #[test]
    fn test_shuffle_is_permutation() {
        let random = StdRandom::seeded(1);
        let mut items = vec![1, 2, 3, 4];
        random.shuffle(&mut items);
        let mut sorted = items.clone();
        sorted.sort();
        assert_eq!(sorted, vec![1, 2, 3, 4]);
    }
}
