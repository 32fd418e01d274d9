//! 看门狗：独立于活动轮换的周期性检查-纠正循环
//!
//! 两个实例：idle-guard（防挂机）与 mode-guard（游戏模式守护）。
//! - 每个 Watchdog 独占自己的 WatchdogTimer，其他组件只能读快照
//! - start 幂等：已在运行时再次 start 什么也不做
//! - 每次触发前先检查会话令牌与 SessionState=Active，会话已消失时静默跳过
//! - 纠正失败只记日志，下一个 tick 继续

pub mod idle_guard;
pub mod mode_guard;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::behavior::AgentContext;
use crate::core::ClientError;
use crate::observability::LifecycleEvent;

pub use idle_guard::IdleGuard;
pub use mode_guard::ModeGuard;

/// 单次检查的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// 一切正常，无需动作
    Quiet,
    /// 做了一次纠正
    Corrected(String),
}

/// 具体检查逻辑；tick 只在会话存活时被调用
#[async_trait]
pub trait WatchdogCheck: Send + 'static {
    fn name(&self) -> &'static str;

    async fn tick(&mut self, ctx: &AgentContext) -> Result<TickOutcome, ClientError>;
}

/// 计时器状态，只由所属 Watchdog 写入
#[derive(Debug, Clone, PartialEq)]
pub struct WatchdogTimer {
    pub interval: Duration,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub enabled: bool,
    pub fire_count: u64,
}

impl WatchdogTimer {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_fired_at: None,
            enabled: false,
            fire_count: 0,
        }
    }
}

const MIN_INTERVAL: Duration = Duration::from_millis(1);

pub struct Watchdog<C: WatchdogCheck> {
    name: &'static str,
    check: Arc<tokio::sync::Mutex<C>>,
    timer: Arc<Mutex<WatchdogTimer>>,
    token: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl<C: WatchdogCheck> Watchdog<C> {
    /// interval 至少 1ms；为 0 时 tokio 的 interval 会 panic
    pub fn new(check: C, interval: Duration) -> Self {
        Self {
            name: check.name(),
            check: Arc::new(tokio::sync::Mutex::new(check)),
            timer: Arc::new(Mutex::new(WatchdogTimer::new(interval.max(MIN_INTERVAL)))),
            token: None,
            task: None,
        }
    }

    /// 计时器快照
    pub fn timer(&self) -> WatchdogTimer {
        self.timer.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// 挂到会话令牌下启动；已在运行时返回 false 且不做任何事
    pub fn start(&mut self, ctx: AgentContext, session_token: &CancellationToken) -> bool {
        if self.is_running() {
            tracing::debug!(watchdog = self.name, "Watchdog already armed");
            return false;
        }

        let token = session_token.child_token();
        let interval = {
            let mut timer = self.timer.lock().unwrap_or_else(|p| p.into_inner());
            timer.enabled = true;
            timer.interval
        };
        let check = Arc::clone(&self.check);
        let timer = Arc::clone(&self.timer);
        let loop_token = token.clone();

        self.task = Some(tokio::spawn(async move {
            run_loop(check, timer, interval, ctx, loop_token).await;
        }));
        self.token = Some(token);
        true
    }

    /// 停止并禁用；未启动时是 no-op
    pub fn stop(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.timer.lock().unwrap_or_else(|p| p.into_inner()).enabled = false;
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<C: WatchdogCheck> Drop for Watchdog<C> {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_loop<C: WatchdogCheck>(
    check: Arc<tokio::sync::Mutex<C>>,
    timer: Arc<Mutex<WatchdogTimer>>,
    interval: Duration,
    ctx: AgentContext,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut check = check.lock().await;
    let name = check.name();
    tracing::debug!(watchdog = name, interval_ms = interval.as_millis() as u64, "Watchdog armed");

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // 计划与触发之间会话可能已经没了
        if token.is_cancelled() || !ctx.session.is_active() {
            tracing::trace!(watchdog = name, "Session not active, skipping tick");
            continue;
        }

        {
            let mut t = timer.lock().unwrap_or_else(|p| p.into_inner());
            t.last_fired_at = Some(Utc::now());
            t.fire_count += 1;
        }

        let result = tokio::select! {
            _ = token.cancelled() => break,
            r = check.tick(&ctx) => r,
        };
        match result {
            Ok(TickOutcome::Quiet) => {}
            Ok(TickOutcome::Corrected(detail)) => {
                ctx.events.emit(LifecycleEvent::WatchdogCorrected {
                    watchdog: name.to_string(),
                    detail,
                });
            }
            Err(e) => tracing::warn!(watchdog = name, error = %e, "Watchdog correction failed"),
        }
    }

    timer.lock().unwrap_or_else(|p| p.into_inner()).enabled = false;
    tracing::debug!(watchdog = name, "Watchdog disarmed");
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::test_support::harness;
    use super::*;
    use crate::behavior::ScriptedRandom;
    use crate::config::AppConfig;
    use crate::core::SessionState;

    struct Counter {
        ticks: Arc<AtomicU32>,
        fail: bool,
    }

    #[async_trait]
    impl WatchdogCheck for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }

        async fn tick(&mut self, _ctx: &AgentContext) -> Result<TickOutcome, ClientError> {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ClientError::Rejected("no".into()))
            } else {
                Ok(TickOutcome::Quiet)
            }
        }
    }

    fn counter(fail: bool) -> (Counter, Arc<AtomicU32>) {
        let ticks = Arc::new(AtomicU32::new(0));
        (
            Counter {
                ticks: ticks.clone(),
                fail,
            },
            ticks,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_on_interval_while_active() {
        let h = harness(AppConfig::default(), ScriptedRandom::default()).await;
        let (check, ticks) = counter(false);
        let mut dog = Watchdog::new(check, Duration::from_secs(5));
        let token = CancellationToken::new();
        assert!(dog.start(h.ctx.clone(), &token));

        tokio::time::sleep(Duration::from_millis(25_100)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 5);
        let timer = dog.timer();
        assert!(timer.enabled);
        assert_eq!(timer.fire_count, 5);
        assert!(timer.last_fired_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_clamped() {
        let h = harness(AppConfig::default(), ScriptedRandom::default()).await;
        let (check, ticks) = counter(false);
        let mut dog = Watchdog::new(check, Duration::ZERO);
        assert_eq!(dog.timer().interval, Duration::from_millis(1));

        let token = CancellationToken::new();
        assert!(dog.start(h.ctx.clone(), &token));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(dog.is_running());
        assert!(ticks.load(Ordering::SeqCst) > 0);
        dog.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_start_is_noop() {
        let h = harness(AppConfig::default(), ScriptedRandom::default()).await;
        let (check, ticks) = counter(false);
        let mut dog = Watchdog::new(check, Duration::from_secs(5));
        let token = CancellationToken::new();
        assert!(dog.start(h.ctx.clone(), &token));
        assert!(!dog.start(h.ctx.clone(), &token));

        tokio::time::sleep(Duration::from_millis(10_100)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_fires_unless_active() {
        let h = harness(AppConfig::default(), ScriptedRandom::default()).await;
        let (check, ticks) = counter(false);
        let mut dog = Watchdog::new(check, Duration::from_secs(5));
        let token = CancellationToken::new();
        dog.start(h.ctx.clone(), &token);

        // 会话丢失紧接着到点：什么也不做
        tokio::time::sleep(Duration::from_millis(4_900)).await;
        h.writer.set(SessionState::Disconnected);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
        assert_eq!(dog.timer().fire_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_disables_and_allows_restart() {
        let h = harness(AppConfig::default(), ScriptedRandom::default()).await;
        let (check, ticks) = counter(false);
        let mut dog = Watchdog::new(check, Duration::from_secs(5));
        let token = CancellationToken::new();
        dog.start(h.ctx.clone(), &token);
        tokio::time::sleep(Duration::from_millis(5_100)).await;
        dog.stop();
        assert!(!dog.timer().enabled);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);

        assert!(dog.start(h.ctx.clone(), &token));
        tokio::time::sleep(Duration::from_millis(5_100)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_token_cancel_stops_loop() {
        let h = harness(AppConfig::default(), ScriptedRandom::default()).await;
        let (check, ticks) = counter(false);
        let mut dog = Watchdog::new(check, Duration::from_secs(5));
        let token = CancellationToken::new();
        dog.start(h.ctx.clone(), &token);
        token.cancel();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
        assert!(!dog.is_running());
        assert!(!dog.timer().enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_correction_keeps_ticking() {
        let h = harness(AppConfig::default(), ScriptedRandom::default()).await;
        let (check, ticks) = counter(true);
        let mut dog = Watchdog::new(check, Duration::from_secs(5));
        dog.start(h.ctx.clone(), &CancellationToken::new());

        tokio::time::sleep(Duration::from_millis(15_100)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }
}
