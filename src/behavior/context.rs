//! 代理共享上下文
//!
//! 所有组件通过 AgentContext 拿到客户端、会话视图、忙碌标志视图、动作时钟、随机源与配置，
//! 不使用模块级全局变量。每个可变字段只有一个写者：
//! - SessionState：ConnectionManager（这里只有只读视图）
//! - 忙碌标志：ActivityScheduler（BusyFlag），其他组件只拿 BusyView
//! - 动作时钟：任何真正执行了动作的一方在动作后 touch

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::behavior::{ActivityKind, RandomSource};
use crate::client::GameClient;
use crate::config::AppConfig;
use crate::core::SessionView;
use crate::observability::EventBus;

#[derive(Clone)]
pub struct AgentContext {
    pub client: Arc<dyn GameClient>,
    pub session: SessionView,
    pub busy: BusyView,
    pub clock: ActionClock,
    pub random: Arc<dyn RandomSource>,
    pub config: Arc<AppConfig>,
    pub events: EventBus,
}

impl AgentContext {
    /// 当前是否处于夜间窗口；拿不到世界时间时视为白天
    pub fn is_night(&self) -> bool {
        self.client
            .time_of_day()
            .map(|t| self.config.sleep.night_window().contains(t))
            .unwrap_or(false)
    }

    pub fn username(&self) -> &str {
        &self.config.server.username
    }
}

/// 用 {key} 占位符渲染指令模板
pub fn fill_template(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{key}}}"), value)
    })
}

/// 最近一次动作的时间
#[derive(Debug, Clone)]
pub struct ActionClock {
    last: Arc<Mutex<Instant>>,
}

impl ActionClock {
    pub fn new() -> Self {
        Self {
            last: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn touch(&self) {
        *self.last.lock().unwrap_or_else(|p| p.into_inner()) = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last.lock().unwrap_or_else(|p| p.into_inner()).elapsed()
    }
}

impl Default for ActionClock {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct BusyInner {
    busy: AtomicBool,
    kind: AtomicU8,
}

/// 单会话忙碌标志（写端）：try_acquire 成功才允许创建 ActivitySession
#[derive(Debug, Clone, Default)]
pub struct BusyFlag {
    inner: Arc<BusyInner>,
}

/// 持有期间标志为忙；drop 时释放
#[derive(Debug)]
pub struct BusyGuard {
    inner: Arc<BusyInner>,
}

/// 只读视图：看门狗、聊天触发等并发请求方据此决定是否 no-op
#[derive(Debug, Clone)]
pub struct BusyView {
    inner: Arc<BusyInner>,
}

impl BusyFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// 非阻塞；已忙时返回 None
    pub fn try_acquire(&self, kind: ActivityKind) -> Option<BusyGuard> {
        self.inner
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        self.inner.kind.store(kind.to_u8(), Ordering::Release);
        Some(BusyGuard {
            inner: Arc::clone(&self.inner),
        })
    }

    pub fn view(&self) -> BusyView {
        BusyView {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.inner.kind.store(0, Ordering::Release);
        self.inner.busy.store(false, Ordering::Release);
    }
}

impl BusyView {
    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::Acquire)
    }

    pub fn current(&self) -> Option<ActivityKind> {
        if !self.is_busy() {
            return None;
        }
        ActivityKind::from_u8(self.inner.kind.load(Ordering::Acquire))
    }
}
