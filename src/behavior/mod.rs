//! 行为层：活动类型、共享上下文、处理器注册表、睡眠状态机与单飞调度器

pub mod context;
pub mod handlers;
pub mod night;
pub mod random;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod sleep;

use std::fmt;

use serde::Serialize;

pub use context::{fill_template, ActionClock, AgentContext, BusyFlag, BusyGuard, BusyView};
pub use handlers::{BuildHandler, ExploreHandler, IdleHandler, InteractHandler};
pub use night::NightWindow;
pub use random::{RandomSource, ScriptedRandom, StdRandom};
pub use registry::{ActivityHandler, HandlerRegistry};
pub use scheduler::{ActivityScheduler, SchedulerHandle};
pub use session::{ActivityOutcome, ActivitySession};
pub use sleep::{SleepCycle, SleepHandler, SleepOutcome, SleepPhase};

/// 活动种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Explore,
    Build,
    Idle,
    Interact,
    Sleep,
}

impl ActivityKind {
    /// 参与加权轮换的种类（Sleep 只通过抢占进入）
    pub const ROTATION: [ActivityKind; 4] = [
        ActivityKind::Explore,
        ActivityKind::Build,
        ActivityKind::Idle,
        ActivityKind::Interact,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Explore => "explore",
            ActivityKind::Build => "build",
            ActivityKind::Idle => "idle",
            ActivityKind::Interact => "interact",
            ActivityKind::Sleep => "sleep",
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            ActivityKind::Explore => 1,
            ActivityKind::Build => 2,
            ActivityKind::Idle => 3,
            ActivityKind::Interact => 4,
            ActivityKind::Sleep => 5,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(ActivityKind::Explore),
            2 => Some(ActivityKind::Build),
            3 => Some(ActivityKind::Idle),
            4 => Some(ActivityKind::Interact),
            5 => Some(ActivityKind::Sleep),
            _ => None,
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
