//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `KEEPER__*` 覆盖（双下划线表示嵌套，如 `KEEPER__BACKOFF__BASE_MS=30000`），
//! 最后兼容旧部署的环境变量：MINECRAFT_SERVER / MINECRAFT_PORT / MINECRAFT_USERNAME / PORT。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::behavior::NightWindow;
use crate::client::{GameMode, ServerOptions};
use crate::core::{BackoffPolicy, Growth, GrowthKind, RetryLimits};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSection,
    pub backoff: BackoffSection,
    pub behavior: BehaviorSection,
    pub sleep: SleepSection,
    pub watchdog: WatchdogSection,
    pub health: HealthSection,
    pub runtime: RuntimeSection,
}

/// 毫秒区间，配置写作 `{ min = 1000, max = 5000 }`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RangeMs {
    pub min: u64,
    pub max: u64,
}

impl RangeMs {
    pub const fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    pub fn bounds(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.min.min(self.max)),
            Duration::from_millis(self.min.max(self.max)),
        )
    }
}

/// [server] 段：目标服务器与登录身份
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub version: String,
    /// offline / microsoft
    pub auth: String,
    /// 单次连接尝试的超时（秒）
    pub connect_timeout_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 25565,
            username: "KeeperBot".to_string(),
            version: "1.20".to_string(),
            auth: "offline".to_string(),
            connect_timeout_secs: 30,
        }
    }
}

impl ServerSection {
    pub fn options(&self) -> ServerOptions {
        ServerOptions {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            version: self.version.clone(),
            auth: self.auth.clone(),
        }
    }
}

/// [backoff] 段：重连退避
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackoffSection {
    pub base_ms: u64,
    pub growth: GrowthKind,
    /// growth = "exponential" 时的倍数
    pub factor: f64,
    /// growth = "linear" 时每次增加的毫秒数
    pub step_ms: u64,
    pub cap_ms: u64,
    /// 连续失败上限，0 表示不限
    pub max_attempts: u32,
    /// 达到上限后的冷却时间
    pub cooldown_ms: u64,
    /// 被限流踢出时把失败计数抬到这个下限
    pub throttle_floor_attempts: u32,
    /// 被踢出时（不论原因）把失败计数抬到这个下限，踢出比普通断线等得更久
    pub kick_floor_attempts: u32,
    /// 踢出原因中出现这些关键字即视为限流（大小写不敏感）
    pub throttle_keywords: Vec<String>,
}

impl Default for BackoffSection {
    fn default() -> Self {
        Self {
            base_ms: 60_000,
            growth: GrowthKind::Exponential,
            factor: 2.0,
            step_ms: 60_000,
            cap_ms: 300_000,
            max_attempts: 20,
            cooldown_ms: 1_200_000,
            throttle_floor_attempts: 1,
            kick_floor_attempts: 1,
            throttle_keywords: vec![
                "throttle".into(),
                "too fast".into(),
                "wait before reconnecting".into(),
            ],
        }
    }
}

impl BackoffSection {
    pub fn policy(&self) -> BackoffPolicy {
        let growth = match self.growth {
            GrowthKind::Exponential => Growth::Exponential {
                factor: self.factor,
            },
            GrowthKind::Linear => Growth::Linear {
                step: Duration::from_millis(self.step_ms),
            },
        };
        BackoffPolicy::new(
            Duration::from_millis(self.base_ms),
            growth,
            Duration::from_millis(self.cap_ms),
        )
    }

    pub fn limits(&self) -> RetryLimits {
        RetryLimits {
            max_attempts: (self.max_attempts > 0).then_some(self.max_attempts),
            cooldown: Duration::from_millis(self.cooldown_ms),
            throttle_floor: self.throttle_floor_attempts,
            kick_floor: self.kick_floor_attempts,
        }
    }
}

/// 各活动的选择权重
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ActivityWeights {
    pub explore: u32,
    pub build: u32,
    pub idle: u32,
    pub interact: u32,
}

impl Default for ActivityWeights {
    fn default() -> Self {
        Self {
            explore: 3,
            build: 1,
            idle: 1,
            interact: 1,
        }
    }
}

/// [behavior] 段：活动轮换
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BehaviorSection {
    pub exploration_radius: f64,
    pub activity_weights: ActivityWeights,
    /// 两次活动之间的随机停顿
    pub pause_range_ms: RangeMs,
    /// 活动失败后的随机退避
    pub failure_backoff_ms: RangeMs,
    pub building_enabled: bool,
    pub build_block: String,
    pub chest_interaction_enabled: bool,
    pub deposit_list: Vec<String>,
    pub withdraw_list: Vec<String>,
    pub container_search_radius: f64,
    /// 单次移动的超时（秒）
    pub move_timeout_secs: u64,
    pub auto_sleep_enabled: bool,
}

impl Default for BehaviorSection {
    fn default() -> Self {
        Self {
            exploration_radius: 24.0,
            activity_weights: ActivityWeights::default(),
            pause_range_ms: RangeMs::new(4_000, 15_000),
            failure_backoff_ms: RangeMs::new(1_000, 5_000),
            building_enabled: true,
            build_block: "cobblestone".to_string(),
            chest_interaction_enabled: true,
            deposit_list: Vec::new(),
            withdraw_list: Vec::new(),
            container_search_radius: 16.0,
            move_timeout_secs: 20,
            auto_sleep_enabled: true,
        }
    }
}

impl BehaviorSection {
    pub fn move_timeout(&self) -> Duration {
        Duration::from_secs(self.move_timeout_secs)
    }
}

/// [sleep] 段：夜间休息
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SleepSection {
    pub search_radius: f64,
    /// 超过这个距离才需要先走过去
    pub interaction_distance: f64,
    pub bed_item: String,
    /// 背包里没有床时发送的指令，支持 {username} / {item}
    pub give_command: String,
    pub placement_attempts: u32,
    pub rest_timeout_secs: u64,
    /// 休息失败后多久内不再因夜晚抢占
    pub retry_cooldown_secs: u64,
    pub night_start: u32,
    pub night_end: u32,
}

impl Default for SleepSection {
    fn default() -> Self {
        Self {
            search_radius: 32.0,
            interaction_distance: 2.5,
            bed_item: "red_bed".to_string(),
            give_command: "/give {username} {item}".to_string(),
            placement_attempts: 4,
            rest_timeout_secs: 120,
            retry_cooldown_secs: 300,
            night_start: 12_541,
            night_end: 23_458,
        }
    }
}

impl SleepSection {
    pub fn night_window(&self) -> NightWindow {
        NightWindow::new(self.night_start, self.night_end)
    }
}

/// [watchdog] 段：防挂机与模式守护
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchdogSection {
    pub idle_interval_ms: u64,
    /// 每次检查重新抽取的空闲阈值区间
    pub idle_threshold_range_ms: RangeMs,
    pub mode_interval_ms: u64,
    pub required_mode: GameMode,
    /// 关闭后只记录模式变化，不发送纠正指令
    pub enforce_mode: bool,
    /// 支持 {mode} / {username}
    pub mode_command: String,
}

impl Default for WatchdogSection {
    fn default() -> Self {
        Self {
            idle_interval_ms: 5_000,
            idle_threshold_range_ms: RangeMs::new(20_000, 45_000),
            mode_interval_ms: 10_000,
            required_mode: GameMode::Creative,
            enforce_mode: true,
            mode_command: "/gamemode {mode} {username}".to_string(),
        }
    }
}

/// [health] 段：健康检查端点与进程心跳
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthSection {
    pub enabled: bool,
    pub port: u16,
    pub heartbeat_secs: u64,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 10_000,
            heartbeat_secs: 300,
        }
    }
}

/// [runtime] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    /// 会话拆除时等待后台任务退出的上限（秒）
    pub drain_timeout_secs: u64,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 5,
        }
    }
}

/// 从 config 目录加载配置，环境变量可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 叠加环境变量 KEEPER__*（双下划线表示嵌套键）
/// 4. 旧部署的环境变量优先级最高
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("KEEPER")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let env_port = |name: &str| std::env::var(name).ok().and_then(|v| v.parse::<i64>().ok());
    builder = builder
        .set_override_option("server.host", std::env::var("MINECRAFT_SERVER").ok())?
        .set_override_option("server.port", env_port("MINECRAFT_PORT"))?
        .set_override_option("server.username", std::env::var("MINECRAFT_USERNAME").ok())?
        .set_override_option("health.port", env_port("PORT"))?;

    let c = builder.build()?;
    c.try_deserialize()
}
