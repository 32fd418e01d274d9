//! 外部游戏客户端抽象
//!
//! 协议、世界模型、寻路、背包/容器操作都由外部协作者实现；核心只通过 GameClient 这一窄接口使用它们。
//! SimulatedClient 是一个内存世界实现，用于测试与未链接协议适配器时的离线运行。

pub mod sim;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub use crate::core::ClientError;
pub use sim::{ClientCall, SimWorld, SimulatedClient};

/// 连接参数（对应 [server] 配置段）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub version: String,
    pub auth: String,
}

/// 世界坐标
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    pub fn offset(&self, dx: f64, dy: f64, dz: f64) -> Point {
        Point::new(self.x + dx, self.y + dy, self.z + dz)
    }
}

/// 游戏模式（权限等级）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    Survival,
    Creative,
    Adventure,
    Spectator,
}

impl GameMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameMode::Survival => "survival",
            GameMode::Creative => "creative",
            GameMode::Adventure => "adventure",
            GameMode::Spectator => "spectator",
        }
    }
}

/// 客户端推送的事件
#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    Established,
    Lost { reason: String },
    Kicked { reason: String },
    Chat { sender: String, message: String },
    ModeChanged(GameMode),
    /// 休息结束（天亮或被唤醒）
    Woke,
}

/// 小动作
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Look { yaw: f32, pitch: f32 },
    Jump,
    Sneak(bool),
    Swing,
    Equip(String),
}

/// 世界中可交互对象的类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    RestObject,
    Container,
    Block,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorldObject {
    pub kind: ObjectKind,
    pub name: String,
    pub position: Point,
}

/// 放置方向（相对于脚下位置的水平偏移）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facing {
    North,
    South,
    East,
    West,
}

impl Facing {
    pub const ALL: [Facing; 4] = [Facing::North, Facing::South, Facing::East, Facing::West];

    pub fn offset(&self) -> (f64, f64) {
        match self {
            Facing::North => (0.0, -1.0),
            Facing::South => (0.0, 1.0),
            Facing::East => (1.0, 0.0),
            Facing::West => (-1.0, 0.0),
        }
    }
}

/// 已打开容器的句柄
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerHandle {
    pub id: u64,
    pub object: WorldObject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    Deposit,
    Withdraw,
}

/// 尝试进入休息的结果
#[derive(Debug, Clone, PartialEq)]
pub enum RestOutcome {
    Entered,
    Rejected(String),
}

/// 游戏客户端能力面
#[async_trait]
pub trait GameClient: Send + Sync {
    async fn connect(&self, options: &ServerOptions) -> Result<(), ClientError>;

    async fn disconnect(&self);

    /// 订阅事件；应在 connect 之前订阅，避免漏掉建立/断开事件
    fn subscribe(&self) -> broadcast::Receiver<GameEvent>;

    fn current_position(&self) -> Option<Point>;

    fn current_mode(&self) -> Option<GameMode>;

    /// 世界时间（0..24000 刻）
    fn time_of_day(&self) -> Option<u32>;

    /// 在 timeout 内移动到 target 的 tolerance 范围内；返回是否到达
    async fn move_to(&self, target: Point, tolerance: f64, timeout: Duration) -> Result<bool, ClientError>;

    async fn perform_action(&self, action: Action) -> Result<(), ClientError>;

    fn find_nearby(&self, kind: ObjectKind, max_distance: f64) -> Option<WorldObject>;

    fn inventory_count(&self, item: &str) -> u32;

    async fn place_object(&self, item: &str, facing: Facing) -> Result<WorldObject, ClientError>;

    async fn break_object(&self, object: &WorldObject) -> Result<(), ClientError>;

    async fn open_container(&self, object: &WorldObject) -> Result<ContainerHandle, ClientError>;

    /// 返回实际转移的数量
    async fn transfer(&self, container: &ContainerHandle, item: &str, direction: Transfer) -> Result<u32, ClientError>;

    async fn close_container(&self, container: ContainerHandle) -> Result<(), ClientError>;

    async fn enter_rest(&self, object: &WorldObject) -> Result<RestOutcome, ClientError>;

    async fn send_chat_command(&self, text: &str) -> Result<(), ClientError>;
}
