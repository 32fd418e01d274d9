//! Keeper - Rust 游戏世界常驻代理
//!
//! 模块划分：
//! - **behavior**: 活动种类、单飞调度器、活动处理器、睡眠状态机、可注入随机源
//! - **client**: 外部游戏客户端抽象（GameClient）与内存模拟世界
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、退避、会话状态、连接状态机、会话监管、优雅关闭、装配
//! - **health**: 健康检查 HTTP 端点（feature = "health"）
//! - **observability**: 日志初始化与结构化生命周期事件
//! - **watchdog**: 防挂机与游戏模式守护

pub mod behavior;
pub mod client;
pub mod config;
pub mod core;
#[cfg(feature = "health")]
pub mod health;
pub mod observability;
pub mod watchdog;

pub use crate::core::{Keeper, KeeperBuilder, KeeperError};
