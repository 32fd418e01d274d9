//! Keeper - Rust 游戏世界常驻代理
//!
//! 入口：初始化日志、加载配置、启动健康检查与心跳，然后运行连接生命周期直到收到关闭信号。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use keeper::client::SimulatedClient;
use keeper::config::load_config;
use keeper::core::{KeeperBuilder, ShutdownManager, ShutdownReason};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖
    keeper::observability::init();

    let config_path = std::env::args().nth(1).map(Into::into);
    let config = load_config(config_path).context("Failed to load config")?;

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    // 未链接协议适配器时跑模拟世界，连同世界时钟
    tracing::warn!("No protocol adapter linked, using the simulated game client");
    let client = Arc::new(SimulatedClient::new());
    client.spawn_world_clock(shutdown.token());

    let health = config.health.clone();
    let keeper = KeeperBuilder::new(config)
        .with_client(client)
        .with_shutdown(shutdown.token())
        .build();
    let status = keeper.status();

    #[cfg(feature = "health")]
    if health.enabled {
        let port = health.port;
        let status = status.clone();
        let token = shutdown.token();
        tokio::spawn(async move {
            if let Err(e) = keeper::health::serve(port, status, token).await {
                tracing::warn!("Health check server failed: {}", e);
            }
        });
    }

    // 进程心跳：长时间等待服务器上线时也能看到进程仍在
    if health.heartbeat_secs > 0 {
        let period = Duration::from_secs(health.heartbeat_secs);
        let status = status.clone();
        let token = shutdown.token();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // 跳过启动后立即执行
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        tracing::info!(
                            session = status.session.get().as_str(),
                            activity = status.busy.current().map(|k| k.as_str()).unwrap_or("none"),
                            "Keeper process alive"
                        );
                    }
                }
            }
        });
    }

    let running = keeper.start();
    let result = running.wait().await;

    if let Err(e) = &result {
        shutdown.shutdown(ShutdownReason::FatalError(e.to_string()));
    } else if !shutdown.is_shutdown() {
        shutdown.shutdown(ShutdownReason::UserInitiated);
    }
    tracing::info!(reason = ?shutdown.reason(), "Keeper stopped");
    result.context("Keeper halted")?;
    Ok(())
}
