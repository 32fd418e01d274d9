//! 健康检查端点（托管平台探活）
//!
//! - GET /health：JSON，包含会话状态与当前活动
//! - 其他路径：纯文本存活提示

use std::net::SocketAddr;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::core::KeeperStatus;

const SERVICE_NAME: &str = "keeper";

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub service: &'static str,
    pub timestamp: String,
    pub session: &'static str,
    pub activity: Option<&'static str>,
    pub uptime_secs: i64,
}

impl HealthReport {
    pub fn from_status(status: &KeeperStatus) -> Self {
        Self {
            status: "ok",
            service: SERVICE_NAME,
            timestamp: Utc::now().to_rfc3339(),
            session: status.session.get().as_str(),
            activity: status.busy.current().map(|k| k.as_str()),
            uptime_secs: (Utc::now() - status.started_at).num_seconds(),
        }
    }
}

pub fn router(status: KeeperStatus) -> Router {
    Router::new()
        .route("/health", get(health))
        .fallback(|| async { "Keeper is running" })
        .with_state(status)
}

async fn health(State(status): State<KeeperStatus>) -> Json<HealthReport> {
    Json(HealthReport::from_status(&status))
}

/// 在 port 上提供健康检查，直到 token 被取消
pub async fn serve(port: u16, status: KeeperStatus, token: CancellationToken) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Health check server: http://{}/health", addr);
    axum::serve(listener, router(status))
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
}
