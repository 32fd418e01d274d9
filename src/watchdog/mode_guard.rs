//! 模式守护：记录模式变化，掉出要求的模式时发一次纠正指令
//!
//! 发完即走，不等待生效；下一个 tick 重新核对，仍不对就再发一次。

use async_trait::async_trait;

use crate::behavior::{fill_template, AgentContext};
use crate::client::GameMode;
use crate::core::ClientError;
use crate::watchdog::{TickOutcome, WatchdogCheck};

#[derive(Debug, Default)]
pub struct ModeGuard {
    last_seen: Option<GameMode>,
}

impl ModeGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_seen(&self) -> Option<GameMode> {
        self.last_seen
    }
}

#[async_trait]
impl WatchdogCheck for ModeGuard {
    fn name(&self) -> &'static str {
        "mode_guard"
    }

    async fn tick(&mut self, ctx: &AgentContext) -> Result<TickOutcome, ClientError> {
        let Some(mode) = ctx.client.current_mode() else {
            return Ok(TickOutcome::Quiet);
        };

        if self.last_seen != Some(mode) {
            match self.last_seen {
                Some(previous) => tracing::info!(
                    from = previous.as_str(),
                    to = mode.as_str(),
                    "Game mode changed"
                ),
                None => tracing::info!(mode = mode.as_str(), "Game mode observed"),
            }
            self.last_seen = Some(mode);
        }

        let cfg = &ctx.config.watchdog;
        if mode == cfg.required_mode || !cfg.enforce_mode {
            return Ok(TickOutcome::Quiet);
        }

        let command = fill_template(
            &cfg.mode_command,
            &[
                ("mode", cfg.required_mode.as_str()),
                ("username", ctx.username()),
            ],
        );
        ctx.client.send_chat_command(&command).await?;
        tracing::warn!(
            current = mode.as_str(),
            required = cfg.required_mode.as_str(),
            "Requested game mode correction"
        );
        Ok(TickOutcome::Corrected(format!(
            "{} -> {}",
            mode.as_str(),
            cfg.required_mode.as_str()
        )))
    }
}
