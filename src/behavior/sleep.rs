//! 睡眠状态机
//!
//! Seeking（在范围内找床）→ Acquiring（没有：取得并尝试放置，方向随机、次数有界）
//! → Traveling（超出交互距离时走过去）→ Resting（上床，等待唤醒事件或超时）→ Done。
//! 任何终止失败都直接返回调度器，不在拿不到床时无限重试。

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::behavior::random::shuffle_with;
use crate::behavior::{
    fill_template, ActivityHandler, ActivityKind, ActivityOutcome, ActivitySession, AgentContext,
};
use crate::client::{Facing, GameEvent, ObjectKind, RestOutcome, WorldObject};
use crate::core::ActivityError;

/// 睡眠的终止结果
#[derive(Debug, Clone, PartialEq)]
pub enum SleepOutcome {
    Woke,
    TimedOut,
    NoRestObject,
    Unreachable,
    Rejected(String),
}

impl SleepOutcome {
    pub fn as_str(&self) -> &str {
        match self {
            SleepOutcome::Woke => "woke",
            SleepOutcome::TimedOut => "timed_out",
            SleepOutcome::NoRestObject => "no_rest_object",
            SleepOutcome::Unreachable => "unreachable",
            SleepOutcome::Rejected(_) => "rejected",
        }
    }

    pub fn is_rested(&self) -> bool {
        matches!(self, SleepOutcome::Woke)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SleepPhase {
    Seeking,
    Acquiring,
    Traveling(WorldObject),
    Resting(WorldObject),
    Done(SleepOutcome),
}

impl SleepPhase {
    pub fn name(&self) -> &'static str {
        match self {
            SleepPhase::Seeking => "seeking",
            SleepPhase::Acquiring => "acquiring",
            SleepPhase::Traveling(_) => "traveling",
            SleepPhase::Resting(_) => "resting",
            SleepPhase::Done(_) => "done",
        }
    }
}

/// 一次睡眠流程；借用上下文与会话，随会话一起结束
pub struct SleepCycle<'a> {
    ctx: &'a AgentContext,
    session: &'a ActivitySession,
}

impl<'a> SleepCycle<'a> {
    pub fn new(ctx: &'a AgentContext, session: &'a ActivitySession) -> Self {
        Self { ctx, session }
    }

    pub async fn run(&self) -> Result<SleepOutcome, ActivityError> {
        let mut phase = SleepPhase::Seeking;
        loop {
            tracing::debug!(phase = phase.name(), "Sleep cycle step");
            phase = self.step(phase).await?;
            if let SleepPhase::Done(outcome) = &phase {
                return Ok(outcome.clone());
            }
        }
    }

    /// 单步迁移
    pub async fn step(&self, phase: SleepPhase) -> Result<SleepPhase, ActivityError> {
        self.session.checkpoint()?;
        match phase {
            SleepPhase::Seeking => Ok(self.seek()),
            SleepPhase::Acquiring => self.acquire().await,
            SleepPhase::Traveling(object) => self.travel(object).await,
            SleepPhase::Resting(object) => self.rest(object).await,
            done @ SleepPhase::Done(_) => Ok(done),
        }
    }

    fn seek(&self) -> SleepPhase {
        let radius = self.ctx.config.sleep.search_radius;
        match self.ctx.client.find_nearby(ObjectKind::RestObject, radius) {
            Some(object) => {
                tracing::info!(bed = %object.name, "Found rest object nearby");
                SleepPhase::Traveling(object)
            }
            None => SleepPhase::Acquiring,
        }
    }

    async fn acquire(&self) -> Result<SleepPhase, ActivityError> {
        let cfg = &self.ctx.config.sleep;
        let item = cfg.bed_item.as_str();

        if self.ctx.client.inventory_count(item) == 0 {
            let command = fill_template(
                &cfg.give_command,
                &[("username", self.ctx.username()), ("item", item)],
            );
            if let Err(e) = self.ctx.client.send_chat_command(&command).await {
                tracing::warn!(error = %e, "Could not request a rest object");
                return Ok(SleepPhase::Done(SleepOutcome::NoRestObject));
            }
            self.session.pause(Duration::from_secs(1)).await?;
            if self.ctx.client.inventory_count(item) == 0 {
                tracing::warn!(item, "No rest object obtainable");
                return Ok(SleepPhase::Done(SleepOutcome::NoRestObject));
            }
        }

        let mut facings = Facing::ALL;
        shuffle_with(self.ctx.random.as_ref(), &mut facings);
        let attempts = cfg.placement_attempts.max(1) as usize;

        for facing in facings.iter().cycle().take(attempts) {
            self.session.checkpoint()?;
            match self.ctx.client.place_object(item, *facing).await {
                Ok(object) if object.kind == ObjectKind::RestObject => {
                    self.ctx.clock.touch();
                    tracing::info!(?facing, "Placed rest object");
                    return Ok(SleepPhase::Traveling(object));
                }
                Ok(object) => {
                    tracing::debug!(placed = %object.name, "Placed object is not restable");
                }
                Err(e) => tracing::debug!(?facing, error = %e, "Rest object placement failed"),
            }
            self.session.pause(Duration::from_millis(250)).await?;
        }

        tracing::warn!(attempts, "All rest object placements failed");
        Ok(SleepPhase::Done(SleepOutcome::NoRestObject))
    }

    async fn travel(&self, object: WorldObject) -> Result<SleepPhase, ActivityError> {
        let reach = self.ctx.config.sleep.interaction_distance;
        let here = self.ctx.client.current_position().unwrap_or_default();
        if here.distance(&object.position) <= reach {
            return Ok(SleepPhase::Resting(object));
        }
        if self.session.move_to(self.ctx, object.position, reach).await? {
            Ok(SleepPhase::Resting(object))
        } else {
            tracing::warn!(bed = %object.name, "Rest object unreachable");
            Ok(SleepPhase::Done(SleepOutcome::Unreachable))
        }
    }

    async fn rest(&self, object: WorldObject) -> Result<SleepPhase, ActivityError> {
        // 先订阅再上床，避免错过唤醒事件
        let mut events = self.ctx.client.subscribe();
        match self.ctx.client.enter_rest(&object).await? {
            RestOutcome::Rejected(reason) => {
                tracing::info!(%reason, "Rest rejected");
                return Ok(SleepPhase::Done(SleepOutcome::Rejected(reason)));
            }
            RestOutcome::Entered => {
                self.ctx.clock.touch();
                tracing::info!(bed = %object.name, "Resting");
            }
        }

        let timeout = Duration::from_secs(self.ctx.config.sleep.rest_timeout_secs);
        let cancel = self.session.cancel_token();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(ActivityError::Cancelled),
            _ = tokio::time::sleep(timeout) => SleepOutcome::TimedOut,
            woke = wait_for_wake(&mut events) => {
                if woke { SleepOutcome::Woke } else { SleepOutcome::TimedOut }
            }
        };
        self.ctx.clock.touch();
        Ok(SleepPhase::Done(outcome))
    }
}

/// 事件流关闭时返回 false
async fn wait_for_wake(events: &mut broadcast::Receiver<GameEvent>) -> bool {
    loop {
        match events.recv().await {
            Ok(GameEvent::Woke) => return true,
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return false,
        }
    }
}

/// 调度器眼中的睡眠活动
pub struct SleepHandler;

#[async_trait]
impl ActivityHandler for SleepHandler {
    fn kind(&self) -> ActivityKind {
        ActivityKind::Sleep
    }

    async fn run(&self, ctx: &AgentContext, session: &ActivitySession) -> Result<ActivityOutcome, ActivityError> {
        SleepCycle::new(ctx, session)
            .run()
            .await
            .map(ActivityOutcome::Slept)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::behavior::{ActionClock, BusyFlag, StdRandom};
    use crate::client::{ClientCall, GameClient, Point, SimulatedClient};
    use crate::config::AppConfig;
    use crate::core::{session_state, SessionState};
    use crate::observability::EventBus;

    async fn setup() -> (Arc<SimulatedClient>, AgentContext) {
        let config = AppConfig::default();
        let client = Arc::new(SimulatedClient::new());
        client.connect(&config.server.options()).await.unwrap();
        client.set_time(18_000);
        let (writer, view) = session_state();
        writer.set(SessionState::Active);
        let ctx = AgentContext {
            client: client.clone(),
            session: view,
            busy: BusyFlag::new().view(),
            clock: ActionClock::new(),
            random: Arc::new(StdRandom::seeded(3)),
            config: Arc::new(config),
            events: EventBus::new(),
        };
        (client, ctx)
    }

    fn sleep_session() -> ActivitySession {
        ActivitySession::new(ActivityKind::Sleep, CancellationToken::new(), true)
    }

    fn place_calls(client: &SimulatedClient) -> usize {
        client
            .calls()
            .iter()
            .filter(|c| matches!(c, ClientCall::Place { .. }))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_bed_travel_and_wake() {
        let (client, ctx) = setup().await;
        client.world().objects.push(WorldObject {
            kind: ObjectKind::RestObject,
            name: "white_bed".into(),
            position: Point::new(10.0, 64.0, 0.0),
        });

        let session = sleep_session();
        let outcome = SleepCycle::new(&ctx, &session).run().await.unwrap();
        assert_eq!(outcome, SleepOutcome::Woke);

        let calls = client.calls();
        assert!(calls.contains(&ClientCall::MoveTo(Point::new(10.0, 64.0, 0.0))));
        assert!(calls.contains(&ClientCall::EnterRest("white_bed".into())));
        assert_eq!(place_calls(&client), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_via_give_then_place() {
        let (client, ctx) = setup().await;
        let session = sleep_session();
        let cycle = SleepCycle::new(&ctx, &session);

        let phase = cycle.step(SleepPhase::Seeking).await.unwrap();
        assert_eq!(phase, SleepPhase::Acquiring);
        let phase = cycle.step(phase).await.unwrap();
        let SleepPhase::Traveling(bed) = phase.clone() else {
            panic!("Expected Traveling, got {phase:?}");
        };
        assert_eq!(bed.name, "red_bed");
        // 床就在脚边，不需要移动
        assert_eq!(cycle.step(phase).await.unwrap(), SleepPhase::Resting(bed));
        assert!(client
            .calls()
            .contains(&ClientCall::Chat("/give KeeperBot red_bed".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unobtainable_bed_gives_up() {
        let (client, ctx) = setup().await;
        client.world().grant_on_give = false;
        let session = sleep_session();
        let outcome = SleepCycle::new(&ctx, &session).run().await.unwrap();
        assert_eq!(outcome, SleepOutcome::NoRestObject);
        assert_eq!(place_calls(&client), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_placement_is_bounded() {
        let (client, ctx) = setup().await;
        {
            let mut world = client.world();
            world.placement_blocked = true;
            world.inventory.insert("red_bed".into(), 1);
        }
        let session = sleep_session();
        let outcome = SleepCycle::new(&ctx, &session).run().await.unwrap();
        assert_eq!(outcome, SleepOutcome::NoRestObject);
        assert_eq!(place_calls(&client), ctx.config.sleep.placement_attempts as usize);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rest_times_out_without_wake() {
        let (client, ctx) = setup().await;
        client.world().wake_after = None;
        client.world().inventory.insert("red_bed".into(), 1);
        let session = sleep_session();
        let outcome = SleepCycle::new(&ctx, &session).run().await.unwrap();
        assert_eq!(outcome, SleepOutcome::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rest_rejected() {
        let (client, ctx) = setup().await;
        {
            let mut world = client.world();
            world.rest_outcome = RestOutcome::Rejected("monsters nearby".into());
            world.inventory.insert("red_bed".into(), 1);
        }
        let session = sleep_session();
        let outcome = SleepCycle::new(&ctx, &session).run().await.unwrap();
        assert_eq!(outcome, SleepOutcome::Rejected("monsters nearby".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_resting() {
        let (client, ctx) = setup().await;
        client.world().wake_after = None;
        client.world().inventory.insert("red_bed".into(), 1);
        let token = CancellationToken::new();
        let session = ActivitySession::new(ActivityKind::Sleep, token.clone(), true);

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            token.cancel();
        });
        let result = SleepCycle::new(&ctx, &session).run().await;
        assert!(matches!(result, Err(ActivityError::Cancelled)));
        canceller.await.unwrap();
    }
}
