//! 内置活动：探索、建造、发呆、容器交互
//!
//! 每个处理器只做「一个有界单元」的事；真正的移动、放置、容器操作由 GameClient 完成。

use std::time::Duration;

use async_trait::async_trait;

use crate::behavior::random::shuffle_with;
use crate::behavior::{
    ActivityHandler, ActivityKind, ActivityOutcome, ActivitySession, AgentContext,
};
use crate::client::{Action, ContainerHandle, Facing, ObjectKind, Transfer};
use crate::core::{ActivityError, ClientError};

const ARRIVAL_TOLERANCE: f64 = 1.5;

fn random_look(ctx: &AgentContext) -> Action {
    Action::Look {
        yaw: ctx.random.range_f64(-180.0, 180.0) as f32,
        pitch: ctx.random.range_f64(-30.0, 30.0) as f32,
    }
}

/// 在探索半径内随机走几个路点，偶尔四处看看
pub struct ExploreHandler;

#[async_trait]
impl ActivityHandler for ExploreHandler {
    fn kind(&self) -> ActivityKind {
        ActivityKind::Explore
    }

    async fn run(&self, ctx: &AgentContext, session: &ActivitySession) -> Result<ActivityOutcome, ActivityError> {
        let origin = ctx.client.current_position().ok_or(ClientError::NotConnected)?;
        let radius = ctx.config.behavior.exploration_radius.max(1.0);
        let waypoints = ctx.random.range_u64(1, 3);

        for i in 0..waypoints {
            if session.should_wind_down(ctx) {
                tracing::info!(waypoint = i, "Night reached, winding down exploration");
                return Ok(ActivityOutcome::WoundDown);
            }

            let target = origin.offset(
                ctx.random.range_f64(-radius, radius),
                0.0,
                ctx.random.range_f64(-radius, radius),
            );
            tracing::debug!(?target, "Exploring toward waypoint");
            if !session.move_to(ctx, target, ARRIVAL_TOLERANCE).await? {
                return Err(ActivityError::Unreachable(ctx.config.behavior.move_timeout()));
            }

            if ctx.random.unit() < 0.5 {
                session.act(ctx, random_look(ctx)).await?;
            }
            let linger = ctx.random.duration_between(Duration::from_millis(500), Duration::from_secs(3));
            session.pause(linger).await?;
        }
        Ok(ActivityOutcome::Completed)
    }
}

/// 在身边放几块方块，停一会儿再拆掉，不留下痕迹
pub struct BuildHandler;

#[async_trait]
impl ActivityHandler for BuildHandler {
    fn kind(&self) -> ActivityKind {
        ActivityKind::Build
    }

    async fn run(&self, ctx: &AgentContext, session: &ActivitySession) -> Result<ActivityOutcome, ActivityError> {
        let behavior = &ctx.config.behavior;
        if !behavior.building_enabled {
            return Ok(ActivityOutcome::Skipped("building disabled".into()));
        }
        let block = behavior.build_block.as_str();
        if ctx.client.inventory_count(block) == 0 {
            return Err(ActivityError::MissingItem(block.to_string()));
        }

        session.act(ctx, Action::Equip(block.to_string())).await?;

        let mut facings = Facing::ALL;
        shuffle_with(ctx.random.as_ref(), &mut facings);
        let count = ctx.random.range_u64(1, 3) as usize;

        let mut placed = Vec::with_capacity(count);
        for facing in facings.into_iter().take(count) {
            session.checkpoint()?;
            match ctx.client.place_object(block, facing).await {
                Ok(object) => {
                    ctx.clock.touch();
                    placed.push(object);
                }
                Err(e) => tracing::debug!(?facing, error = %e, "Placement rejected"),
            }
            session
                .pause(ctx.random.duration_between(Duration::from_millis(300), Duration::from_millis(1200)))
                .await?;
        }

        if placed.is_empty() {
            return Err(ActivityError::Client(ClientError::Rejected(
                "no block could be placed".into(),
            )));
        }

        session
            .pause(ctx.random.duration_between(Duration::from_secs(2), Duration::from_secs(6)))
            .await?;

        for object in placed.iter().rev() {
            session.checkpoint()?;
            ctx.client.break_object(object).await?;
            ctx.clock.touch();
        }
        Ok(ActivityOutcome::Completed)
    }
}

/// 原地停留一段时间，偶尔转头
pub struct IdleHandler;

#[async_trait]
impl ActivityHandler for IdleHandler {
    fn kind(&self) -> ActivityKind {
        ActivityKind::Idle
    }

    async fn run(&self, ctx: &AgentContext, session: &ActivitySession) -> Result<ActivityOutcome, ActivityError> {
        let glances = ctx.random.range_u64(1, 3);
        for _ in 0..glances {
            session
                .pause(ctx.random.duration_between(Duration::from_secs(2), Duration::from_secs(8)))
                .await?;
            session.act(ctx, random_look(ctx)).await?;
        }
        Ok(ActivityOutcome::Completed)
    }
}

/// 找最近的容器，按存入/取出清单转移物品
pub struct InteractHandler;

#[async_trait]
impl ActivityHandler for InteractHandler {
    fn kind(&self) -> ActivityKind {
        ActivityKind::Interact
    }

    async fn run(&self, ctx: &AgentContext, session: &ActivitySession) -> Result<ActivityOutcome, ActivityError> {
        let behavior = &ctx.config.behavior;
        if !behavior.chest_interaction_enabled {
            return Ok(ActivityOutcome::Skipped("container interaction disabled".into()));
        }
        let Some(container) = ctx
            .client
            .find_nearby(ObjectKind::Container, behavior.container_search_radius)
        else {
            return Ok(ActivityOutcome::Skipped("no container nearby".into()));
        };

        let here = ctx.client.current_position().unwrap_or_default();
        let reach = ctx.config.sleep.interaction_distance;
        if here.distance(&container.position) > reach
            && !session.move_to(ctx, container.position, reach).await?
        {
            return Err(ActivityError::Unreachable(behavior.move_timeout()));
        }

        session.checkpoint()?;
        let handle = ctx.client.open_container(&container).await?;
        ctx.clock.touch();

        let moved = transfer_lists(ctx, session, &handle).await;
        // 无论转移是否出错都要关上
        let closed = ctx.client.close_container(handle).await;
        let (deposited, withdrawn) = moved?;
        closed?;

        tracing::info!(
            container = %container.name,
            deposited,
            withdrawn,
            "Container interaction finished"
        );
        Ok(ActivityOutcome::Completed)
    }
}

async fn transfer_lists(
    ctx: &AgentContext,
    session: &ActivitySession,
    handle: &ContainerHandle,
) -> Result<(u32, u32), ActivityError> {
    let behavior = &ctx.config.behavior;
    let mut deposited = 0;
    for item in &behavior.deposit_list {
        session.checkpoint()?;
        deposited += ctx.client.transfer(handle, item, Transfer::Deposit).await?;
    }
    let mut withdrawn = 0;
    for item in &behavior.withdraw_list {
        session.checkpoint()?;
        withdrawn += ctx.client.transfer(handle, item, Transfer::Withdraw).await?;
    }
    Ok((deposited, withdrawn))
}
