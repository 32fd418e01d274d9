//! 内存模拟客户端（用于测试，无需服务器）
//!
//! 世界状态放在 SimWorld 里，测试可以直接改写（时间、背包、移动是否成功等）并检查调用记录。
//! 断线后仍被调用的动作记为 ghost_calls，用来发现「对已断开会话继续操作」的问题。

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{
    Action, ClientError, ContainerHandle, Facing, GameClient, GameEvent, GameMode, ObjectKind,
    Point, RestOutcome, ServerOptions, Transfer, WorldObject,
};

/// 被记录下来的调用
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCall {
    Connect,
    Disconnect,
    MoveTo(Point),
    Action(Action),
    Place { item: String, facing: Facing },
    Break(String),
    OpenContainer(String),
    Transfer { item: String, direction: Transfer, count: u32 },
    CloseContainer,
    EnterRest(String),
    Chat(String),
}

/// 模拟世界状态
#[derive(Debug)]
pub struct SimWorld {
    pub connected: bool,
    /// 依次弹出作为 connect 的结果；为空时连接成功
    pub connect_script: VecDeque<Result<(), ClientError>>,
    pub connect_latency: Duration,
    pub position: Point,
    pub mode: GameMode,
    pub time_of_day: u32,
    pub objects: Vec<WorldObject>,
    pub inventory: HashMap<String, u32>,
    pub container_items: HashMap<String, u32>,
    /// false 时所有移动都会超时
    pub arrive: bool,
    /// 每秒移动格数
    pub speed: f64,
    pub rest_outcome: RestOutcome,
    /// 进入休息后多久推送 Woke；None 表示永不醒来
    pub wake_after: Option<Duration>,
    /// `/give` 指令是否生效
    pub grant_on_give: bool,
    /// `/gamemode` 指令是否生效
    pub apply_mode_commands: bool,
    pub placement_blocked: bool,
    pub calls: Vec<ClientCall>,
    pub ghost_calls: u32,
    pub connect_attempts: u32,
    next_container_id: u64,
}

impl Default for SimWorld {
    fn default() -> Self {
        Self {
            connected: false,
            connect_script: VecDeque::new(),
            connect_latency: Duration::from_millis(50),
            position: Point::new(0.0, 64.0, 0.0),
            mode: GameMode::Creative,
            time_of_day: 1000,
            objects: Vec::new(),
            inventory: HashMap::new(),
            container_items: HashMap::new(),
            arrive: true,
            speed: 8.0,
            rest_outcome: RestOutcome::Entered,
            wake_after: Some(Duration::from_secs(5)),
            grant_on_give: true,
            apply_mode_commands: true,
            placement_blocked: false,
            calls: Vec::new(),
            ghost_calls: 0,
            connect_attempts: 0,
            next_container_id: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimulatedClient {
    world: Arc<Mutex<SimWorld>>,
    events: broadcast::Sender<GameEvent>,
}

impl SimulatedClient {
    pub fn new() -> Self {
        Self::with_world(SimWorld::default())
    }

    pub fn with_world(world: SimWorld) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            world: Arc::new(Mutex::new(world)),
            events,
        }
    }

    /// 直接读写世界状态；不要跨 await 持有
    pub fn world(&self) -> MutexGuard<'_, SimWorld> {
        self.world.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn calls(&self) -> Vec<ClientCall> {
        self.world().calls.clone()
    }

    pub fn ghost_calls(&self) -> u32 {
        self.world().ghost_calls
    }

    pub fn set_time(&self, ticks: u32) {
        self.world().time_of_day = ticks % 24_000;
    }

    /// 模拟服务器侧断开
    pub fn drop_session(&self, reason: &str) {
        self.world().connected = false;
        let _ = self.events.send(GameEvent::Lost {
            reason: reason.to_string(),
        });
    }

    pub fn kick(&self, reason: &str) {
        self.world().connected = false;
        let _ = self.events.send(GameEvent::Kicked {
            reason: reason.to_string(),
        });
    }

    pub fn say(&self, sender: &str, message: &str) {
        let _ = self.events.send(GameEvent::Chat {
            sender: sender.to_string(),
            message: message.to_string(),
        });
    }

    /// 世界时钟：连接期间每秒推进 20 刻
    pub fn spawn_world_clock(&self, token: CancellationToken) -> JoinHandle<()> {
        let world = Arc::clone(&self.world);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let mut w = world.lock().unwrap_or_else(|p| p.into_inner());
                        if w.connected {
                            w.time_of_day = (w.time_of_day + 20) % 24_000;
                        }
                    }
                }
            }
        })
    }

    /// 记录一次调用；未连接时计为幽灵调用并拒绝
    fn record(&self, call: ClientCall) -> Result<(), ClientError> {
        let mut world = self.world();
        if !world.connected {
            world.ghost_calls += 1;
            return Err(ClientError::NotConnected);
        }
        world.calls.push(call);
        Ok(())
    }

    fn ensure_connected(&self) -> Result<(), ClientError> {
        if self.world().connected {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }
}

impl Default for SimulatedClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GameClient for SimulatedClient {
    async fn connect(&self, _options: &ServerOptions) -> Result<(), ClientError> {
        let latency = {
            let mut world = self.world();
            world.connect_attempts += 1;
            world.connect_latency
        };
        tokio::time::sleep(latency).await;

        let outcome = self.world().connect_script.pop_front().unwrap_or(Ok(()));
        outcome?;
        {
            let mut world = self.world();
            world.connected = true;
            world.calls.push(ClientCall::Connect);
        }
        let _ = self.events.send(GameEvent::Established);
        Ok(())
    }

    async fn disconnect(&self) {
        let mut world = self.world();
        world.connected = false;
        world.calls.push(ClientCall::Disconnect);
    }

    fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.events.subscribe()
    }

    fn current_position(&self) -> Option<Point> {
        let world = self.world();
        world.connected.then_some(world.position)
    }

    fn current_mode(&self) -> Option<GameMode> {
        let world = self.world();
        world.connected.then_some(world.mode)
    }

    fn time_of_day(&self) -> Option<u32> {
        let world = self.world();
        world.connected.then_some(world.time_of_day)
    }

    async fn move_to(&self, target: Point, tolerance: f64, timeout: Duration) -> Result<bool, ClientError> {
        self.record(ClientCall::MoveTo(target))?;
        let (arrive, travel) = {
            let world = self.world();
            let distance = (world.position.distance(&target) - tolerance).max(0.0);
            let speed = world.speed.max(0.1);
            (world.arrive, Duration::from_secs_f64(distance / speed))
        };

        if !arrive || travel > timeout {
            tokio::time::sleep(timeout).await;
            self.ensure_connected()?;
            return Ok(false);
        }

        tokio::time::sleep(travel).await;
        self.ensure_connected()?;
        self.world().position = target;
        Ok(true)
    }

    async fn perform_action(&self, action: Action) -> Result<(), ClientError> {
        self.record(ClientCall::Action(action))
    }

    fn find_nearby(&self, kind: ObjectKind, max_distance: f64) -> Option<WorldObject> {
        let world = self.world();
        if !world.connected {
            return None;
        }
        let here = world.position;
        world
            .objects
            .iter()
            .filter(|o| o.kind == kind && o.position.distance(&here) <= max_distance)
            .min_by(|a, b| {
                a.position
                    .distance(&here)
                    .total_cmp(&b.position.distance(&here))
            })
            .cloned()
    }

    fn inventory_count(&self, item: &str) -> u32 {
        self.world().inventory.get(item).copied().unwrap_or(0)
    }

    async fn place_object(&self, item: &str, facing: Facing) -> Result<WorldObject, ClientError> {
        self.record(ClientCall::Place {
            item: item.to_string(),
            facing,
        })?;
        let mut world = self.world();
        if world.placement_blocked {
            return Err(ClientError::Rejected("no space to place".into()));
        }
        let creative = world.mode == GameMode::Creative;
        let count = world.inventory.entry(item.to_string()).or_insert(0);
        if *count == 0 {
            return Err(ClientError::Rejected(format!("no {item} in inventory")));
        }
        if !creative {
            *count -= 1;
        }
        let (dx, dz) = facing.offset();
        let object = WorldObject {
            kind: if item.ends_with("bed") {
                ObjectKind::RestObject
            } else {
                ObjectKind::Block
            },
            name: item.to_string(),
            position: world.position.offset(dx, 0.0, dz),
        };
        world.objects.push(object.clone());
        Ok(object)
    }

    async fn break_object(&self, object: &WorldObject) -> Result<(), ClientError> {
        self.record(ClientCall::Break(object.name.clone()))?;
        let mut world = self.world();
        let before = world.objects.len();
        world.objects.retain(|o| o != object);
        if world.objects.len() == before {
            return Err(ClientError::Rejected(format!("{} not found", object.name)));
        }
        Ok(())
    }

    async fn open_container(&self, object: &WorldObject) -> Result<ContainerHandle, ClientError> {
        self.record(ClientCall::OpenContainer(object.name.clone()))?;
        let mut world = self.world();
        let id = world.next_container_id;
        world.next_container_id += 1;
        Ok(ContainerHandle {
            id,
            object: object.clone(),
        })
    }

    async fn transfer(&self, _container: &ContainerHandle, item: &str, direction: Transfer) -> Result<u32, ClientError> {
        self.ensure_connected()?;
        let count = {
            let mut guard = self.world();
            let world = &mut *guard;
            let (from, to) = match direction {
                Transfer::Deposit => (&mut world.inventory, &mut world.container_items),
                Transfer::Withdraw => (&mut world.container_items, &mut world.inventory),
            };
            let from = from.remove(item).unwrap_or(0);
            if from > 0 {
                *to.entry(item.to_string()).or_insert(0) += from;
            }
            from
        };
        self.record(ClientCall::Transfer {
            item: item.to_string(),
            direction,
            count,
        })?;
        Ok(count)
    }

    async fn close_container(&self, _container: ContainerHandle) -> Result<(), ClientError> {
        self.record(ClientCall::CloseContainer)
    }

    async fn enter_rest(&self, object: &WorldObject) -> Result<RestOutcome, ClientError> {
        self.record(ClientCall::EnterRest(object.name.clone()))?;
        let (outcome, wake_after) = {
            let world = self.world();
            (world.rest_outcome.clone(), world.wake_after)
        };
        if let (RestOutcome::Entered, Some(after)) = (&outcome, wake_after) {
            let world = Arc::clone(&self.world);
            let events = self.events.clone();
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                let still_connected = {
                    let mut w = world.lock().unwrap_or_else(|p| p.into_inner());
                    if w.connected {
                        w.time_of_day = 0;
                    }
                    w.connected
                };
                if still_connected {
                    let _ = events.send(GameEvent::Woke);
                }
            });
        }
        Ok(outcome)
    }

    async fn send_chat_command(&self, text: &str) -> Result<(), ClientError> {
        self.record(ClientCall::Chat(text.to_string()))?;
        let words: Vec<&str> = text.split_whitespace().collect();
        let mode_changed = {
            let mut world = self.world();
            match words.as_slice() {
                ["/give", _, item, ..] if world.grant_on_give => {
                    *world.inventory.entry(item.to_string()).or_insert(0) += 1;
                    None
                }
                ["/gamemode", mode, ..] if world.apply_mode_commands => {
                    let mode = match *mode {
                        "survival" => Some(GameMode::Survival),
                        "creative" => Some(GameMode::Creative),
                        "adventure" => Some(GameMode::Adventure),
                        "spectator" => Some(GameMode::Spectator),
                        _ => None,
                    };
                    if let Some(mode) = mode {
                        world.mode = mode;
                    }
                    mode
                }
                _ => None,
            }
        };
        if let Some(mode) = mode_changed {
            let _ = self.events.send(GameEvent::ModeChanged(mode));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> ServerOptions {
        ServerOptions {
            host: "localhost".into(),
            port: 25565,
            username: "keeper".into(),
            version: "1.20".into(),
            auth: "offline".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_scripted_connect_then_success() {
        let client = SimulatedClient::new();
        client
            .world()
            .connect_script
            .push_back(Err(ClientError::Refused("offline".into())));

        assert!(client.connect(&options()).await.is_err());
        assert!(client.time_of_day().is_none());
        assert!(client.connect(&options()).await.is_ok());
        assert_eq!(client.time_of_day(), Some(1000));
        assert_eq!(client.world().connect_attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_actions_after_drop_are_ghost_calls() {
        let client = SimulatedClient::new();
        client.connect(&options()).await.unwrap();
        client.perform_action(Action::Jump).await.unwrap();
        client.drop_session("reset");
        assert!(client.perform_action(Action::Jump).await.is_err());
        assert_eq!(client.ghost_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_give_and_place_bed() {
        let client = SimulatedClient::new();
        client.connect(&options()).await.unwrap();
        client.world().mode = GameMode::Survival;
        client.send_chat_command("/give keeper red_bed").await.unwrap();
        assert_eq!(client.inventory_count("red_bed"), 1);

        let bed = client.place_object("red_bed", Facing::East).await.unwrap();
        assert_eq!(bed.kind, ObjectKind::RestObject);
        assert_eq!(client.inventory_count("red_bed"), 0);
        assert_eq!(client.find_nearby(ObjectKind::RestObject, 4.0), Some(bed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_timeout_when_stalled() {
        let client = SimulatedClient::new();
        client.connect(&options()).await.unwrap();
        client.world().arrive = false;
        let arrived = client
            .move_to(Point::new(10.0, 64.0, 0.0), 1.0, Duration::from_secs(3))
            .await
            .unwrap();
        assert!(!arrived);
        assert_eq!(client.world().position, Point::new(0.0, 64.0, 0.0));
    }
}
