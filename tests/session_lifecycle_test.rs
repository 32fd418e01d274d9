//! 会话生命周期集成测试：单飞互斥、夜间抢占、断线拆除

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use keeper::behavior::{
    ActivityHandler, ActivityKind, ActivityOutcome, ActivitySession, AgentContext, BuildHandler,
    ExploreHandler, HandlerRegistry, IdleHandler, InteractHandler, SleepHandler, StdRandom,
};
use keeper::client::{ClientCall, SimulatedClient};
use keeper::config::AppConfig;
use keeper::core::{ActivityError, KeeperBuilder, SessionState};
use keeper::observability::LifecycleEvent;
use tokio::sync::broadcast::error::TryRecvError;

/// 统计同时存活的活动数
#[derive(Default)]
struct Overlap {
    live: AtomicUsize,
    max: AtomicUsize,
    total: AtomicUsize,
}

/// 处理器 future 被丢弃时也要减回去
struct LiveGuard<'a>(&'a Overlap);

impl Drop for LiveGuard<'_> {
    fn drop(&mut self) {
        self.0.live.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Exclusive<H> {
    inner: H,
    overlap: Arc<Overlap>,
}

#[async_trait]
impl<H: ActivityHandler> ActivityHandler for Exclusive<H> {
    fn kind(&self) -> ActivityKind {
        self.inner.kind()
    }

    async fn run(&self, ctx: &AgentContext, session: &ActivitySession) -> Result<ActivityOutcome, ActivityError> {
        let now = self.overlap.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.overlap.max.fetch_max(now, Ordering::SeqCst);
        self.overlap.total.fetch_add(1, Ordering::SeqCst);
        let _live = LiveGuard(&self.overlap);
        self.inner.run(ctx, session).await
    }
}

fn exclusive_registry(overlap: &Arc<Overlap>) -> HandlerRegistry {
    let mut handlers = HandlerRegistry::new();
    handlers.register(Exclusive {
        inner: ExploreHandler,
        overlap: overlap.clone(),
    });
    handlers.register(Exclusive {
        inner: BuildHandler,
        overlap: overlap.clone(),
    });
    handlers.register(Exclusive {
        inner: IdleHandler,
        overlap: overlap.clone(),
    });
    handlers.register(Exclusive {
        inner: InteractHandler,
        overlap: overlap.clone(),
    });
    handlers.register(Exclusive {
        inner: SleepHandler,
        overlap: overlap.clone(),
    });
    handlers
}

fn fast_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.watchdog.idle_interval_ms = 500;
    config.watchdog.idle_threshold_range_ms.min = 100;
    config.watchdog.idle_threshold_range_ms.max = 2_000;
    config.watchdog.mode_interval_ms = 1_000;
    config.backoff.base_ms = 5_000;
    config
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_triggers_never_overlap_sessions() {
    let client = Arc::new(SimulatedClient::new());
    client
        .world()
        .inventory
        .insert("cobblestone".to_string(), 64);
    let overlap = Arc::new(Overlap::default());

    let keeper = KeeperBuilder::new(fast_config())
        .with_client(client.clone())
        .with_random(Arc::new(StdRandom::seeded(7)))
        .with_handlers(exclusive_registry(&overlap))
        .build();
    let status = keeper.status();
    let running = keeper.start();

    // 聊天消息在活动进行中不断到达，同时世界时钟推进到夜晚
    let clock = client.spawn_world_clock(Default::default());
    for i in 0..2_000u32 {
        tokio::time::sleep(Duration::from_millis(300)).await;
        client.say("steve", "hello");
        if i == 1_000 {
            client.drop_session("connection reset");
        }
        assert!(overlap.live.load(Ordering::SeqCst) <= 1);
    }

    running.stop();
    running.wait().await.unwrap();
    clock.abort();

    assert_eq!(overlap.max.load(Ordering::SeqCst), 1);
    assert!(overlap.total.load(Ordering::SeqCst) > 5);
    assert_eq!(status.session.get(), SessionState::Disconnected);
    assert!(!status.busy.is_busy());
}

/// 跑到一半时入夜的探索
struct DuskExplore {
    client: Arc<SimulatedClient>,
}

#[async_trait]
impl ActivityHandler for DuskExplore {
    fn kind(&self) -> ActivityKind {
        ActivityKind::Explore
    }

    async fn run(&self, ctx: &AgentContext, session: &ActivitySession) -> Result<ActivityOutcome, ActivityError> {
        session.pause(Duration::from_secs(2)).await?;
        self.client.set_time(14_000);
        if session.should_wind_down(ctx) {
            return Ok(ActivityOutcome::WoundDown);
        }
        session.pause(Duration::from_secs(2)).await?;
        Ok(ActivityOutcome::Completed)
    }
}

#[tokio::test(start_paused = true)]
async fn test_nightfall_mid_explore_schedules_sleep_next() {
    let client = Arc::new(SimulatedClient::new());
    let mut handlers = HandlerRegistry::new();
    handlers.register(DuskExplore {
        client: client.clone(),
    });
    handlers.register(SleepHandler);

    let keeper = KeeperBuilder::new(AppConfig::default())
        .with_client(client.clone())
        .with_random(Arc::new(StdRandom::seeded(1)))
        .with_handlers(handlers)
        .build();
    let mut events = keeper.status().events.subscribe();
    let running = keeper.start();

    let mut sequence = Vec::new();
    let collect = async {
        while sequence.len() < 4 {
            match events.recv().await {
                Ok(LifecycleEvent::ActivityStarted { kind, .. }) => sequence.push(format!("start:{kind}")),
                Ok(LifecycleEvent::ActivityEnded { kind, outcome, .. }) => {
                    sequence.push(format!("end:{kind}:{outcome}"))
                }
                Ok(_) => {}
                Err(e) => panic!("event stream broke: {e}"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(600), collect)
        .await
        .unwrap();

    assert_eq!(
        sequence,
        vec![
            "start:explore".to_string(),
            "end:explore:wound_down".to_string(),
            "start:sleep".to_string(),
            "end:sleep:slept: woke".to_string(),
        ]
    );
    assert!(client
        .calls()
        .iter()
        .any(|c| matches!(c, ClientCall::EnterRest(_))));

    running.stop();
    running.wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_session_loss_stops_all_actions_until_reconnect() {
    let client = Arc::new(SimulatedClient::new());
    let mut config = AppConfig::default();
    config.backoff.base_ms = 5_000;
    let keeper = KeeperBuilder::new(config)
        .with_client(client.clone())
        .with_random(Arc::new(StdRandom::seeded(3)))
        .build();
    let status = keeper.status();
    let mut events = status.events.subscribe();
    let running = keeper.start();

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(status.session.is_active());

    client.drop_session("connection reset");
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(status.session.get(), SessionState::Disconnected);
    assert!(!status.busy.is_busy());

    // 退避期间（base 5s）不应再有任何动作落到断开的连接上
    let ghosts = client.ghost_calls();
    let calls = client.calls().len();
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(client.ghost_calls(), ghosts);
    assert_eq!(client.calls().len(), calls);

    // 退避结束后重新连上，活动恢复
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(status.session.is_active());

    let mut saw_retry = false;
    let mut established = 0;
    loop {
        match events.try_recv() {
            Ok(LifecycleEvent::RetryScheduled { attempt, delay_ms, .. }) => {
                assert_eq!((attempt, delay_ms), (1, 5_000));
                saw_retry = true;
            }
            Ok(LifecycleEvent::SessionEstablished { .. }) => established += 1,
            Ok(_) | Err(TryRecvError::Lagged(_)) => {}
            Err(_) => break,
        }
    }
    assert!(saw_retry);
    assert_eq!(established, 2);

    running.stop();
    running.wait().await.unwrap();
}
