//! 活动处理器注册表
//!
//! 每种活动实现 ActivityHandler（kind / run），HandlerRegistry 按种类注册与查找；
//! 调度器只依赖这个契约，不关心处理器内部如何操作世界。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::behavior::{
    ActivityKind, ActivityOutcome, ActivitySession, AgentContext, BuildHandler, ExploreHandler,
    IdleHandler, InteractHandler, SleepHandler,
};
use crate::core::ActivityError;

#[async_trait]
pub trait ActivityHandler: Send + Sync {
    fn kind(&self) -> ActivityKind;

    /// 运行到完成；每个挂起点都必须检查 session 的取消令牌
    async fn run(&self, ctx: &AgentContext, session: &ActivitySession) -> Result<ActivityOutcome, ActivityError>;
}

#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<ActivityKind, Arc<dyn ActivityHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 内置的五种活动
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(ExploreHandler);
        registry.register(BuildHandler);
        registry.register(IdleHandler);
        registry.register(InteractHandler);
        registry.register(SleepHandler);
        registry
    }

    /// 同种类重复注册时替换旧处理器
    pub fn register(&mut self, handler: impl ActivityHandler + 'static) {
        self.handlers.insert(handler.kind(), Arc::new(handler));
    }

    pub fn get(&self, kind: ActivityKind) -> Option<Arc<dyn ActivityHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn contains(&self, kind: ActivityKind) -> bool {
        self.handlers.contains_key(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_all_kinds() {
        let registry = HandlerRegistry::with_defaults();
        for kind in ActivityKind::ROTATION {
            assert!(registry.contains(kind));
        }
        assert!(registry.contains(ActivityKind::Sleep));
        assert_eq!(
            registry.get(ActivityKind::Explore).unwrap().kind(),
            ActivityKind::Explore
        );
    }
}
