//! 订阅注册表（SubscriptionRegistry）
//!
//! 进程内的 topic → 订阅 ID → 处理器映射，在进程启动时显式构造并注入总线。
//! 同一 (topic, 订阅 ID) 至多一个处理器，重复注册视为受控覆盖。
//! 订阅 ID 的唯一性由调用方保证，这里不做校验。
//!
use super::EventHandler;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Default)]
pub struct SubscriptionRegistry {
    by_topic: DashMap<String, BTreeMap<String, Arc<dyn EventHandler>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册处理器，返回被覆盖的旧处理器
    pub fn subscribe(
        &self,
        topic: &str,
        subscription_id: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Option<Arc<dyn EventHandler>> {
        let replaced = self
            .by_topic
            .entry(topic.to_string())
            .or_default()
            .insert(subscription_id.to_string(), handler);

        if replaced.is_some() {
            tracing::warn!(topic, subscription_id, "overwriting existing subscription");
        }
        replaced
    }

    pub fn unsubscribe(&self, topic: &str, subscription_id: &str) -> Option<Arc<dyn EventHandler>> {
        self.by_topic
            .get_mut(topic)
            .and_then(|mut handlers| handlers.remove(subscription_id))
    }

    /// 某 topic 当前注册的全部订阅 ID（升序）
    pub fn subscriptions(&self, topic: &str) -> Vec<String> {
        self.by_topic
            .get(topic)
            .map(|handlers| handlers.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn handler(&self, topic: &str, subscription_id: &str) -> Option<Arc<dyn EventHandler>> {
        self.by_topic
            .get(topic)
            .and_then(|handlers| handlers.get(subscription_id).cloned())
    }
}
