//! 事件工厂（EventFactory）
//!
//! 由用例调用，构造不可变的 `OutboxEvent`。ID 与时间均来自注入的协作者，
//! 便于在测试中得到确定的结果；隔离 topic 集合在构造时给定，
//! 命中的事件在创建时即被标记为已隔离，永远不会被自动投递。
//!
use crate::error::OutboxResult;
use crate::outbox_event::{OutboxEvent, Publication};
use bon::Builder;
use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// 事件 ID 生成器
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// 时钟
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// 基于 UUID v4 的 ID 生成器
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// 系统时钟
///
/// 截断到微秒，与 Postgres `TIMESTAMPTZ` 的精度一致，
/// 保证 `published_at` 作为投递身份在持久化往返后仍然相等。
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now().trunc_subsecs(6)
    }
}

#[derive(Builder)]
pub struct EventFactory {
    #[builder(default = Arc::new(UuidGenerator) as Arc<dyn IdGenerator>)]
    id_generator: Arc<dyn IdGenerator>,
    #[builder(default = Arc::new(SystemClock) as Arc<dyn Clock>)]
    clock: Arc<dyn Clock>,
    /// 永不自动投递的 topic
    #[builder(default, into)]
    quarantined_topics: HashSet<String>,
}

impl Default for EventFactory {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl EventFactory {
    /// 创建新事件；`existing_publications` 通常为空
    pub fn create_new_event(
        &self,
        topic: &str,
        payload: Value,
        existing_publications: Vec<Publication>,
    ) -> OutboxEvent {
        OutboxEvent::builder()
            .id(self.id_generator.next_id())
            .topic(topic)
            .payload(payload)
            .occurred_at(self.clock.now())
            .was_quarantined(self.is_quarantined_topic(topic))
            .publications(existing_publications)
            .build()
    }

    /// 以任意可序列化负载创建尚未投递的事件
    pub fn create_event<P>(&self, topic: &str, payload: &P) -> OutboxResult<OutboxEvent>
    where
        P: Serialize + ?Sized,
    {
        let payload = serde_json::to_value(payload)?;
        Ok(self.create_new_event(topic, payload, Vec::new()))
    }

    pub fn is_quarantined_topic(&self, topic: &str) -> bool {
        self.quarantined_topics.contains(topic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{SequentialIds, SteppingClock};
    use chrono::TimeZone;
    use serde_json::json;

    fn factory() -> EventFactory {
        EventFactory::builder()
            .id_generator(Arc::new(SequentialIds::new("evt")))
            .clock(Arc::new(SteppingClock::starting_at(
                Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            )))
            .quarantined_topics(["quote.rejected".to_string()])
            .build()
    }

    #[test]
    fn deterministic_with_injected_collaborators() {
        let f = factory();
        let a = f.create_new_event("quote.accepted", json!({"quote": 1}), vec![]);
        let b = f.create_new_event("quote.accepted", json!({"quote": 2}), vec![]);

        assert_eq!(a.id(), "evt-1");
        assert_eq!(b.id(), "evt-2");
        assert_eq!(a.occurred_at(), Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        assert!(b.occurred_at() > a.occurred_at());
        assert!(!a.was_quarantined());
        assert!(a.is_unpublished());
    }

    #[test]
    fn quarantined_topic_is_flagged_at_creation() {
        let f = factory();
        let e = f.create_new_event("quote.rejected", json!({}), vec![]);
        assert!(e.was_quarantined());
        assert!(!e.needs_delivery());
    }

    #[test]
    fn keeps_existing_publications() {
        let f = factory();
        let at = Utc.timestamp_opt(1, 0).unwrap();
        let e = f.create_new_event("t", json!(null), vec![Publication::succeeded(at)]);
        assert_eq!(e.publications(), &[Publication::succeeded(at)]);
    }

    #[test]
    fn create_event_serializes_payload() {
        #[derive(Serialize)]
        struct Invoice {
            number: u32,
        }
        let e = factory()
            .create_event("invoice.sent", &Invoice { number: 7 })
            .unwrap();
        assert_eq!(e.payload(), &json!({"number": 7}));
    }

    #[test]
    fn system_clock_has_microsecond_precision() {
        let now = SystemClock.now();
        assert_eq!(now.timestamp_subsec_nanos() % 1_000, 0);
    }
}
