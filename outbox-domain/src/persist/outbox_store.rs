//! Outbox 存储协议
//!
//! 事件与投递历史的唯一事实来源。`save` 为幂等 upsert：
//! 新事件整体插入；已存在的事件只更新隔离标记并追加尚未持久化的投递记录。
//!
use crate::{error::OutboxResult as Result, outbox_event::OutboxEvent, persist::PayloadFilter};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// 插入或增量更新事件；重复保存同一事件不会产生重复数据
    async fn save(&self, event: &OutboxEvent) -> Result<()>;

    /// 未隔离且从未投递过的事件
    async fn get_all_unpublished_events(&self) -> Result<Vec<OutboxEvent>>;

    /// 未隔离且最近一次投递仍有失败的事件
    async fn get_all_failed_events(&self) -> Result<Vec<OutboxEvent>>;

    /// 指定 topic 下最近发生、且负载匹配过滤条件的事件负载
    async fn get_last_payload_for_topic_matching(
        &self,
        topic: &str,
        filter: &PayloadFilter,
    ) -> Result<Option<Value>>;

    async fn find_event(&self, event_id: &str) -> Result<Option<OutboxEvent>>;
}

#[async_trait]
impl<T> OutboxStore for Arc<T>
where
    T: OutboxStore + ?Sized,
{
    async fn save(&self, event: &OutboxEvent) -> Result<()> {
        (**self).save(event).await
    }

    async fn get_all_unpublished_events(&self) -> Result<Vec<OutboxEvent>> {
        (**self).get_all_unpublished_events().await
    }

    async fn get_all_failed_events(&self) -> Result<Vec<OutboxEvent>> {
        (**self).get_all_failed_events().await
    }

    async fn get_last_payload_for_topic_matching(
        &self,
        topic: &str,
        filter: &PayloadFilter,
    ) -> Result<Option<Value>> {
        (**self)
            .get_last_payload_for_topic_matching(topic, filter)
            .await
    }

    async fn find_event(&self, event_id: &str) -> Result<Option<OutboxEvent>> {
        (**self).find_event(event_id).await
    }
}
