use super::Publication;
use bon::bon;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 隔离原因（由状态推导，不单独持久化）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuarantineReason {
    /// 创建时 topic 位于隔离列表中，从未自动投递
    Topic,
    /// 多次投递仍失败，自动重试已耗尽
    RetriesExhausted,
}

/// Outbox 事件
///
/// `id`/`topic`/`payload`/`occurred_at` 创建后不再变化；
/// `publications` 只追加、按 `published_at` 升序；
/// `was_quarantined` 只能由 false 变为 true。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    /// 事件唯一标识符
    id: String,
    /// 业务事件类型标签
    topic: String,
    /// 事件负载（本子系统不解析其语义）
    payload: Value,
    /// 事件发生时间
    occurred_at: DateTime<Utc>,
    /// 是否已隔离（不再自动投递）
    was_quarantined: bool,
    /// 投递历史
    publications: Vec<Publication>,
}

#[bon]
impl OutboxEvent {
    /// 组装事件；用于工厂创建以及存储层重建
    #[builder]
    pub fn new(
        #[builder(into)] id: String,
        #[builder(into)] topic: String,
        payload: Value,
        occurred_at: DateTime<Utc>,
        #[builder(default)] was_quarantined: bool,
        #[builder(default)] publications: Vec<Publication>,
    ) -> Self {
        let mut publications = publications;
        publications.sort_by_key(Publication::published_at);

        Self {
            id,
            topic,
            payload,
            occurred_at,
            was_quarantined,
            publications,
        }
    }
}

impl OutboxEvent {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn was_quarantined(&self) -> bool {
        self.was_quarantined
    }

    pub fn publications(&self) -> &[Publication] {
        &self.publications
    }

    pub fn last_publication(&self) -> Option<&Publication> {
        self.publications.last()
    }

    /// 尚未进行过任何投递尝试
    pub fn is_unpublished(&self) -> bool {
        self.publications.is_empty()
    }

    /// 最近一次尝试仍有订阅失败
    pub fn is_failing(&self) -> bool {
        self.last_publication()
            .is_some_and(Publication::has_failures)
    }

    /// 是否需要由爬虫继续投递
    pub fn needs_delivery(&self) -> bool {
        !self.was_quarantined && (self.is_unpublished() || self.is_failing())
    }

    pub fn quarantine_reason(&self) -> Option<QuarantineReason> {
        match (self.was_quarantined, self.publications.is_empty()) {
            (false, _) => None,
            (true, true) => Some(QuarantineReason::Topic),
            (true, false) => Some(QuarantineReason::RetriesExhausted),
        }
    }

    pub(crate) fn record_publication(&mut self, publication: Publication) {
        self.publications.push(publication);
    }

    pub(crate) fn quarantine(&mut self) {
        self.was_quarantined = true;
    }
}
