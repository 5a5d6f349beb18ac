//! 关系投影的行折叠
//!
//! 事件表、投递表与失败表左连接后得到的扁平行，在这里重新组装为
//! 带有序投递历史的 `OutboxEvent`。折叠是纯函数，与查询方式无关：
//! - 按事件 ID 分组，保持首次出现的顺序；
//! - `published_at` 为空表示该事件尚无投递；
//! - 相同 `published_at` 的行合并为同一次投递，累积失败；
//! - `subscription_id` 为空表示该次投递没有失败（左连接的空列）；
//! - 投递按时间升序，失败按订阅去重。
//!
use crate::outbox_event::{Failure, OutboxEvent, Publication};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// 三表左连接的一行
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxRow {
    pub event_id: String,
    pub occurred_at: DateTime<Utc>,
    pub was_quarantined: bool,
    pub topic: String,
    pub payload: Value,
    pub published_at: Option<DateTime<Utc>>,
    pub subscription_id: Option<String>,
    pub error_message: Option<String>,
}

struct PartialEvent {
    id: String,
    topic: String,
    payload: Value,
    occurred_at: DateTime<Utc>,
    was_quarantined: bool,
    publications: BTreeMap<DateTime<Utc>, Vec<Failure>>,
}

impl PartialEvent {
    fn from_row(row: &OutboxRow) -> Self {
        Self {
            id: row.event_id.clone(),
            topic: row.topic.clone(),
            payload: row.payload.clone(),
            occurred_at: row.occurred_at,
            was_quarantined: row.was_quarantined,
            publications: BTreeMap::new(),
        }
    }

    fn absorb(&mut self, row: OutboxRow) {
        let Some(published_at) = row.published_at else {
            return;
        };
        let failures = self.publications.entry(published_at).or_default();
        if let Some(subscription_id) = row.subscription_id {
            failures.push(Failure::new(
                subscription_id,
                row.error_message.unwrap_or_default(),
            ));
        }
    }

    fn finish(self) -> OutboxEvent {
        let publications = self
            .publications
            .into_iter()
            .map(|(at, failures)| Publication::new(at, failures))
            .collect();

        OutboxEvent::builder()
            .id(self.id)
            .topic(self.topic)
            .payload(self.payload)
            .occurred_at(self.occurred_at)
            .was_quarantined(self.was_quarantined)
            .publications(publications)
            .build()
    }
}

/// 将连接行折叠为事件列表
pub fn fold_rows(rows: impl IntoIterator<Item = OutboxRow>) -> Vec<OutboxEvent> {
    let mut order: Vec<PartialEvent> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for row in rows {
        let slot = match index.get(&row.event_id) {
            Some(&slot) => slot,
            None => {
                order.push(PartialEvent::from_row(&row));
                index.insert(row.event_id.clone(), order.len() - 1);
                order.len() - 1
            }
        };
        order[slot].absorb(row);
    }

    order.into_iter().map(PartialEvent::finish).collect()
}
