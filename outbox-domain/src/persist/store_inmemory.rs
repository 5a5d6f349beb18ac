//! 内存版 Outbox 存储（InMemoryOutboxStore）
//!
//! 以与关系投影相同的三张表（事件/投递/失败）保存数据，读取时同样先做
//! 左连接再经 `fold_rows` 折叠，因此写入的增量逻辑与读取的重建逻辑
//! 都能在没有数据库的情况下被完整验证。典型用途：测试、示例与本地开发。
//!
use crate::error::OutboxResult as Result;
use crate::outbox_event::{OutboxEvent, Publication};
use crate::persist::{OutboxRow, OutboxStore, PayloadFilter, diff_publications, fold_rows};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;

struct EventRecord {
    id: String,
    occurred_at: DateTime<Utc>,
    was_quarantined: bool,
    topic: String,
    payload: Value,
}

struct PublicationRecord {
    id: u64,
    event_id: String,
    published_at: DateTime<Utc>,
}

struct FailureRecord {
    publication_id: u64,
    subscription_id: String,
    error_message: String,
}

#[derive(Default)]
struct Tables {
    events: Vec<EventRecord>,
    publications: Vec<PublicationRecord>,
    failures: Vec<FailureRecord>,
    next_publication_id: u64,
}

/// 各表行数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableSizes {
    pub events: usize,
    pub publications: usize,
    pub failures: usize,
}

#[derive(Default)]
pub struct InMemoryOutboxStore {
    tables: RwLock<Tables>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn table_sizes(&self) -> TableSizes {
        let t = self.tables.read().await;
        TableSizes {
            events: t.events.len(),
            publications: t.publications.len(),
            failures: t.failures.len(),
        }
    }
}

impl Tables {
    fn publications_of<'a>(
        &'a self,
        event_id: &'a str,
    ) -> impl Iterator<Item = &'a PublicationRecord> + 'a {
        self.publications
            .iter()
            .filter(move |p| p.event_id == event_id)
    }

    fn latest_publication_has_failures(&self, event_id: &str) -> bool {
        self.publications_of(event_id)
            .max_by_key(|p| p.published_at)
            .is_some_and(|latest| self.failures.iter().any(|f| f.publication_id == latest.id))
    }

    /// events ⟕ publications ⟕ failures，按 (occurred_at, id, published_at) 排序
    fn joined_rows(&self, keep: impl Fn(&Tables, &EventRecord) -> bool) -> Vec<OutboxRow> {
        let mut events: Vec<&EventRecord> = self.events.iter().filter(|e| keep(self, e)).collect();
        events.sort_by(|a, b| (a.occurred_at, &a.id).cmp(&(b.occurred_at, &b.id)));

        let mut rows = Vec::new();
        for event in events {
            let base = OutboxRow {
                event_id: event.id.clone(),
                occurred_at: event.occurred_at,
                was_quarantined: event.was_quarantined,
                topic: event.topic.clone(),
                payload: event.payload.clone(),
                published_at: None,
                subscription_id: None,
                error_message: None,
            };

            let mut publications: Vec<&PublicationRecord> =
                self.publications_of(&event.id).collect();
            if publications.is_empty() {
                rows.push(base);
                continue;
            }
            publications.sort_by_key(|p| p.published_at);

            for publication in publications {
                let mut failures = self
                    .failures
                    .iter()
                    .filter(|f| f.publication_id == publication.id)
                    .peekable();
                if failures.peek().is_none() {
                    rows.push(OutboxRow {
                        published_at: Some(publication.published_at),
                        ..base.clone()
                    });
                }
                for failure in failures {
                    rows.push(OutboxRow {
                        published_at: Some(publication.published_at),
                        subscription_id: Some(failure.subscription_id.clone()),
                        error_message: Some(failure.error_message.clone()),
                        ..base.clone()
                    });
                }
            }
        }
        rows
    }

    fn insert_publication(&mut self, event_id: &str, publication: &Publication) {
        self.next_publication_id += 1;
        let publication_id = self.next_publication_id;

        self.publications.push(PublicationRecord {
            id: publication_id,
            event_id: event_id.to_string(),
            published_at: publication.published_at(),
        });
        for failure in publication.failures() {
            self.failures.push(FailureRecord {
                publication_id,
                subscription_id: failure.subscription_id().to_string(),
                error_message: failure.error_message().to_string(),
            });
        }
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn save(&self, event: &OutboxEvent) -> Result<()> {
        let mut guard = self.tables.write().await;
        let t = &mut *guard;

        match t.events.iter().position(|e| e.id == event.id()) {
            Some(i) => {
                let existing = &mut t.events[i];
                if existing.was_quarantined != event.was_quarantined() {
                    existing.was_quarantined = event.was_quarantined();
                }
            }
            None => t.events.push(EventRecord {
                id: event.id().to_string(),
                occurred_at: event.occurred_at(),
                was_quarantined: event.was_quarantined(),
                topic: event.topic().to_string(),
                payload: event.payload().clone(),
            }),
        }

        let stored: Vec<Publication> = t
            .publications_of(event.id())
            .map(|p| Publication::succeeded(p.published_at))
            .collect();
        let fresh = diff_publications(&stored, event.publications());

        tracing::debug!(
            event_id = event.id(),
            new_publications = fresh.len(),
            "saving outbox event"
        );

        for publication in fresh {
            t.insert_publication(event.id(), publication);
        }
        Ok(())
    }

    async fn get_all_unpublished_events(&self) -> Result<Vec<OutboxEvent>> {
        let t = self.tables.read().await;
        let rows = t.joined_rows(|t, e| {
            !e.was_quarantined && t.publications_of(&e.id).next().is_none()
        });
        Ok(fold_rows(rows))
    }

    async fn get_all_failed_events(&self) -> Result<Vec<OutboxEvent>> {
        let t = self.tables.read().await;
        let rows =
            t.joined_rows(|t, e| !e.was_quarantined && t.latest_publication_has_failures(&e.id));
        Ok(fold_rows(rows))
    }

    async fn get_last_payload_for_topic_matching(
        &self,
        topic: &str,
        filter: &PayloadFilter,
    ) -> Result<Option<Value>> {
        let t = self.tables.read().await;
        let last = t
            .events
            .iter()
            .filter(|e| e.topic == topic && filter.matches(&e.payload))
            .max_by_key(|e| e.occurred_at);
        Ok(last.map(|e| e.payload.clone()))
    }

    async fn find_event(&self, event_id: &str) -> Result<Option<OutboxEvent>> {
        let t = self.tables.read().await;
        let rows = t.joined_rows(|_, e| e.id == event_id);
        Ok(fold_rows(rows).into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox_event::Failure;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn event(id: &str, occurred: i64, publications: Vec<Publication>) -> OutboxEvent {
        OutboxEvent::builder()
            .id(id)
            .topic("invoice.sent")
            .payload(json!({"customer_id": occurred, "id": id}))
            .occurred_at(at(occurred))
            .publications(publications)
            .build()
    }

    #[tokio::test]
    async fn new_event_round_trips_as_unpublished() {
        let store = InMemoryOutboxStore::new();
        let e = event("e1", 1, vec![]);
        store.save(&e).await.unwrap();

        assert_eq!(store.get_all_unpublished_events().await.unwrap(), vec![e]);
        assert!(store.get_all_failed_events().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_event_round_trips_with_history() {
        let store = InMemoryOutboxStore::new();
        let e = event(
            "e1",
            1,
            vec![
                Publication::new(at(2), [Failure::new("s2", "boom"), Failure::new("s3", "bang")]),
                Publication::new(at(3), [Failure::new("s2", "boom")]),
            ],
        );
        store.save(&e).await.unwrap();

        let failed = store.get_all_failed_events().await.unwrap();
        assert_eq!(failed, vec![e.clone()]);
        assert!(store.get_all_unpublished_events().await.unwrap().is_empty());
        assert_eq!(store.find_event("e1").await.unwrap(), Some(e));
    }

    #[tokio::test]
    async fn saving_twice_adds_no_rows() {
        let store = InMemoryOutboxStore::new();
        let e = event(
            "e1",
            1,
            vec![Publication::new(at(2), [Failure::new("s2", "boom")])],
        );
        store.save(&e).await.unwrap();
        let once = store.table_sizes().await;
        store.save(&e).await.unwrap();

        assert_eq!(store.table_sizes().await, once);
        assert_eq!(
            once,
            TableSizes {
                events: 1,
                publications: 1,
                failures: 1
            }
        );
    }

    #[tokio::test]
    async fn appends_only_new_publications() {
        let store = InMemoryOutboxStore::new();
        let mut e = event("e1", 1, vec![]);
        store.save(&e).await.unwrap();

        e.record_publication(Publication::new(at(2), [Failure::new("s2", "boom")]));
        store.save(&e).await.unwrap();
        e.record_publication(Publication::succeeded(at(3)));
        store.save(&e).await.unwrap();

        assert_eq!(
            store.table_sizes().await,
            TableSizes {
                events: 1,
                publications: 2,
                failures: 1
            }
        );
        assert!(store.get_all_failed_events().await.unwrap().is_empty());
        assert_eq!(store.find_event("e1").await.unwrap(), Some(e));
    }

    #[tokio::test]
    async fn quarantined_events_are_never_returned() {
        let store = InMemoryOutboxStore::new();
        let mut failing = event(
            "e1",
            1,
            vec![Publication::new(at(2), [Failure::new("s", "boom")])],
        );
        store.save(&failing).await.unwrap();
        failing.quarantine();
        store.save(&failing).await.unwrap();

        let mut fresh = event("e2", 2, vec![]);
        fresh.quarantine();
        store.save(&fresh).await.unwrap();

        assert!(store.get_all_failed_events().await.unwrap().is_empty());
        assert!(store.get_all_unpublished_events().await.unwrap().is_empty());
        assert!(store.find_event("e1").await.unwrap().unwrap().was_quarantined());
    }

    #[tokio::test]
    async fn immutable_fields_are_not_rewritten() {
        let store = InMemoryOutboxStore::new();
        store.save(&event("e1", 1, vec![])).await.unwrap();

        let tampered = OutboxEvent::builder()
            .id("e1")
            .topic("other")
            .payload(json!({"x": 1}))
            .occurred_at(at(99))
            .build();
        store.save(&tampered).await.unwrap();

        let stored = store.find_event("e1").await.unwrap().unwrap();
        assert_eq!(stored.topic(), "invoice.sent");
        assert_eq!(stored.occurred_at(), at(1));
    }

    #[tokio::test]
    async fn last_payload_matching_picks_most_recent() {
        let store = InMemoryOutboxStore::new();
        let make = |id: &str, occurred: i64, customer: i64| {
            OutboxEvent::builder()
                .id(id)
                .topic("reminder.sent")
                .payload(json!({"customer_id": customer, "seq": occurred}))
                .occurred_at(at(occurred))
                .build()
        };
        store.save(&make("a", 1, 7)).await.unwrap();
        store.save(&make("b", 3, 7)).await.unwrap();
        store.save(&make("c", 5, 8)).await.unwrap();
        store.save(&event("d", 9, vec![])).await.unwrap();

        let filter = PayloadFilter::new().field("customer_id", 7);
        let found = store
            .get_last_payload_for_topic_matching("reminder.sent", &filter)
            .await
            .unwrap();
        assert_eq!(found, Some(json!({"customer_id": 7, "seq": 3})));

        let unknown = PayloadFilter::new().field("customer_id", 9);
        let none = store
            .get_last_payload_for_topic_matching("reminder.sent", &unknown)
            .await
            .unwrap();
        assert_eq!(none, None);
    }

    #[tokio::test]
    async fn unknown_event_is_none() {
        let store = InMemoryOutboxStore::new();
        assert_eq!(store.find_event("missing").await.unwrap(), None);
    }
}
