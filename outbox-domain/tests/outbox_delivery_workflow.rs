use anyhow::Result as AnyResult;
use chrono::{DateTime, Duration, TimeZone, Utc};
use outbox_domain::event_factory::{Clock, EventFactory, IdGenerator};
use outbox_domain::eventing::{
    EventBus, OutboxCrawler, QuarantineAlert, QuarantineNotice, handler_fn,
};
use outbox_domain::outbox_event::{Failure, Publication, QuarantineReason};
use outbox_domain::persist::{InMemoryOutboxStore, OutboxStore, PayloadFilter, TableSizes};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

struct Ids(AtomicUsize);
impl IdGenerator for Ids {
    fn next_id(&self) -> String {
        format!("evt-{}", self.0.fetch_add(1, Ordering::Relaxed))
    }
}

/// 每次读取前进一分钟
struct Ticking(Mutex<DateTime<Utc>>);
impl Clock for Ticking {
    fn now(&self) -> DateTime<Utc> {
        let mut g = self.0.lock().unwrap();
        let now = *g;
        *g = now + Duration::minutes(1);
        now
    }
}

#[derive(Default)]
struct Alerts(Mutex<Vec<QuarantineNotice>>);
#[async_trait::async_trait]
impl QuarantineAlert for Alerts {
    async fn alert(&self, notice: &QuarantineNotice) -> anyhow::Result<()> {
        self.0.lock().unwrap().push(notice.clone());
        Ok(())
    }
}

fn t(minutes: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::minutes(minutes)
}

struct World {
    store: Arc<InMemoryOutboxStore>,
    bus: Arc<EventBus>,
    crawler: OutboxCrawler,
    factory: EventFactory,
    alerts: Arc<Alerts>,
}

fn world() -> World {
    let store = Arc::new(InMemoryOutboxStore::new());
    let alerts = Arc::new(Alerts::default());
    let bus = Arc::new(
        EventBus::builder()
            .store(store.clone())
            .clock(Arc::new(Ticking(Mutex::new(t(0)))))
            .alert(alerts.clone())
            .build(),
    );
    let crawler = OutboxCrawler::builder()
        .store(store.clone())
        .bus(bus.clone())
        .build();
    let factory = EventFactory::builder()
        .id_generator(Arc::new(Ids(AtomicUsize::new(1))))
        .clock(Arc::new(Ticking(Mutex::new(t(-60)))))
        .quarantined_topics(["quote.rejected".to_string()])
        .build();
    World {
        store,
        bus,
        crawler,
        factory,
        alerts,
    }
}

#[tokio::test]
async fn no_subscribers_yields_one_empty_publication() -> AnyResult<()> {
    let w = world();
    let e1 = w.factory.create_new_event("T", json!({"n": 1}), vec![]);
    w.store.save(&e1).await?;

    let report = w.crawler.run_once().await;
    assert_eq!(report.published, 1);

    let stored = w.store.find_event(e1.id()).await?.unwrap();
    assert_eq!(stored.publications(), &[Publication::succeeded(t(0))]);
    assert!(w.store.get_all_unpublished_events().await?.is_empty());
    assert!(w.store.get_all_failed_events().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn failing_subscriber_is_retried_alone_until_fixed() -> AnyResult<()> {
    let w = world();
    let s1_calls = Arc::new(AtomicUsize::new(0));
    let s2_fixed = Arc::new(AtomicBool::new(false));

    let calls = s1_calls.clone();
    w.bus.subscribe(
        "T",
        "s1",
        Arc::new(handler_fn(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })),
    );
    let fixed = s2_fixed.clone();
    w.bus.subscribe(
        "T",
        "s2",
        Arc::new(handler_fn(move |_| {
            let fixed = fixed.load(Ordering::SeqCst);
            async move {
                if fixed {
                    Ok(())
                } else {
                    Err(anyhow::anyhow!("boom"))
                }
            }
        })),
    );

    let e2 = w.factory.create_new_event("T", json!({"n": 2}), vec![]);
    w.store.save(&e2).await?;

    w.crawler.run_once().await;
    let after_first = w.store.find_event(e2.id()).await?.unwrap();
    assert_eq!(
        after_first.publications(),
        &[Publication::new(t(0), [Failure::new("s2", "boom")])]
    );
    assert_eq!(w.store.get_all_failed_events().await?, vec![after_first.clone()]);

    s2_fixed.store(true, Ordering::SeqCst);
    w.crawler.run_once().await;

    let after_second = w.store.find_event(e2.id()).await?.unwrap();
    assert_eq!(
        after_second.publications(),
        &[
            Publication::new(t(0), [Failure::new("s2", "boom")]),
            Publication::succeeded(t(1)),
        ]
    );
    assert_eq!(s1_calls.load(Ordering::SeqCst), 1);
    assert!(w.store.get_all_failed_events().await?.is_empty());

    assert_eq!(
        w.store.table_sizes().await,
        TableSizes {
            events: 1,
            publications: 2,
            failures: 1
        }
    );
    Ok(())
}

#[tokio::test]
async fn permanently_failing_event_is_quarantined_and_alerted() -> AnyResult<()> {
    let w = world();
    w.bus.subscribe(
        "invoice.sent",
        "mailer",
        Arc::new(handler_fn(|_| async { Err(anyhow::anyhow!("smtp down")) })),
    );
    let event = w
        .factory
        .create_new_event("invoice.sent", json!({"invoice": 9}), vec![]);
    w.store.save(&event).await?;

    for attempt in 1..=4 {
        let report = w.crawler.run_once().await;
        assert_eq!(report.attempted(), 1, "attempt {attempt}");
    }
    assert_eq!(w.crawler.run_once().await.attempted(), 0);

    let stored = w.store.find_event(event.id()).await?.unwrap();
    assert_eq!(stored.publications().len(), 4);
    assert_eq!(
        stored.quarantine_reason(),
        Some(QuarantineReason::RetriesExhausted)
    );

    let alerts = w.alerts.0.lock().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].topic, "invoice.sent");
    assert_eq!(alerts[0].last_publication.failures()[0].error_message(), "smtp down");
    Ok(())
}

#[tokio::test]
async fn topic_quarantine_never_delivers() -> AnyResult<()> {
    let w = world();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    w.bus.subscribe(
        "quote.rejected",
        "notify",
        Arc::new(handler_fn(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })),
    );

    let rejected = w.factory.create_new_event("quote.rejected", json!({}), vec![]);
    assert_eq!(rejected.quarantine_reason(), Some(QuarantineReason::Topic));
    w.store.save(&rejected).await?;

    assert_eq!(w.crawler.run_once().await.attempted(), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(w.alerts.0.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn cooldown_lookup_sees_saved_payloads() -> AnyResult<()> {
    let w = world();
    for (customer, kind) in [(1, "first"), (2, "other"), (1, "second")] {
        let e = w.factory.create_new_event(
            "reminder.sent",
            json!({"customer_id": customer, "kind": kind}),
            vec![],
        );
        w.store.save(&e).await?;
    }

    let last = w
        .store
        .get_last_payload_for_topic_matching(
            "reminder.sent",
            &PayloadFilter::new().field("customer_id", 1),
        )
        .await?;
    assert_eq!(last, Some(json!({"customer_id": 1, "kind": "second"})));
    Ok(())
}
