/// Outbox（内存版）示例
/// 展示 用例 -> Outbox -> 爬虫 -> 总线 -> 订阅者 的闭环，以及失败订阅的单独重试与隔离告警
use anyhow::Result as AnyResult;
use outbox_domain::event_factory::EventFactory;
use outbox_domain::eventing::{CrawlerConfig, EventBus, OutboxCrawler, handler_fn};
use outbox_domain::persist::{InMemoryOutboxStore, OutboxStore};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Serialize)]
struct InvoiceSent {
    invoice_id: u64,
    customer_email: String,
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let store = Arc::new(InMemoryOutboxStore::new());
    let bus = Arc::new(EventBus::builder().store(store.clone()).build());

    // 第一个订阅总是成功；第二个前两次失败，之后恢复
    bus.subscribe(
        "invoice.sent",
        "archive",
        Arc::new(handler_fn(|event| async move {
            tracing::info!(event_id = event.id(), "archived invoice");
            Ok(())
        })),
    );
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    bus.subscribe(
        "invoice.sent",
        "mailer",
        Arc::new(handler_fn(move |event| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    anyhow::bail!("smtp unavailable (attempt {})", n + 1);
                }
                tracing::info!(payload = %event.payload(), "invoice mailed");
                Ok(())
            }
        })),
    );

    let factory = EventFactory::builder()
        .quarantined_topics(["quote.rejected".to_string()])
        .build();
    let invoice = factory.create_event(
        "invoice.sent",
        &InvoiceSent {
            invoice_id: 42,
            customer_email: "billing@example.com".into(),
        },
    )?;
    store.save(&invoice).await?;
    store
        .save(&factory.create_event("quote.rejected", &serde_json::json!({"quote": 7}))?)
        .await?;

    let crawler = Arc::new(
        OutboxCrawler::builder()
            .store(store.clone())
            .bus(bus)
            .config(CrawlerConfig {
                interval: Duration::from_millis(200),
                concurrency: 4,
            })
            .build(),
    );
    let handle = crawler.start();
    tokio::time::sleep(Duration::from_secs(1)).await;
    handle.shutdown();
    handle.join().await;

    if let Some(event) = store.find_event(invoice.id()).await? {
        for (i, p) in event.publications().iter().enumerate() {
            println!(
                "attempt {}: at={} failed={:?}",
                i + 1,
                p.published_at(),
                p.failed_subscriptions().collect::<Vec<_>>()
            );
        }
    }
    println!("mailer attempts: {}", attempts.load(Ordering::SeqCst));

    Ok(())
}
