//! 事件总线（EventBus）
//!
//! 一次 `publish` 即一次投递尝试：
//! 1. 目标：首次尝试为该 topic 当前全部订阅，之后仅为上一次尝试中失败的订阅；
//! 2. 各目标独立执行，错误与 panic 被捕获为 `Failure`，互不影响；
//! 3. 追加一条 `Publication`（即使没有任何订阅）；
//! 4. 仍有失败且此前已有 `max_prior_attempts` 次尝试时隔离事件并告警；
//! 5. 每次 publish 恰好写存储一次，存储错误向调用方传播。
//!
//! 已成功的订阅不会在后续尝试中被再次调用。同一事件不得并发 publish，
//! 这一点由调用方（爬虫）保证。
//!
use super::{
    EventHandler, QuarantineAlert, QuarantineNotice, SubscriptionRegistry, TracingQuarantineAlert,
};
use crate::error::OutboxResult as Result;
use crate::event_factory::{Clock, SystemClock};
use crate::outbox_event::{Failure, OutboxEvent, Publication};
use crate::persist::OutboxStore;
use bon::Builder;
use chrono::{DateTime, Duration, Utc};
use futures_util::{FutureExt, StreamExt, future, stream};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// 事件总线配置
#[derive(Clone, Copy, Debug)]
pub struct EventBusConfig {
    /// 已有多少次尝试后，仍失败的事件会被隔离
    pub max_prior_attempts: usize,
    /// 单次尝试内处理器的并发上限
    pub handler_concurrency: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            max_prior_attempts: 3,
            handler_concurrency: 8,
        }
    }
}

#[derive(Builder)]
pub struct EventBus {
    store: Arc<dyn OutboxStore>,
    #[builder(default)]
    registry: Arc<SubscriptionRegistry>,
    #[builder(default = Arc::new(SystemClock) as Arc<dyn Clock>)]
    clock: Arc<dyn Clock>,
    #[builder(default = Arc::new(TracingQuarantineAlert) as Arc<dyn QuarantineAlert>)]
    alert: Arc<dyn QuarantineAlert>,
    #[builder(default)]
    config: EventBusConfig,
}

impl EventBus {
    /// 注册或覆盖订阅
    pub fn subscribe(&self, topic: &str, subscription_id: &str, handler: Arc<dyn EventHandler>) {
        self.registry.subscribe(topic, subscription_id, handler);
    }

    pub fn unsubscribe(&self, topic: &str, subscription_id: &str) -> bool {
        self.registry.unsubscribe(topic, subscription_id).is_some()
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// 执行一次投递尝试并持久化，返回更新后的事件
    pub async fn publish(&self, mut event: OutboxEvent) -> Result<OutboxEvent> {
        let targets = self.targets(&event);
        let prior_attempts = event.publications().len();

        tracing::debug!(
            event_id = event.id(),
            topic = event.topic(),
            attempt = prior_attempts + 1,
            targets = targets.len(),
            "publishing outbox event"
        );

        let failures = self.deliver(&event, targets).await;
        let publication = Publication::new(self.next_published_at(&event), failures);
        let still_failing = publication.has_failures();
        event.record_publication(publication);

        let newly_quarantined = still_failing
            && prior_attempts >= self.config.max_prior_attempts
            && !event.was_quarantined();
        if newly_quarantined {
            event.quarantine();
        }

        self.store.save(&event).await?;

        if newly_quarantined {
            self.raise_alert(&event).await;
        }
        Ok(event)
    }

    fn targets(&self, event: &OutboxEvent) -> Vec<String> {
        match event.last_publication() {
            None => self.registry.subscriptions(event.topic()),
            Some(last) => last.failed_subscriptions().map(str::to_string).collect(),
        }
    }

    async fn deliver(&self, event: &OutboxEvent, targets: Vec<String>) -> Vec<Failure> {
        let concurrency = self.config.handler_concurrency.max(1);

        stream::iter(targets)
            .map(|subscription_id| {
                let handler = self.registry.handler(event.topic(), &subscription_id);
                Self::invoke(event, subscription_id, handler)
            })
            .buffer_unordered(concurrency)
            .filter_map(future::ready)
            .collect()
            .await
    }

    async fn invoke(
        event: &OutboxEvent,
        subscription_id: String,
        handler: Option<Arc<dyn EventHandler>>,
    ) -> Option<Failure> {
        let Some(handler) = handler else {
            tracing::warn!(
                event_id = event.id(),
                topic = event.topic(),
                subscription_id = %subscription_id,
                "no handler registered for failed subscription"
            );
            return Some(Failure::new(subscription_id, "subscription is not registered"));
        };

        let message = match AssertUnwindSafe(handler.handle(event)).catch_unwind().await {
            Ok(Ok(())) => return None,
            Ok(Err(err)) => format!("{err:#}"),
            Err(panic) => panic_message(panic.as_ref()),
        };

        tracing::warn!(
            event_id = event.id(),
            topic = event.topic(),
            subscription_id = %subscription_id,
            error = %message,
            "subscriber failed"
        );
        Some(Failure::new(subscription_id, message))
    }

    /// 新尝试的时间严格晚于上一次尝试，保证 `published_at` 在事件内唯一
    fn next_published_at(&self, event: &OutboxEvent) -> DateTime<Utc> {
        let now = self.clock.now();
        match event.last_publication() {
            Some(last) if now <= last.published_at() => {
                last.published_at() + Duration::microseconds(1)
            }
            _ => now,
        }
    }

    async fn raise_alert(&self, event: &OutboxEvent) {
        let Some(last) = event.last_publication() else {
            return;
        };
        let notice = QuarantineNotice {
            event_id: event.id().to_string(),
            topic: event.topic().to_string(),
            occurred_at: event.occurred_at(),
            attempts: event.publications().len(),
            last_publication: last.clone(),
        };

        if let Err(err) = self.alert.alert(&notice).await {
            tracing::warn!(
                event_id = event.id(),
                error = %format!("{err:#}"),
                "quarantine alert failed"
            );
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
