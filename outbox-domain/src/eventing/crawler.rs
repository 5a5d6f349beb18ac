//! Outbox 爬虫（OutboxCrawler）
//!
//! 周期性地从存储拉取“从未投递”与“最近一次仍失败”的事件并逐个交给总线：
//! - 两个查询的结果按事件 ID 去重，已隔离的事件被过滤；
//! - 不同事件可并发处理，同一事件同一时刻至多一个 publish；
//! - publish 前重新读取事件，批次快照过期时跳过；
//! - 单个事件的存储错误只记录日志，不会中断本轮；
//! - 通过 `CrawlerHandle` 优雅关闭。
//!
use super::EventBus;
use crate::outbox_event::OutboxEvent;
use crate::persist::OutboxStore;
use bon::Builder;
use dashmap::DashSet;
use futures_util::{StreamExt, stream};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// 爬虫配置
#[derive(Clone, Copy, Debug)]
pub struct CrawlerConfig {
    /// 两轮之间的间隔
    pub interval: Duration,
    /// 一轮内同时处理的事件数
    pub concurrency: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            concurrency: 8,
        }
    }
}

/// 一轮爬取的结果统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlReport {
    /// 本次尝试全部成功
    pub published: usize,
    /// 本次尝试仍有失败，等待下一轮
    pub still_failing: usize,
    /// 本次尝试后被隔离
    pub quarantined: usize,
    /// 存储错误（读取或写入）
    pub errors: usize,
    /// 因同一事件已在处理中而跳过
    pub skipped: usize,
}

impl CrawlReport {
    pub fn attempted(&self) -> usize {
        self.published + self.still_failing + self.quarantined
    }

    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Published => self.published += 1,
            Outcome::StillFailing => self.still_failing += 1,
            Outcome::Quarantined => self.quarantined += 1,
            Outcome::Error => self.errors += 1,
            Outcome::Skipped => self.skipped += 1,
        }
    }
}

enum Outcome {
    Published,
    StillFailing,
    Quarantined,
    Error,
    Skipped,
}

#[derive(Builder)]
pub struct OutboxCrawler {
    store: Arc<dyn OutboxStore>,
    bus: Arc<EventBus>,
    #[builder(default)]
    config: CrawlerConfig,
    #[builder(skip)]
    in_flight: DashSet<String>,
}

impl OutboxCrawler {
    /// 执行一轮：拉取待投递/待重试事件并逐个 publish
    pub async fn run_once(&self) -> CrawlReport {
        let mut report = CrawlReport::default();
        let mut batch: Vec<OutboxEvent> = Vec::new();

        match self.store.get_all_unpublished_events().await {
            Ok(events) => batch.extend(events),
            Err(err) => {
                tracing::warn!(error = %err, "failed to load unpublished events");
                report.errors += 1;
            }
        }
        match self.store.get_all_failed_events().await {
            Ok(events) => batch.extend(events),
            Err(err) => {
                tracing::warn!(error = %err, "failed to load failed events");
                report.errors += 1;
            }
        }

        let mut seen = HashSet::new();
        batch.retain(|e| !e.was_quarantined() && seen.insert(e.id().to_string()));
        if batch.is_empty() {
            return report;
        }

        let outcomes: Vec<Outcome> = stream::iter(batch)
            .map(|event| self.process(event))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;
        for outcome in outcomes {
            report.record(outcome);
        }

        tracing::info!(
            published = report.published,
            still_failing = report.still_failing,
            quarantined = report.quarantined,
            errors = report.errors,
            skipped = report.skipped,
            "outbox crawl finished"
        );
        report
    }

    async fn process(&self, event: OutboxEvent) -> Outcome {
        let Some(_guard) = InFlight::acquire(&self.in_flight, event.id()) else {
            tracing::debug!(event_id = event.id(), "event already in flight, skipping");
            return Outcome::Skipped;
        };
        let event_id = event.id().to_string();

        // 批次是拉取时的快照，占位后必须重新读取，避免基于旧副本重投已成功的订阅
        let event = match self.store.find_event(&event_id).await {
            Ok(Some(current)) if current.needs_delivery() => current,
            Ok(_) => {
                tracing::debug!(event_id = %event_id, "event no longer needs delivery, skipping");
                return Outcome::Skipped;
            }
            Err(err) => {
                tracing::warn!(event_id = %event_id, error = %err, "failed to reload event");
                return Outcome::Error;
            }
        };

        match self.bus.publish(event).await {
            Ok(event) if event.was_quarantined() => Outcome::Quarantined,
            Ok(event) if event.is_failing() => Outcome::StillFailing,
            Ok(_) => Outcome::Published,
            Err(err) => {
                tracing::warn!(event_id = %event_id, error = %err, "failed to persist publication");
                Outcome::Error
            }
        }
    }

    /// 启动周期任务，返回可用于关闭/等待的句柄
    pub fn start(self: Arc<Self>) -> CrawlerHandle {
        let token = CancellationToken::new();
        let interval = self.config.interval;
        let cancel = token.clone();

        let task = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                }
            }
        });

        CrawlerHandle {
            token,
            task: Some(task),
        }
    }
}

/// 同一事件 ID 的处理占位，释放时移除
struct InFlight<'a> {
    set: &'a DashSet<String>,
    id: String,
}

impl<'a> InFlight<'a> {
    fn acquire(set: &'a DashSet<String>, id: &str) -> Option<Self> {
        set.insert(id.to_string()).then(|| Self {
            set,
            id: id.to_string(),
        })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.id);
    }
}

/// 爬虫运行句柄：用于优雅关闭与等待任务结束
pub struct CrawlerHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl CrawlerHandle {
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for CrawlerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
