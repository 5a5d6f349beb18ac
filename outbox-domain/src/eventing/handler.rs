//! 事件处理器（EventHandler）
//!
//! 订阅者回调：对某个 topic 的事件执行一次业务处理（发送邮件、生成 PDF、
//! 调用外部 API 等）。返回错误或 panic 都会被总线记录为该订阅的失败。
//!
use crate::outbox_event::OutboxEvent;
use async_trait::async_trait;
use std::future::Future;

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &OutboxEvent) -> anyhow::Result<()>;
}

/// 以闭包实现的处理器，见 [`handler_fn`]
pub struct FnHandler<F>(F);

/// 将 `Fn(OutboxEvent) -> impl Future<Output = anyhow::Result<()>>` 包装为处理器
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(OutboxEvent) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(OutboxEvent) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, event: &OutboxEvent) -> anyhow::Result<()> {
        (self.0)(event.clone()).await
    }
}
