//! 隔离告警（QuarantineAlert）
//!
//! 事件因重试耗尽被隔离时，总线会调用告警通道。通知只携带元信息与
//! 最后一次投递记录，不包含负载与完整历史。
//!
use crate::outbox_event::Publication;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub struct QuarantineNotice {
    pub event_id: String,
    pub topic: String,
    pub occurred_at: DateTime<Utc>,
    /// 含本次在内的投递尝试次数
    pub attempts: usize,
    pub last_publication: Publication,
}

#[async_trait]
pub trait QuarantineAlert: Send + Sync {
    async fn alert(&self, notice: &QuarantineNotice) -> anyhow::Result<()>;
}

/// 默认告警：写一条 error 级别日志
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingQuarantineAlert;

#[async_trait]
impl QuarantineAlert for TracingQuarantineAlert {
    async fn alert(&self, notice: &QuarantineNotice) -> anyhow::Result<()> {
        let failing: Vec<&str> = notice.last_publication.failed_subscriptions().collect();
        tracing::error!(
            event_id = %notice.event_id,
            topic = %notice.topic,
            attempts = notice.attempts,
            failing = ?failing,
            "outbox event quarantined"
        );
        Ok(())
    }
}
