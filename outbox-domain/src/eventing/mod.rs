//! 事件投递子系统（eventing）
//!
//! - `SubscriptionRegistry`：topic → 订阅 ID → 处理器；
//! - `EventHandler`：订阅者回调；
//! - `EventBus`：一次投递尝试的编排（目标计算、失败捕获、隔离判定、持久化）；
//! - `OutboxCrawler`：周期拉取待投递/待重试事件并调用总线；
//! - `QuarantineAlert`：事件被隔离时的外部告警通道。
//!
//! 投递语义为“至少一次”：某次尝试的结果持久化失败时，下一轮会再次调用同一批目标。
//!
pub mod alert;
pub mod bus;
pub mod crawler;
pub mod handler;
pub mod registry;

pub use alert::{QuarantineAlert, QuarantineNotice, TracingQuarantineAlert};
pub use bus::{EventBus, EventBusConfig};
pub use crawler::{CrawlReport, CrawlerConfig, CrawlerHandle, OutboxCrawler};
pub use handler::{EventHandler, FnHandler, handler_fn};
pub use registry::SubscriptionRegistry;
