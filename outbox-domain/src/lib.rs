//! 事务性 Outbox 与事件投递（outbox-domain）
//!
//! 用例中产生的业务事件先持久化为“未投递”，再由爬虫驱动总线以
//! “至少一次”的语义投递给相互独立的订阅者：
//! - 事件模型（`outbox_event`）与事件工厂（`event_factory`）；
//! - 存储协议、增量写入与关系行折叠（`persist`）；
//! - 订阅注册、按订阅重试、失败隔离与告警（`eventing`）。
//!
//! 已成功的订阅不会被重复调用；连续多次投递仍失败的事件会被隔离，
//! 等待人工处理。负载对本 crate 是不透明的 JSON 值。
//!
//! 典型用法：
//! 1. 启动时构造 `EventBus`，为每个 topic 注册订阅处理器；
//! 2. 用例内通过 `EventFactory` 创建事件并 `OutboxStore::save`；
//! 3. 启动 `OutboxCrawler`，周期性投递未投递与失败的事件。
//!
pub mod error;
pub mod event_factory;
#[cfg(feature = "eventing")]
pub mod eventing;
pub mod outbox_event;
pub mod persist;

#[cfg(test)]
pub(crate) mod test_support;
