//! Outbox 事件模型
//!
//! - `OutboxEvent`：不可变的事件身份与负载，加上可追加的投递历史；
//! - `Publication`：一次投递尝试及其失败集合；
//! - `Failure`：某个订阅在某次尝试中的失败原因。
//!
mod event;
mod publication;

pub use event::{OutboxEvent, QuarantineReason};
pub use publication::{Failure, Publication};
