//! 持久化（persist）
//!
//! 定义 Outbox 存储协议与两种实现：
//! - `OutboxStore`：事件的幂等 upsert 与待投递/失败事件查询；
//! - `diff_publications`：按 `published_at` 计算尚未持久化的投递记录；
//! - `fold_rows`：把三表左连接的扁平行折叠回带投递历史的事件；
//! - `InMemoryOutboxStore`：按相同三表结构保存在内存中的测试替身；
//! - `PgOutboxStore`（`infra-sqlx`）：Postgres 关系投影。
//!
//! 两个纯函数与存储技术无关，增量写入与读取重建的正确性都以它们为准。
//!
mod outbox_store;
mod payload_filter;
mod publication_diff;
mod row_fold;
mod store_inmemory;
#[cfg(feature = "infra-sqlx")]
mod store_postgres;

pub use outbox_store::OutboxStore;
pub use payload_filter::PayloadFilter;
pub use publication_diff::diff_publications;
pub use row_fold::{OutboxRow, fold_rows};
pub use store_inmemory::{InMemoryOutboxStore, TableSizes};
#[cfg(feature = "infra-sqlx")]
pub use store_postgres::PgOutboxStore;
