//! Outbox 统一错误定义
//!
//! 只覆盖本子系统自身可能产生的错误：序列化与存储/数据库。
//! 订阅者回调的错误不会出现在这里，它们在总线内部被转换为 `Failure` 记录。
//!
use thiserror::Error;

/// 统一错误类型
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum OutboxError {
    // --- 序列化 ---
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },

    // --- 存储/持久化 ---
    #[error("outbox store error: {reason}")]
    Store { reason: String },
    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("not found: {reason}")]
    NotFound { reason: String },
}

impl OutboxError {
    pub fn store(reason: impl Into<String>) -> Self {
        OutboxError::Store {
            reason: reason.into(),
        }
    }
}

/// 统一 Result 类型别名
pub type OutboxResult<T> = Result<T, OutboxError>;

// 允许在基础设施层直接使用 `?` 将 sqlx 错误转换为 OutboxError
#[cfg(feature = "infra-sqlx")]
impl From<sqlx::Error> for OutboxError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => OutboxError::NotFound {
                reason: "row not found".to_string(),
            },
            other => OutboxError::Database {
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(feature = "infra-sqlx")]
impl From<sqlx::migrate::MigrateError> for OutboxError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        OutboxError::Database {
            reason: err.to_string(),
        }
    }
}
