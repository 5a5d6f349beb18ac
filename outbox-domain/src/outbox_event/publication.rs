use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 订阅失败记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// 订阅标识（调用方分配，同一 topic 内稳定）
    subscription_id: String,
    /// 回调返回的错误信息
    error_message: String,
}

impl Failure {
    pub fn new(subscription_id: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            error_message: error_message.into(),
        }
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    pub fn error_message(&self) -> &str {
        &self.error_message
    }
}

/// 一次投递尝试
///
/// `published_at` 是该尝试在事件内的身份标识；`failures` 按订阅 ID 升序存放，
/// 且每个订阅至多出现一次，因此两次尝试的相等性与失败的收集顺序无关。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "PublicationRepr")]
pub struct Publication {
    published_at: DateTime<Utc>,
    failures: Vec<Failure>,
}

impl Publication {
    /// 创建一次尝试记录；同一订阅的重复失败仅保留第一条
    pub fn new(published_at: DateTime<Utc>, failures: impl IntoIterator<Item = Failure>) -> Self {
        let mut normalized: Vec<Failure> = Vec::new();
        for failure in failures {
            if normalized
                .iter()
                .all(|f| f.subscription_id != failure.subscription_id)
            {
                normalized.push(failure);
            }
        }
        normalized.sort_by(|a, b| a.subscription_id.cmp(&b.subscription_id));

        Self {
            published_at,
            failures: normalized,
        }
    }

    /// 全部订阅成功（或没有订阅）的尝试
    pub fn succeeded(published_at: DateTime<Utc>) -> Self {
        Self {
            published_at,
            failures: Vec::new(),
        }
    }

    pub fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }

    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// 本次尝试中失败的订阅 ID（即下一次尝试的投递目标）
    pub fn failed_subscriptions(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(Failure::subscription_id)
    }
}

#[derive(Deserialize)]
struct PublicationRepr {
    published_at: DateTime<Utc>,
    #[serde(default)]
    failures: Vec<Failure>,
}

impl From<PublicationRepr> for Publication {
    fn from(repr: PublicationRepr) -> Self {
        Publication::new(repr.published_at, repr.failures)
    }
}
