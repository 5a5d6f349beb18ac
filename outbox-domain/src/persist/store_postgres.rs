//! Postgres 关系投影（PgOutboxStore）
//!
//! 表结构见 `migrations/0001_outbox.sql`。写入在单个事务内完成：
//! 新事件插入事件行，已有事件只在隔离标记变化时更新；投递与失败行
//! 只追加 `diff_publications` 给出的增量。读取统一走三表左连接，
//! 再交给 `fold_rows` 重建。
//!
use crate::error::OutboxResult as Result;
use crate::outbox_event::{OutboxEvent, Publication};
use crate::persist::{OutboxRow, OutboxStore, PayloadFilter, diff_publications, fold_rows};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};

const SELECT_JOINED: &str = r"
    SELECT e.id AS event_id, e.occurred_at, e.was_quarantined, e.topic, e.payload,
           p.published_at, f.subscription_id, f.error_message
    FROM outbox_events e
    LEFT JOIN outbox_publications p ON p.event_id = e.id
    LEFT JOIN outbox_failures f ON f.publication_id = p.id
";

const ORDER_JOINED: &str = "ORDER BY e.occurred_at, e.id, p.published_at, f.subscription_id";

const WHERE_UNPUBLISHED: &str = r"
    WHERE NOT e.was_quarantined
      AND NOT EXISTS (SELECT 1 FROM outbox_publications up WHERE up.event_id = e.id)
";

const WHERE_FAILED: &str = r"
    WHERE NOT e.was_quarantined
      AND EXISTS (
        SELECT 1
        FROM outbox_publications lp
        JOIN outbox_failures lf ON lf.publication_id = lp.id
        WHERE lp.event_id = e.id
          AND lp.published_at = (
            SELECT MAX(mp.published_at) FROM outbox_publications mp WHERE mp.event_id = e.id
          )
      )
";

pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 执行内置迁移，创建三张表
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn fetch_joined(
        &self,
        where_clause: &str,
        event_id: Option<&str>,
    ) -> Result<Vec<OutboxEvent>> {
        let sql = format!("{SELECT_JOINED} {where_clause} {ORDER_JOINED}");
        let mut query = sqlx::query(&sql);
        if let Some(id) = event_id {
            query = query.bind(id);
        }

        let rows = query.fetch_all(&self.pool).await?;
        let rows = rows
            .iter()
            .map(to_outbox_row)
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()?;

        Ok(fold_rows(rows))
    }
}

fn to_outbox_row(row: &PgRow) -> std::result::Result<OutboxRow, sqlx::Error> {
    let Json(payload): Json<Value> = row.try_get("payload")?;

    Ok(OutboxRow {
        event_id: row.try_get("event_id")?,
        occurred_at: row.try_get("occurred_at")?,
        was_quarantined: row.try_get("was_quarantined")?,
        topic: row.try_get("topic")?,
        payload,
        published_at: row.try_get("published_at")?,
        subscription_id: row.try_get("subscription_id")?,
        error_message: row.try_get("error_message")?,
    })
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    async fn save(&self, event: &OutboxEvent) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<bool> =
            sqlx::query_scalar("SELECT was_quarantined FROM outbox_events WHERE id = $1 FOR UPDATE")
                .bind(event.id())
                .fetch_optional(&mut *tx)
                .await?;

        match existing {
            None => {
                sqlx::query(
                    r"
                    INSERT INTO outbox_events (id, occurred_at, was_quarantined, topic, payload)
                    VALUES ($1, $2, $3, $4, $5)
                    ON CONFLICT (id) DO NOTHING
                    ",
                )
                .bind(event.id())
                .bind(event.occurred_at())
                .bind(event.was_quarantined())
                .bind(event.topic())
                .bind(Json(event.payload()))
                .execute(&mut *tx)
                .await?;
            }
            Some(stored) if stored != event.was_quarantined() => {
                sqlx::query("UPDATE outbox_events SET was_quarantined = $2 WHERE id = $1")
                    .bind(event.id())
                    .bind(event.was_quarantined())
                    .execute(&mut *tx)
                    .await?;
            }
            Some(_) => {}
        }

        let stored: Vec<DateTime<Utc>> =
            sqlx::query_scalar("SELECT published_at FROM outbox_publications WHERE event_id = $1")
                .bind(event.id())
                .fetch_all(&mut *tx)
                .await?;
        let stored: Vec<Publication> = stored.into_iter().map(Publication::succeeded).collect();
        let fresh = diff_publications(&stored, event.publications());

        tracing::debug!(
            event_id = event.id(),
            new_publications = fresh.len(),
            "saving outbox event"
        );

        for publication in fresh {
            let publication_id: i64 = sqlx::query_scalar(
                r"
                INSERT INTO outbox_publications (event_id, published_at)
                VALUES ($1, $2)
                RETURNING id
                ",
            )
            .bind(event.id())
            .bind(publication.published_at())
            .fetch_one(&mut *tx)
            .await?;

            for failure in publication.failures() {
                sqlx::query(
                    r"
                    INSERT INTO outbox_failures (publication_id, subscription_id, error_message)
                    VALUES ($1, $2, $3)
                    ",
                )
                .bind(publication_id)
                .bind(failure.subscription_id())
                .bind(failure.error_message())
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_all_unpublished_events(&self) -> Result<Vec<OutboxEvent>> {
        self.fetch_joined(WHERE_UNPUBLISHED, None).await
    }

    async fn get_all_failed_events(&self) -> Result<Vec<OutboxEvent>> {
        self.fetch_joined(WHERE_FAILED, None).await
    }

    async fn get_last_payload_for_topic_matching(
        &self,
        topic: &str,
        filter: &PayloadFilter,
    ) -> Result<Option<Value>> {
        let payload: Option<Json<Value>> = sqlx::query_scalar(
            r"
            SELECT payload FROM outbox_events
            WHERE topic = $1 AND payload @> $2
            ORDER BY occurred_at DESC
            LIMIT 1
            ",
        )
        .bind(topic)
        .bind(Json(filter.to_value()))
        .fetch_optional(&self.pool)
        .await?;

        Ok(payload.map(|Json(v)| v))
    }

    async fn find_event(&self, event_id: &str) -> Result<Option<OutboxEvent>> {
        let events = self
            .fetch_joined("WHERE e.id = $1", Some(event_id))
            .await?;
        Ok(events.into_iter().next())
    }
}
