//! Postgres-backed notification store
//!
//! Counter updates and outcome recording run inside a single transaction per
//! item, with the idempotency guard expressed as a conditional UPDATE so
//! concurrent drain runs cannot double-record an attempt.

use crate::backoff::connect_with_backoff;
use crate::config::StoreConfig;
use crate::error::{EngineError, Result};
use crate::store::NotificationStore;
use crate::types::{
    Channel, ChannelTotals, DeliveryOutcome, HistoryRecord, OutcomeStatus,
    UserNotificationPreference, WorkItem, WorkItemStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Postgres implementation of [`NotificationStore`]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect with bounded exponential backoff. Exhausting the retry budget
    /// is a fatal configuration error at startup.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let pool = connect_with_backoff("postgres", config.connect_max_retries, || {
            PgPoolOptions::new()
                .max_connections(config.max_pool_size)
                .min_connections(config.min_pool_size)
                .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
                .connect(&config.database_url)
        })
        .await?;

        info!("Connected to Postgres notification store");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_item(row: &PgRow) -> Result<WorkItem> {
        let channel: String = row.try_get("channel")?;
        let status: String = row.try_get("status")?;
        Ok(WorkItem {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            channel: channel.parse().map_err(EngineError::store)?,
            priority_score: row.try_get("priority_score")?,
            payload: row.try_get("payload")?,
            status: status.parse().map_err(EngineError::store)?,
            scheduled_for: row.try_get("scheduled_for")?,
            created_at: row.try_get("created_at")?,
            attempts: row.try_get::<i32, _>("attempts")? as u32,
        })
    }

    fn row_to_preference(row: &PgRow) -> Result<UserNotificationPreference> {
        let channel_pref = |enabled: &str, contact: &str| -> Result<crate::types::ChannelPreference> {
            Ok(crate::types::ChannelPreference {
                enabled: row.try_get(enabled)?,
                contact: row.try_get(contact)?,
            })
        };

        Ok(UserNotificationPreference {
            user_id: row.try_get("user_id")?,
            email: channel_pref("email_enabled", "email_contact")?,
            chat_push: channel_pref("chat_push_enabled", "chat_push_contact")?,
            sms: channel_pref("sms_enabled", "sms_contact")?,
            mobile_push: channel_pref("mobile_push_enabled", "mobile_push_contact")?,
            quiet_hours_start: row.try_get("quiet_hours_start")?,
            quiet_hours_end: row.try_get("quiet_hours_end")?,
            timezone: row.try_get("timezone")?,
            max_notifications_per_day: row.try_get::<i32, _>("max_notifications_per_day")? as u32,
            daily_sent_count: row.try_get::<i32, _>("daily_sent_count")? as u32,
        })
    }
}

#[async_trait]
impl NotificationStore for PgStore {
    async fn fetch_eligible(&self, limit: u32, now: DateTime<Utc>) -> Result<Vec<WorkItem>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, channel, priority_score, payload, status,
                   scheduled_for, created_at, attempts
            FROM work_items
            WHERE status = 'queued' AND scheduled_for <= $1
            ORDER BY priority_score DESC, created_at ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_item).collect()
    }

    async fn fetch_preference(
        &self,
        user_id: Uuid,
    ) -> Result<Option<UserNotificationPreference>> {
        let row = sqlx::query(
            r#"
            SELECT user_id,
                   email_enabled, email_contact,
                   chat_push_enabled, chat_push_contact,
                   sms_enabled, sms_contact,
                   mobile_push_enabled, mobile_push_contact,
                   quiet_hours_start, quiet_hours_end, timezone,
                   max_notifications_per_day, daily_sent_count
            FROM user_notification_preferences
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_preference).transpose()
    }

    async fn record_outcome(&self, outcome: &DeliveryOutcome) -> Result<()> {
        let status: WorkItemStatus = outcome.status.into();
        let mut tx = self.pool.begin().await?;

        // The status guard makes the terminal transition happen at most once
        let updated = sqlx::query(
            r#"
            UPDATE work_items
            SET status = $2, attempts = attempts + 1
            WHERE id = $1 AND status = 'queued'
            "#,
        )
        .bind(outcome.work_item_id)
        .bind(status.as_str())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            // Another run already resolved this item
            tx.rollback().await?;
            return Ok(());
        }

        let sent = outcome.status == OutcomeStatus::Sent;
        sqlx::query(
            r#"
            INSERT INTO notification_history
                (work_item_id, user_id, channel, status, recorded_at, sent_at, error_message)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(outcome.work_item_id)
        .bind(outcome.user_id)
        .bind(outcome.channel.as_str())
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(sent.then(Utc::now))
        .bind(&outcome.error)
        .execute(&mut *tx)
        .await?;

        if sent {
            sqlx::query(
                r#"
                UPDATE user_notification_preferences
                SET daily_sent_count = daily_sent_count + 1
                WHERE user_id = $1
                "#,
            )
            .bind(outcome.user_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn append_history(&self, record: &HistoryRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notification_history
                (work_item_id, user_id, channel, status, recorded_at, sent_at, error_message)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.work_item_id)
        .bind(record.user_id)
        .bind(record.channel.as_str())
        .bind(record.status.as_str())
        .bind(record.recorded_at)
        .bind(record.sent_at)
        .bind(&record.error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn increment_daily_count(&self, user_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE user_notification_preferences
            SET daily_sent_count = daily_sent_count + 1
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn enqueue(&self, item: WorkItem) -> Result<Uuid> {
        sqlx::query(
            r#"
            INSERT INTO work_items
                (id, user_id, channel, priority_score, payload, status,
                 scheduled_for, created_at, attempts)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(item.id)
        .bind(item.user_id)
        .bind(item.channel.as_str())
        .bind(item.priority_score)
        .bind(&item.payload)
        .bind(item.status.as_str())
        .bind(item.scheduled_for)
        .bind(item.created_at)
        .bind(item.attempts as i32)
        .execute(&self.pool)
        .await?;
        Ok(item.id)
    }

    async fn prune_expired(&self, horizon: DateTime<Utc>) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let items = sqlx::query(
            r#"
            DELETE FROM work_items
            WHERE status IN ('sent', 'failed') AND created_at < $1
            "#,
        )
        .bind(horizon)
        .execute(&mut *tx)
        .await?;

        // Pruned by recording time so failed attempts age out too
        let history = sqlx::query(
            r#"
            DELETE FROM notification_history
            WHERE recorded_at < $1
            "#,
        )
        .bind(horizon)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(items.rows_affected() + history.rows_affected())
    }

    async fn snapshot_metrics(&self, totals: &HashMap<Channel, ChannelTotals>) -> Result<()> {
        let captured_at = Utc::now();
        let mut tx = self.pool.begin().await?;

        for (channel, counts) in totals {
            sqlx::query(
                r#"
                INSERT INTO channel_metric_snapshots
                    (captured_at, channel, sent_total, failed_total)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(captured_at)
            .bind(channel.as_str())
            .bind(counts.sent as i64)
            .bind(counts.failed as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
