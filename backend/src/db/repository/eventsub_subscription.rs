use chrono::{NaiveDateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{CreateEventSubSubscription, EventSubSubscription, SubscriptionStatus};
use crate::error::{AppError, AppResult};

// Intermediate structure for reading from DB (with String for status)
#[derive(sqlx::FromRow)]
struct RowEventSubSubscription {
    id: String,
    streamer_id: String,
    #[sqlx(rename = "type")]
    subscription_type: String,
    uuid: String,
    secret: String,
    status: String,
    last_seen: Option<NaiveDateTime>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

impl From<RowEventSubSubscription> for EventSubSubscription {
    fn from(row: RowEventSubSubscription) -> Self {
        EventSubSubscription {
            id: row.id,
            streamer_id: row.streamer_id,
            subscription_type: row.subscription_type,
            uuid: row.uuid,
            secret: row.secret,
            // The CHECK constraint keeps this in range.
            status: SubscriptionStatus::from_str(&row.status).unwrap_or_default(),
            last_seen: row.last_seen,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const SUBSCRIPTION_COLUMNS: &str =
    "id, streamer_id, type, uuid, secret, status, last_seen, created_at, updated_at";

pub struct EventSubSubscriptionRepository;

impl EventSubSubscriptionRepository {
    /// Create a new EventSub subscription row for `streamer_id`
    pub async fn create(
        pool: &SqlitePool,
        streamer_id: &str,
        subscription: CreateEventSubSubscription,
    ) -> AppResult<EventSubSubscription> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            INSERT INTO eventsub_subscriptions (
                id, streamer_id, type, uuid, secret, status, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(streamer_id)
        .bind(&subscription.subscription_type)
        .bind(&subscription.uuid)
        .bind(&subscription.secret)
        .bind(subscription.status.as_str())
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Self::find_by_id(pool, &id)
            .await?
            .ok_or_else(|| AppError::NotFound("EventSub subscription not found".to_string()))
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<EventSubSubscription>> {
        let row = sqlx::query_as::<_, RowEventSubSubscription>(&format!(
            "SELECT {} FROM eventsub_subscriptions WHERE id = ?",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row.map(Into::into))
    }

    /// Find a subscription by the id Twitch assigned to it
    pub async fn find_by_uuid(
        pool: &SqlitePool,
        uuid: &str,
    ) -> AppResult<Option<EventSubSubscription>> {
        let row = sqlx::query_as::<_, RowEventSubSubscription>(&format!(
            "SELECT {} FROM eventsub_subscriptions WHERE uuid = ?",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(uuid)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row.map(Into::into))
    }

    /// List all subscriptions for a streamer
    pub async fn find_by_streamer(
        pool: &SqlitePool,
        streamer_id: &str,
    ) -> AppResult<Vec<EventSubSubscription>> {
        let rows = sqlx::query_as::<_, RowEventSubSubscription>(&format!(
            "SELECT {} FROM eventsub_subscriptions WHERE streamer_id = ? ORDER BY type",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(streamer_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Record the Twitch-assigned id and status after a (re)subscription attempt.
    pub async fn update_registration(
        pool: &SqlitePool,
        id: &str,
        uuid: &str,
        status: SubscriptionStatus,
    ) -> AppResult<()> {
        let now = Utc::now().naive_utc();

        sqlx::query("UPDATE eventsub_subscriptions SET uuid = ?, status = ?, updated_at = ? WHERE id = ?")
            .bind(uuid)
            .bind(status.as_str())
            .bind(now)
            .bind(id)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(())
    }

    /// Store the id Twitch returned from a create call. Only an `unsubscribed`
    /// row moves to `pending`; a verification handled meanwhile keeps `subscribed`.
    pub async fn record_created(pool: &SqlitePool, id: &str, uuid: &str) -> AppResult<()> {
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            UPDATE eventsub_subscriptions
            SET uuid = ?,
                status = CASE WHEN status = ? THEN ? ELSE status END,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(uuid)
        .bind(SubscriptionStatus::Unsubscribed.as_str())
        .bind(SubscriptionStatus::Pending.as_str())
        .bind(now)
        .bind(id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    pub async fn update_status(
        pool: &SqlitePool,
        id: &str,
        status: SubscriptionStatus,
    ) -> AppResult<()> {
        let now = Utc::now().naive_utc();

        sqlx::query("UPDATE eventsub_subscriptions SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(now)
            .bind(id)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(())
    }

    /// Mark the subscription as just heard from.
    pub async fn touch_last_seen(pool: &SqlitePool, id: &str) -> AppResult<()> {
        let now = Utc::now().naive_utc();

        sqlx::query("UPDATE eventsub_subscriptions SET last_seen = ?, updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(())
    }

    /// Delete a subscription
    pub async fn delete(pool: &SqlitePool, id: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM eventsub_subscriptions WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(())
    }
}
