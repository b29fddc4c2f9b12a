use chrono::{NaiveDateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{CreateScheduledStream, ScheduledStream};
use crate::error::{AppError, AppResult};

const SCHEDULED_STREAM_COLUMNS: &str = r#"
    id, streamer_id, title, start_time, end_time, category, weekly,
    twitch_segment_id, google_calendar_event_id, created_at, updated_at
"#;

/// Remote system a scheduled stream may be correlated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalSource {
    TwitchSegment,
    GoogleCalendar,
}

impl ExternalSource {
    fn column(self) -> &'static str {
        match self {
            ExternalSource::TwitchSegment => "twitch_segment_id",
            ExternalSource::GoogleCalendar => "google_calendar_event_id",
        }
    }
}

/// Repository for the scheduled streams registry (`scheduled_streams` table).
pub struct ScheduledStreamRepository;

impl ScheduledStreamRepository {
    /// Insert a local-only scheduled stream (no external id).
    pub async fn create(
        pool: &SqlitePool,
        streamer_id: &str,
        create: CreateScheduledStream,
    ) -> AppResult<ScheduledStream> {
        Self::insert(pool, streamer_id, &create, None).await
    }

    async fn insert(
        pool: &SqlitePool,
        streamer_id: &str,
        create: &CreateScheduledStream,
        external: Option<(ExternalSource, &str)>,
    ) -> AppResult<ScheduledStream> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        let twitch_segment_id = external
            .filter(|(source, _)| *source == ExternalSource::TwitchSegment)
            .map(|(_, id)| id.to_string());
        let google_calendar_event_id = external
            .filter(|(source, _)| *source == ExternalSource::GoogleCalendar)
            .map(|(_, id)| id.to_string());

        sqlx::query(
            r#"
            INSERT INTO scheduled_streams (
                id, streamer_id, title, start_time, end_time, category, weekly,
                twitch_segment_id, google_calendar_event_id, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(streamer_id)
        .bind(&create.title)
        .bind(create.start)
        .bind(create.end)
        .bind(&create.category)
        .bind(create.weekly)
        .bind(twitch_segment_id)
        .bind(google_calendar_event_id)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Self::find_by_id(pool, &id)
            .await?
            .ok_or_else(|| AppError::NotFound("Scheduled stream not found".to_string()))
    }

    /// Create or update the row correlated with `external_id` from `source`.
    ///
    /// Repeated sync passes over the same remote entry update a single row.
    pub async fn upsert_external(
        pool: &SqlitePool,
        streamer_id: &str,
        source: ExternalSource,
        external_id: &str,
        create: CreateScheduledStream,
    ) -> AppResult<ScheduledStream> {
        let existing = Self::find_by_external_id(pool, streamer_id, source, external_id).await?;

        let Some(existing) = existing else {
            return Self::insert(pool, streamer_id, &create, Some((source, external_id))).await;
        };

        let now = Utc::now().naive_utc();
        sqlx::query(
            r#"
            UPDATE scheduled_streams
            SET title = ?,
                start_time = ?,
                end_time = ?,
                category = ?,
                weekly = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&create.title)
        .bind(create.start)
        .bind(create.end)
        .bind(&create.category)
        .bind(create.weekly)
        .bind(now)
        .bind(&existing.id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Self::find_by_id(pool, &existing.id)
            .await?
            .ok_or_else(|| AppError::NotFound("Scheduled stream not found".to_string()))
    }

    pub async fn upsert_twitch_segment(
        pool: &SqlitePool,
        streamer_id: &str,
        twitch_segment_id: &str,
        create: CreateScheduledStream,
    ) -> AppResult<ScheduledStream> {
        Self::upsert_external(
            pool,
            streamer_id,
            ExternalSource::TwitchSegment,
            twitch_segment_id,
            create,
        )
        .await
    }

    pub async fn upsert_google_calendar_event(
        pool: &SqlitePool,
        streamer_id: &str,
        google_calendar_event_id: &str,
        create: CreateScheduledStream,
    ) -> AppResult<ScheduledStream> {
        Self::upsert_external(
            pool,
            streamer_id,
            ExternalSource::GoogleCalendar,
            google_calendar_event_id,
            create,
        )
        .await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<ScheduledStream>> {
        sqlx::query_as::<_, ScheduledStream>(&format!(
            "SELECT {} FROM scheduled_streams WHERE id = ?",
            SCHEDULED_STREAM_COLUMNS
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn find_by_external_id(
        pool: &SqlitePool,
        streamer_id: &str,
        source: ExternalSource,
        external_id: &str,
    ) -> AppResult<Option<ScheduledStream>> {
        sqlx::query_as::<_, ScheduledStream>(&format!(
            "SELECT {} FROM scheduled_streams WHERE streamer_id = ? AND {} = ?",
            SCHEDULED_STREAM_COLUMNS,
            source.column()
        ))
        .bind(streamer_id)
        .bind(external_id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    /// A streamer's schedule, earliest first.
    pub async fn find_by_streamer(
        pool: &SqlitePool,
        streamer_id: &str,
    ) -> AppResult<Vec<ScheduledStream>> {
        sqlx::query_as::<_, ScheduledStream>(&format!(
            "SELECT {} FROM scheduled_streams WHERE streamer_id = ? ORDER BY start_time",
            SCHEDULED_STREAM_COLUMNS
        ))
        .bind(streamer_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Streams of every streamer that have not ended yet at `now`, earliest first.
    pub async fn list_upcoming(
        pool: &SqlitePool,
        now: NaiveDateTime,
    ) -> AppResult<Vec<ScheduledStream>> {
        sqlx::query_as::<_, ScheduledStream>(&format!(
            "SELECT {} FROM scheduled_streams WHERE end_time > ? ORDER BY start_time",
            SCHEDULED_STREAM_COLUMNS
        ))
        .bind(now)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Delete the streamer's Twitch-sourced rows whose segment is not in `keep`.
    ///
    /// Local-only rows and Google Calendar rows are left alone.
    pub async fn delete_stale_twitch_segments(
        pool: &SqlitePool,
        streamer_id: &str,
        keep: &[String],
    ) -> AppResult<u64> {
        let mut deleted = 0;
        let existing = Self::find_by_streamer(pool, streamer_id).await?;

        for stream in existing {
            let Some(segment_id) = stream.twitch_segment_id.as_ref() else {
                continue;
            };
            if keep.contains(segment_id) {
                continue;
            }
            if Self::delete(pool, &stream.id).await? {
                deleted += 1;
            }
        }

        Ok(deleted)
    }

    pub async fn delete(pool: &SqlitePool, id: &str) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM scheduled_streams WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }
}
