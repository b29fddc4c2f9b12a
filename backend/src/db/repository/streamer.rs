use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{CreateStreamer, Streamer};
use crate::error::{AppError, AppResult};

const STREAMER_COLUMNS: &str = r#"
    id, user_id,
    name, twitch_login, twitch_id, description, long_description,
    profile_image, background_image,
    live, live_title, live_game_name, live_preview, live_spectators,
    colours,
    created_at, updated_at
"#;

// ============================================================================
// Streamer Repository
// ============================================================================

pub struct StreamerRepository;

impl StreamerRepository {
    pub async fn create(pool: &SqlitePool, streamer: CreateStreamer) -> AppResult<Streamer> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            INSERT INTO streamers (
                id, name, twitch_login, twitch_id, description, long_description,
                live, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&streamer.name)
        .bind(&streamer.twitch_login)
        .bind(streamer.twitch_id)
        .bind(&streamer.description)
        .bind(&streamer.long_description)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Self::find_by_id(pool, &id)
            .await?
            .ok_or_else(|| AppError::NotFound("Streamer not found".to_string()))
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<Streamer>> {
        sqlx::query_as::<_, Streamer>(&format!(
            "SELECT {} FROM streamers WHERE id = ?",
            STREAMER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn find_by_twitch_login(
        pool: &SqlitePool,
        twitch_login: &str,
    ) -> AppResult<Option<Streamer>> {
        sqlx::query_as::<_, Streamer>(&format!(
            "SELECT {} FROM streamers WHERE lower(twitch_login) = lower(?)",
            STREAMER_COLUMNS
        ))
        .bind(twitch_login)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn find_by_twitch_id(pool: &SqlitePool, twitch_id: i64) -> AppResult<Option<Streamer>> {
        sqlx::query_as::<_, Streamer>(&format!(
            "SELECT {} FROM streamers WHERE twitch_id = ?",
            STREAMER_COLUMNS
        ))
        .bind(twitch_id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    /// All streamers, ordered by name then login.
    pub async fn list_all(pool: &SqlitePool) -> AppResult<Vec<Streamer>> {
        sqlx::query_as::<_, Streamer>(&format!(
            "SELECT {} FROM streamers ORDER BY name, twitch_login",
            STREAMER_COLUMNS
        ))
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Persist every mutable field of `streamer`. Last writer wins.
    pub async fn save(pool: &SqlitePool, streamer: &Streamer) -> AppResult<Streamer> {
        let now = Utc::now().naive_utc();

        let result = sqlx::query(
            r#"
            UPDATE streamers
            SET user_id = ?,
                name = ?,
                twitch_login = ?,
                twitch_id = ?,
                description = ?,
                long_description = ?,
                profile_image = ?,
                background_image = ?,
                live = ?,
                live_title = ?,
                live_game_name = ?,
                live_preview = ?,
                live_spectators = ?,
                colours = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&streamer.user_id)
        .bind(&streamer.name)
        .bind(&streamer.twitch_login)
        .bind(streamer.twitch_id)
        .bind(&streamer.description)
        .bind(&streamer.long_description)
        .bind(&streamer.profile_image)
        .bind(&streamer.background_image)
        .bind(streamer.live)
        .bind(&streamer.live_title)
        .bind(&streamer.live_game_name)
        .bind(&streamer.live_preview)
        .bind(streamer.live_spectators)
        .bind(&streamer.colours)
        .bind(now)
        .bind(&streamer.id)
        .execute(pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                AppError::Conflict("User is already linked to another streamer".to_string())
            }
            other => AppError::Database(other),
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Streamer not found".to_string()));
        }

        Self::find_by_id(pool, &streamer.id)
            .await?
            .ok_or_else(|| AppError::NotFound("Streamer not found".to_string()))
    }

    /// Flip only the `live` flag, leaving the rest of the snapshot untouched.
    pub async fn set_live(pool: &SqlitePool, id: &str, live: bool) -> AppResult<()> {
        let now = Utc::now().naive_utc();

        sqlx::query("UPDATE streamers SET live = ?, updated_at = ? WHERE id = ?")
            .bind(live)
            .bind(now)
            .bind(id)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(())
    }

    /// Delete a streamer. Subscriptions and scheduled streams go with it.
    pub async fn delete(pool: &SqlitePool, id: &str) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM streamers WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }
}
