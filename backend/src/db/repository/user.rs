use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{CreateUser, User};
use crate::error::{AppError, AppResult};

// ============================================================================
// User Repository
// ============================================================================

pub struct UserRepository;

impl UserRepository {
    pub async fn create(pool: &SqlitePool, user: CreateUser) -> AppResult<User> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                AppError::Conflict(format!("Username {} is already taken", user.username))
            }
            other => AppError::Database(other),
        })?;

        Self::find_by_id(pool, &id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<User>> {
        sqlx::query_as::<_, User>(
            "SELECT id, username, email, created_at, updated_at FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Delete an account. A linked streamer survives with its link cleared.
    pub async fn delete(pool: &SqlitePool, id: &str) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::streamer::tests::new_streamer;
    use crate::db::{test_pool, StreamerRepository};

    fn new_user(username: &str) -> CreateUser {
        CreateUser {
            username: username.to_string(),
            email: None,
        }
    }

    #[tokio::test]
    async fn deleting_user_unlinks_streamer() {
        let pool = test_pool().await;
        let user = UserRepository::create(&pool, new_user("ludo")).await.unwrap();
        let mut streamer = StreamerRepository::create(&pool, new_streamer("ludo", "Ludo"))
            .await
            .unwrap();

        streamer.user_id = Some(user.id.clone());
        StreamerRepository::save(&pool, &streamer).await.unwrap();

        assert!(UserRepository::delete(&pool, &user.id).await.unwrap());

        let reloaded = StreamerRepository::find_by_id(&pool, &streamer.id)
            .await
            .unwrap()
            .expect("streamer survives account deletion");
        assert!(reloaded.user_id.is_none());
    }

    #[tokio::test]
    async fn a_user_links_to_at_most_one_streamer() {
        let pool = test_pool().await;
        let user = UserRepository::create(&pool, new_user("ludo")).await.unwrap();

        let mut first = StreamerRepository::create(&pool, new_streamer("one", "One")).await.unwrap();
        let mut second = StreamerRepository::create(&pool, new_streamer("two", "Two")).await.unwrap();

        first.user_id = Some(user.id.clone());
        StreamerRepository::save(&pool, &first).await.unwrap();

        second.user_id = Some(user.id.clone());
        assert!(StreamerRepository::save(&pool, &second).await.is_err());
    }

    #[tokio::test]
    async fn duplicate_username_is_a_conflict() {
        let pool = test_pool().await;
        UserRepository::create(&pool, new_user("ludo")).await.unwrap();
        let res = UserRepository::create(&pool, new_user("ludo")).await;
        assert!(matches!(res, Err(AppError::Conflict(_))));
    }
}
