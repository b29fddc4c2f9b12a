//! Startup helpers: database connection + migrations, media root, and the
//! periodic Twitch synchronization workers.

use std::{future::Future, path::Path, sync::Arc, time::Duration};

use anyhow::Result;

use crate::config::Config;
use crate::error::AppResult;
use crate::services::{
    schedule::ScheduleSyncManager, streamers::StreamerSyncManager,
    subscriptions::SubscriptionManager,
};
use crate::AppState;

/// Redact potentially sensitive information from a database URL before logging.
///
/// Attempts to parse the URL and remove userinfo (username:password) components.
/// Falls back to removing everything before '@' or returning "(redacted)".
pub fn redact_db_url(db_url: &str) -> String {
    if let Ok(url) = url::Url::parse(db_url) {
        let scheme = url.scheme();
        let host = url.host_str().unwrap_or("");
        let port_part = url.port().map(|p| format!(":{}", p)).unwrap_or_default();
        let path = url.path();
        format!("{}://{}{}{}", scheme, host, port_part, path)
    } else {
        if let Some(at_pos) = db_url.find('@') {
            let without_creds = &db_url[at_pos + 1..];
            return format!("(redacted){}", without_creds);
        }
        "(redacted)".to_string()
    }
}

/// Initialize SQLite database connection and run migrations.
///
/// Creates the parent directory for the database file (if applicable),
/// opens a connection pool using `create_if_missing(true)` and runs migrations.
pub async fn init_db(config: &Config) -> Result<sqlx::SqlitePool> {
    let db_url = &config.database.url;
    tracing::info!("Connecting to database: {}", redact_db_url(db_url));

    // Extract the file path from the database URL
    let db_path = db_url.strip_prefix("sqlite://").unwrap_or(db_url);
    let db_file_path = Path::new(db_path);

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_file_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                anyhow::anyhow!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                )
            })?;
            tracing::info!(
                "Database directory created or already exists: {}",
                parent.display()
            );
        }
    }

    let connect_options = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true);

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect_with(connect_options)
        .await?;

    // Log successful database file creation or connection
    if db_file_path.exists() {
        tracing::info!(
            "Successfully connected to database file: {}",
            db_file_path.display()
        );
    } else {
        tracing::info!(
            "Database file created successfully: {}",
            db_file_path.display()
        );
    }

    tracing::info!("Running database migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Make sure the media root exists before it is served or written to.
pub fn init_media_root(config: &Config) -> Result<()> {
    let root = Path::new(&config.media.root);
    std::fs::create_dir_all(root).map_err(|e| {
        anyhow::anyhow!("Failed to create media directory {}: {}", root.display(), e)
    })?;
    tracing::info!("Serving media from {} at {}", root.display(), config.media.url);
    Ok(())
}

/// Run every synchronizer once, in dependency order. Used by `POST /api/sync`.
pub async fn run_sync_pass(state: &AppState) -> AppResult<()> {
    StreamerSyncManager::sync_all(state).await?;
    ScheduleSyncManager::sync_all(state).await?;
    SubscriptionManager::sync_all(state).await
}

/// Spawn one periodic worker: runs `job`, then waits `interval` or exits on shutdown.
fn spawn_worker<F, Fut>(
    name: &'static str,
    state: Arc<AppState>,
    shutdown: &tokio::sync::broadcast::Sender<()>,
    interval: Duration,
    job: F,
) -> tokio::task::JoinHandle<()>
where
    F: Fn(Arc<AppState>) -> Fut + Send + 'static,
    Fut: Future<Output = AppResult<()>> + Send + 'static,
{
    let mut shutdown_rx = shutdown.subscribe();
    tokio::spawn(async move {
        loop {
            tracing::info!("Starting periodic {} synchronization", name);

            if let Err(e) = job(state.clone()).await {
                tracing::warn!("{} sync failed: {:?}", name, e);
            }

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("{} sync worker shutting down", name);
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    })
}

/// Spawn background workers:
/// - profile + live status sync
/// - Twitch schedule sync
/// - EventSub subscription sync
///
/// Each worker listens for a shutdown notification via a
/// `tokio::sync::broadcast::Sender<()>`; the returned handles let callers
/// await their exit. Nothing is spawned when `SYNC_ENABLED` is off.
pub fn spawn_background_workers(
    state: Arc<AppState>,
    shutdown: tokio::sync::broadcast::Sender<()>,
) -> Vec<tokio::task::JoinHandle<()>> {
    if !state.config.sync.enabled {
        tracing::info!("Twitch synchronization workers disabled");
        return Vec::new();
    }

    let interval = Duration::from_secs(state.config.sync.interval_seconds.max(1));

    vec![
        spawn_worker("profile", state.clone(), &shutdown, interval, |state| async move {
            StreamerSyncManager::sync_all(&state).await
        }),
        spawn_worker("schedule", state.clone(), &shutdown, interval, |state| async move {
            ScheduleSyncManager::sync_all(&state).await
        }),
        spawn_worker("EventSub", state, &shutdown, interval, |state| async move {
            SubscriptionManager::sync_all(&state).await
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_credentials() {
        assert_eq!(
            redact_db_url("postgres://user:pw@db.local:5432/pog"),
            "postgres://db.local:5432/pog"
        );
        assert_eq!(redact_db_url("::pw@somewhere"), "(redacted)somewhere");
        assert_eq!(redact_db_url("not a url"), "(redacted)");
    }

    #[tokio::test]
    async fn disabled_sync_spawns_nothing() {
        let mut state = crate::services::test_support::test_state("http://127.0.0.1:9").await;
        Arc::get_mut(&mut state).unwrap().config.sync.enabled = false;
        let (tx, _rx) = tokio::sync::broadcast::channel(1);
        assert!(spawn_background_workers(state, tx).is_empty());
    }
}
