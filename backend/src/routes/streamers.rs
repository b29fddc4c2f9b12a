use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::db::{
    Colour, EventSubSubscriptionRepository, StreamerRepository, SubscriptionStatus,
    UpdateStreamer, UserRepository, PALETTE_SIZE,
};
use crate::error::{AppError, AppResult};
use crate::routes::admin::AdminUser;
use crate::routes::home::StreamerView;
use crate::services::streamers::StreamerSyncManager;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/streamers", axum::routing::post(create_streamer))
        .route(
            "/streamers/:id",
            get(get_streamer).patch(update_streamer).delete(delete_streamer),
        )
        .route("/streamers/:id/subscriptions", get(list_subscriptions))
}

#[derive(Debug, Deserialize)]
pub struct CreateStreamerRequest {
    pub twitch_login: String,
    #[serde(default)]
    pub long_description: String,
}

async fn create_streamer(
    _admin: AdminUser,
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateStreamerRequest>,
) -> AppResult<(StatusCode, Json<StreamerView>)> {
    let streamer =
        StreamerSyncManager::register(&state, &request.twitch_login, request.long_description).await?;
    Ok((StatusCode::CREATED, Json(StreamerView::new(&streamer, &state.media))))
}

async fn get_streamer(
    _admin: AdminUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<StreamerView>> {
    let streamer = StreamerRepository::find_by_id(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::NotFound("Streamer not found".to_string()))?;
    Ok(Json(StreamerView::new(&streamer, &state.media)))
}

fn validate_colours(colours: &[Colour]) -> AppResult<()> {
    if colours.len() > PALETTE_SIZE {
        return Err(AppError::Validation(format!(
            "At most {} colours are allowed",
            PALETTE_SIZE
        )));
    }
    if colours.iter().flatten().any(|v| !(0.0..=1.0).contains(v)) {
        return Err(AppError::Validation(
            "Colour components must be between 0 and 1".to_string(),
        ));
    }
    Ok(())
}

async fn update_streamer(
    _admin: AdminUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(update): Json<UpdateStreamer>,
) -> AppResult<Json<StreamerView>> {
    let mut streamer = StreamerRepository::find_by_id(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::NotFound("Streamer not found".to_string()))?;

    if let Some(long_description) = update.long_description {
        streamer.long_description = long_description;
    }

    if let Some(user_id) = update.user_id {
        if let Some(ref user_id) = user_id {
            if UserRepository::find_by_id(&state.db, user_id).await?.is_none() {
                return Err(AppError::Validation(format!("Unknown user {}", user_id)));
            }
        }
        streamer.user_id = user_id;
    }

    if let Some(colours) = update.colours {
        validate_colours(&colours)?;
        streamer.set_colours(&colours);
    }

    let streamer = StreamerRepository::save(&state.db, &streamer).await?;
    Ok(Json(StreamerView::new(&streamer, &state.media)))
}

async fn delete_streamer(
    _admin: AdminUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let streamer = StreamerRepository::find_by_id(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::NotFound("Streamer not found".to_string()))?;

    // Twitch keeps sending notifications until its subscriptions are deleted too.
    for sub in EventSubSubscriptionRepository::find_by_streamer(&state.db, &id).await? {
        if sub.uuid.is_empty() {
            continue;
        }
        if let Err(e) = state.twitch.delete_eventsub_subscription(&sub.uuid).await {
            tracing::warn!("Failed to delete EventSub {} on Twitch: {}", sub.uuid, e);
        }
    }

    if !StreamerRepository::delete(&state.db, &id).await? {
        return Err(AppError::NotFound("Streamer not found".to_string()));
    }

    for image in [&streamer.profile_image, &streamer.background_image, &streamer.live_preview]
        .into_iter()
        .flatten()
    {
        if let Err(e) = state.media.remove(image).await {
            tracing::warn!("Failed to remove media file {}: {:?}", image, e);
        }
    }

    tracing::info!("Deleted streamer {} ({})", streamer.name, streamer.twitch_login);
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct SubscriptionView {
    pub id: String,
    #[serde(rename = "type")]
    pub subscription_type: String,
    pub uuid: String,
    pub status: SubscriptionStatus,
    pub last_seen: Option<NaiveDateTime>,
    pub last_seen_since_seconds: Option<i64>,
}

async fn list_subscriptions(
    _admin: AdminUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<SubscriptionView>>> {
    if StreamerRepository::find_by_id(&state.db, &id).await?.is_none() {
        return Err(AppError::NotFound("Streamer not found".to_string()));
    }

    let subs = EventSubSubscriptionRepository::find_by_streamer(&state.db, &id).await?;
    Ok(Json(
        subs.into_iter()
            .map(|sub| SubscriptionView {
                last_seen_since_seconds: sub.last_seen_since().map(|d| d.num_seconds()),
                id: sub.id,
                subscription_type: sub.subscription_type,
                uuid: sub.uuid,
                status: sub.status,
                last_seen: sub.last_seen,
            })
            .collect(),
    ))
}
