use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use serde::Serialize;

use crate::db::{CreateScheduledStream, ScheduledStream, ScheduledStreamRepository, StreamerRepository};
use crate::error::{AppError, AppResult};
use crate::routes::admin::AdminUser;
use crate::AppState;

const MAX_TITLE_LEN: usize = 140;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/streamers/:id/schedule",
            get(list_schedule).post(create_scheduled_stream),
        )
        .route("/schedule", get(list_upcoming))
        .route("/schedule/:id", delete(delete_scheduled_stream))
}

#[derive(Debug, Serialize)]
pub struct ScheduledStreamView {
    #[serde(flatten)]
    pub stream: ScheduledStream,
    pub duration_seconds: i64,
    pub now: bool,
}

impl From<ScheduledStream> for ScheduledStreamView {
    fn from(stream: ScheduledStream) -> Self {
        Self {
            duration_seconds: stream.duration().num_seconds(),
            now: stream.now(),
            stream,
        }
    }
}

async fn list_schedule(
    _admin: AdminUser,
    State(state): State<Arc<AppState>>,
    Path(streamer_id): Path<String>,
) -> AppResult<Json<Vec<ScheduledStreamView>>> {
    if StreamerRepository::find_by_id(&state.db, &streamer_id).await?.is_none() {
        return Err(AppError::NotFound("Streamer not found".to_string()));
    }

    let streams = ScheduledStreamRepository::find_by_streamer(&state.db, &streamer_id).await?;
    Ok(Json(streams.into_iter().map(Into::into).collect()))
}

/// Every streamer's streams that have not ended yet, earliest first.
async fn list_upcoming(
    _admin: AdminUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<Vec<ScheduledStreamView>>> {
    let streams =
        ScheduledStreamRepository::list_upcoming(&state.db, chrono::Utc::now().naive_utc()).await?;
    Ok(Json(streams.into_iter().map(Into::into).collect()))
}

fn validate(create: &CreateScheduledStream) -> AppResult<()> {
    if create.title.trim().is_empty() {
        return Err(AppError::Validation("title must not be empty".to_string()));
    }
    if create.title.chars().count() > MAX_TITLE_LEN {
        return Err(AppError::Validation(format!(
            "title must be at most {} characters",
            MAX_TITLE_LEN
        )));
    }
    if create
        .category
        .as_ref()
        .is_some_and(|c| c.chars().count() > MAX_TITLE_LEN)
    {
        return Err(AppError::Validation(format!(
            "category must be at most {} characters",
            MAX_TITLE_LEN
        )));
    }
    Ok(())
}

async fn create_scheduled_stream(
    _admin: AdminUser,
    State(state): State<Arc<AppState>>,
    Path(streamer_id): Path<String>,
    Json(create): Json<CreateScheduledStream>,
) -> AppResult<(StatusCode, Json<ScheduledStreamView>)> {
    validate(&create)?;

    if StreamerRepository::find_by_id(&state.db, &streamer_id).await?.is_none() {
        return Err(AppError::NotFound("Streamer not found".to_string()));
    }

    let stream = ScheduledStreamRepository::create(&state.db, &streamer_id, create).await?;
    Ok((StatusCode::CREATED, Json(stream.into())))
}

async fn delete_scheduled_stream(
    _admin: AdminUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    if !ScheduledStreamRepository::delete(&state.db, &id).await? {
        return Err(AppError::NotFound("Scheduled stream not found".to_string()));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::streamer::tests::new_streamer;
    use crate::routes::admin::tests::admin_request;
    use crate::routes::test_support::{body_json, send};
    use crate::services::test_support::test_state;
    use serde_json::json;

    fn app(state: Arc<AppState>) -> Router {
        Router::new().nest("/api", router()).with_state(state)
    }

    #[tokio::test]
    async fn create_list_delete_local_stream() {
        let state = test_state("http://127.0.0.1:9").await;
        let streamer = StreamerRepository::create(&state.db, new_streamer("vortex", "Le Vortex"))
            .await
            .unwrap();
        let uri = format!("/api/streamers/{}/schedule", streamer.id);

        let response = send(
            app(state.clone()),
            admin_request(
                "POST",
                &uri,
                Some(json!({
                    "title": "Dimanche science",
                    "start": "2030-01-06T19:00:00",
                    "end": "2030-01-06T21:00:00",
                    "category": null,
                    "weekly": true,
                    "twitch_segment_id": "ignored"
                })),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;
        assert_eq!(created["duration_seconds"], 7200);
        assert_eq!(created["now"], false);
        assert_eq!(created["twitch_segment_id"], serde_json::Value::Null);

        let listed = body_json(send(app(state.clone()), admin_request("GET", &uri, None)).await).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);
        let upcoming =
            body_json(send(app(state.clone()), admin_request("GET", "/api/schedule", None)).await).await;
        assert_eq!(upcoming[0]["title"], "Dimanche science");

        let delete_uri = format!("/api/schedule/{}", created["id"].as_str().unwrap());
        let response = send(app(state.clone()), admin_request("DELETE", &delete_uri, None)).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let response = send(app(state), admin_request("DELETE", &delete_uri, None)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn rejects_overlong_title_and_unknown_streamer() {
        let state = test_state("http://127.0.0.1:9").await;
        let streamer = StreamerRepository::create(&state.db, new_streamer("vortex", "Le Vortex"))
            .await
            .unwrap();

        let body = json!({
            "title": "x".repeat(141),
            "start": "2030-01-06T19:00:00",
            "end": "2030-01-06T21:00:00"
        });
        let response = send(
            app(state.clone()),
            admin_request("POST", &format!("/api/streamers/{}/schedule", streamer.id), Some(body)),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let response = send(app(state), admin_request("GET", "/api/streamers/nope/schedule", None)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
