use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::db::{Colour, Streamer, StreamerRepository};
use crate::error::AppResult;
use crate::services::media::MediaService;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/home", get(home))
}

/// Public representation of a streamer; image fields are absolute media URLs.
#[derive(Debug, Clone, Serialize)]
pub struct StreamerView {
    pub id: String,
    pub name: String,
    pub twitch_login: String,
    pub twitch_url: String,
    pub description: String,
    pub long_description: String,
    pub profile_image: Option<String>,
    pub background_image: Option<String>,
    pub live: bool,
    pub live_title: Option<String>,
    pub live_game_name: Option<String>,
    pub live_preview: Option<String>,
    pub live_spectators: Option<i64>,
    pub colours: Vec<Colour>,
}

impl StreamerView {
    pub fn new(streamer: &Streamer, media: &MediaService) -> Self {
        let url = |name: &Option<String>| name.as_deref().map(|n| media.url(n));

        Self {
            id: streamer.id.clone(),
            name: streamer.name.clone(),
            twitch_login: streamer.twitch_login.clone(),
            twitch_url: streamer.twitch_url(),
            description: streamer.description.clone(),
            long_description: streamer.long_description.clone(),
            profile_image: url(&streamer.profile_image),
            background_image: url(&streamer.background_image),
            live: streamer.live,
            live_title: streamer.live_title.clone(),
            live_game_name: streamer.live_game_name.clone(),
            live_preview: url(&streamer.live_preview),
            live_spectators: streamer.live_spectators,
            colours: streamer.colours(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HomeResponse {
    pub streamers: Vec<StreamerView>,
    pub live_streamers: Vec<StreamerView>,
}

async fn home(State(state): State<Arc<AppState>>) -> AppResult<Json<HomeResponse>> {
    let streamers: Vec<StreamerView> = StreamerRepository::list_all(&state.db)
        .await?
        .iter()
        .map(|s| StreamerView::new(s, &state.media))
        .collect();

    // One read, so every live entry is also in `streamers`.
    let live_streamers = streamers
        .iter()
        .filter(|s| s.live)
        .cloned()
        .collect();

    Ok(Json(HomeResponse {
        streamers,
        live_streamers,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::streamer::tests::new_streamer;
    use crate::routes::test_support::{body_json, send};
    use crate::services::test_support::test_state;
    use axum::{body::Body, http::Request, http::StatusCode};

    #[tokio::test]
    async fn home_lists_all_streamers_and_live_subset() {
        let state = test_state("http://127.0.0.1:9").await;
        for (login, name, live) in [("zeta", "Zeta", true), ("alpha", "Alpha", false), ("mid", "Mid", true)] {
            let mut streamer = StreamerRepository::create(&state.db, new_streamer(login, name))
                .await
                .unwrap();
            streamer.live = live;
            streamer.profile_image = Some(format!("twitch/profile/{}.png", login));
            StreamerRepository::save(&state.db, &streamer).await.unwrap();
        }

        let app = Router::new().nest("/api", router()).with_state(state);
        let response = send(
            app,
            Request::builder().uri("/api/home").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        let names = |key: &str| -> Vec<String> {
            body[key]
                .as_array()
                .unwrap()
                .iter()
                .map(|s| s["name"].as_str().unwrap().to_string())
                .collect()
        };
        assert_eq!(names("streamers"), vec!["Alpha", "Mid", "Zeta"]);
        assert_eq!(names("live_streamers"), vec!["Mid", "Zeta"]);
        for live in body["live_streamers"].as_array().unwrap() {
            assert_eq!(live["live"], true);
            assert!(body["streamers"].as_array().unwrap().contains(live));
        }
        assert_eq!(body["streamers"][0]["profile_image"], "/media/twitch/profile/alpha.png");
        assert_eq!(body["streamers"][0]["twitch_url"], "https://twitch.tv/alpha");
        assert_eq!(body["streamers"][0]["live_preview"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn home_is_empty_without_streamers() {
        let state = test_state("http://127.0.0.1:9").await;
        let app = Router::new().nest("/api", router()).with_state(state);
        let body = body_json(
            send(app, Request::builder().uri("/api/home").body(Body::empty()).unwrap()).await,
        )
        .await;
        assert_eq!(body["streamers"], serde_json::json!([]));
        assert_eq!(body["live_streamers"], serde_json::json!([]));
    }
}
