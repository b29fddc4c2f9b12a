//! Mirroring of Twitch profile data and live status into `streamers`.

use std::collections::HashMap;

use crate::config::PreviewsConfig;
use crate::db::{CreateStreamer, Streamer, StreamerRepository};
use crate::error::{AppError, AppResult};
use crate::services::media::{ImageKind, MediaService};
use crate::services::twitch::{Stream, TwitchUser, HELIX_PAGE_SIZE};
use crate::AppState;

impl Streamer {
    /// Copy a Twitch user payload into this streamer and refresh its images.
    ///
    /// Nothing is persisted; the caller saves the row. An image whose download
    /// fails keeps its previous value (see `MediaService::download_and_store_image`).
    pub async fn update_from_twitch_data(
        &mut self,
        user: &TwitchUser,
        media: &MediaService,
    ) -> AppResult<()> {
        let twitch_id = parse_twitch_id(&user.id)?;

        self.name = user.display_name.clone();
        self.twitch_id = twitch_id;
        self.twitch_login = user.login.clone();
        self.description = user.description.clone();

        media
            .download_and_store_image(
                user.profile_image_url.as_deref(),
                ImageKind::Profile,
                &self.twitch_login,
                &mut self.profile_image,
            )
            .await?;
        media
            .download_and_store_image(
                user.offline_image_url.as_deref(),
                ImageKind::Background,
                &self.twitch_login,
                &mut self.background_image,
            )
            .await?;

        Ok(())
    }

    /// Copy a live stream payload into the `live_*` snapshot. Does not touch `live`.
    pub async fn update_stream_from_twitch_data(
        &mut self,
        stream: &Stream,
        media: &MediaService,
        previews: PreviewsConfig,
    ) -> AppResult<()> {
        self.live_title = Some(stream.title.clone());
        self.live_game_name = Some(stream.game_name.clone());
        self.live_spectators = Some(stream.viewer_count.max(0));

        let thumbnail = preview_url(&stream.thumbnail_url, previews);
        media
            .download_and_store_image(
                Some(&thumbnail),
                ImageKind::LivePreview,
                &self.twitch_login,
                &mut self.live_preview,
            )
            .await?;

        Ok(())
    }
}

fn parse_twitch_id(id: &str) -> AppResult<i64> {
    id.parse::<i64>()
        .ok()
        .filter(|id| *id >= 0)
        .ok_or_else(|| AppError::Validation(format!("Invalid Twitch user id: {:?}", id)))
}

/// Fill Twitch's `{width}x{height}` thumbnail template.
pub fn preview_url(template: &str, previews: PreviewsConfig) -> String {
    template
        .replace("{width}", &previews.width.to_string())
        .replace("{height}", &previews.height.to_string())
}

pub struct StreamerSyncManager;

impl StreamerSyncManager {
    /// Look `login` up on Twitch and register it as a new streamer.
    pub async fn register(
        state: &AppState,
        login: &str,
        long_description: String,
    ) -> AppResult<Streamer> {
        let login = login.trim();
        if login.is_empty() {
            return Err(AppError::Validation("twitch_login must not be empty".to_string()));
        }

        let user = state
            .twitch
            .get_users_by_logins(&[login])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound(format!("Twitch user {} not found", login)))?;

        let twitch_id = parse_twitch_id(&user.id)?;
        if StreamerRepository::find_by_twitch_id(&state.db, twitch_id)
            .await?
            .is_some()
        {
            return Err(AppError::Conflict(format!(
                "Streamer {} is already registered",
                user.login
            )));
        }

        let mut streamer = StreamerRepository::create(
            &state.db,
            CreateStreamer {
                name: user.display_name.clone(),
                twitch_login: user.login.clone(),
                twitch_id,
                description: user.description.clone(),
                long_description,
            },
        )
        .await?;

        streamer.update_from_twitch_data(&user, &state.media).await?;
        let streamer = StreamerRepository::save(&state.db, &streamer).await?;

        tracing::info!("Registered streamer {} ({})", streamer.name, streamer.twitch_login);
        Ok(streamer)
    }

    /// Refresh profiles and live status of every streamer.
    pub async fn sync_all(state: &AppState) -> AppResult<()> {
        Self::sync_profiles(state).await?;
        Self::sync_live_status(state).await
    }

    /// Refresh every streamer's profile from `GET /users`.
    ///
    /// A streamer that fails to update is logged and skipped.
    pub async fn sync_profiles(state: &AppState) -> AppResult<()> {
        let streamers = StreamerRepository::list_all(&state.db).await?;
        tracing::info!("Syncing Twitch profiles of {} streamer(s)", streamers.len());

        for chunk in streamers.chunks(HELIX_PAGE_SIZE) {
            let ids: Vec<String> = chunk.iter().map(|s| s.twitch_id.to_string()).collect();
            let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();

            let users: HashMap<String, TwitchUser> = state
                .twitch
                .get_users_by_ids(&id_refs)
                .await?
                .into_iter()
                .map(|u| (u.id.clone(), u))
                .collect();

            for streamer in chunk {
                let Some(user) = users.get(&streamer.twitch_id.to_string()) else {
                    tracing::warn!(
                        "Twitch user {} ({}) not returned by Twitch; keeping stored profile",
                        streamer.twitch_id,
                        streamer.twitch_login
                    );
                    continue;
                };

                let mut streamer = streamer.clone();
                let result = async {
                    streamer.update_from_twitch_data(user, &state.media).await?;
                    StreamerRepository::save(&state.db, &streamer).await
                }
                .await;

                if let Err(e) = result {
                    tracing::warn!("Failed to sync profile of {}: {:?}", streamer.twitch_login, e);
                }
            }
        }

        Ok(())
    }

    /// Refresh the live snapshot of every streamer from `GET /streams`.
    pub async fn sync_live_status(state: &AppState) -> AppResult<()> {
        let streamers = StreamerRepository::list_all(&state.db).await?;

        for chunk in streamers.chunks(HELIX_PAGE_SIZE) {
            let ids: Vec<String> = chunk.iter().map(|s| s.twitch_id.to_string()).collect();
            let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();

            let streams: HashMap<String, Stream> = state
                .twitch
                .get_streams(&id_refs)
                .await?
                .into_iter()
                .map(|s| (s.user_id.clone(), s))
                .collect();

            for streamer in chunk {
                let result = match streams.get(&streamer.twitch_id.to_string()) {
                    Some(stream) => Self::apply_stream(state, streamer.clone(), stream).await,
                    None if streamer.live => {
                        tracing::info!("{} went offline", streamer.twitch_login);
                        StreamerRepository::set_live(&state.db, &streamer.id, false).await
                    }
                    None => Ok(()),
                };

                if let Err(e) = result {
                    tracing::warn!("Failed to sync live status of {}: {:?}", streamer.twitch_login, e);
                }
            }
        }

        Ok(())
    }

    /// Mark `streamer` live with the snapshot of `stream` and save it.
    pub async fn apply_stream(state: &AppState, mut streamer: Streamer, stream: &Stream) -> AppResult<()> {
        if !streamer.live {
            tracing::info!("{} is live: {}", streamer.twitch_login, stream.title);
        }

        streamer
            .update_stream_from_twitch_data(stream, &state.media, state.config.previews)
            .await?;
        streamer.live = true;
        StreamerRepository::save(&state.db, &streamer).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::streamer::tests::make_streamer;
    use crate::db::repository::streamer::tests::new_streamer;
    use crate::services::media::tests::{spawn_image_host, temp_media};
    use crate::services::test_support::test_state;

    fn vortex_user(host: &str) -> TwitchUser {
        TwitchUser {
            id: "1234".to_string(),
            login: "vortex".to_string(),
            display_name: "Le Vortex".to_string(),
            description: "Des scientifiques en live".to_string(),
            profile_image_url: Some(format!("{}/avatar.png", host)),
            offline_image_url: Some(format!("{}/offline.jpeg", host)),
        }
    }

    #[tokio::test]
    async fn profile_sync_copies_fields_and_images() {
        let host = spawn_image_host().await;
        let media = temp_media();
        let mut streamer = make_streamer("old_login");

        streamer
            .update_from_twitch_data(&vortex_user(&host), &media)
            .await
            .unwrap();

        assert_eq!(streamer.name, "Le Vortex");
        assert_eq!(streamer.twitch_id, 1234);
        assert_eq!(streamer.twitch_login, "vortex");
        assert_eq!(streamer.description, "Des scientifiques en live");
        assert_eq!(streamer.profile_image.as_deref(), Some("twitch/profile/vortex.png"));
        assert_eq!(
            streamer.background_image.as_deref(),
            Some("twitch/background/vortex.jpeg")
        );
        assert_eq!(
            std::fs::read(media.root().join("twitch/background/vortex.jpeg")).unwrap(),
            b"offline-bytes"
        );
    }

    #[tokio::test]
    async fn profile_sync_keeps_images_when_urls_missing_or_failing() {
        let host = spawn_image_host().await;
        let media = temp_media();
        let mut streamer = make_streamer("vortex");
        streamer.profile_image = Some("twitch/profile/vortex.png".to_string());
        streamer.background_image = Some("twitch/background/vortex.jpg".to_string());

        let mut user = vortex_user(&host);
        user.profile_image_url = Some(format!("{}/missing.png", host));
        user.offline_image_url = None;

        streamer.update_from_twitch_data(&user, &media).await.unwrap();

        assert_eq!(streamer.profile_image.as_deref(), Some("twitch/profile/vortex.png"));
        assert_eq!(
            streamer.background_image.as_deref(),
            Some("twitch/background/vortex.jpg")
        );
        assert_eq!(streamer.name, "Le Vortex");
    }

    #[tokio::test]
    async fn unparsable_twitch_id_is_rejected() {
        let media = temp_media();
        let mut streamer = make_streamer("vortex");
        let mut user = vortex_user("http://127.0.0.1:9");
        user.id = "not-a-number".to_string();

        let res = streamer.update_from_twitch_data(&user, &media).await;
        assert!(matches!(res, Err(AppError::Validation(_))));
        assert_eq!(streamer.twitch_login, "vortex");
    }

    #[tokio::test]
    async fn stream_sync_fills_snapshot_and_preview() {
        let host = spawn_image_host().await;
        let media = temp_media();
        let mut streamer = make_streamer("vortex");
        let stream = Stream {
            user_id: "1234".to_string(),
            user_login: "vortex".to_string(),
            title: "Les trous noirs".to_string(),
            game_name: "Science & Technology".to_string(),
            viewer_count: 42,
            thumbnail_url: format!("{}/previews/live_user_vortex-{{width}}x{{height}}.jpg", host),
            started_at: None,
        };

        streamer
            .update_stream_from_twitch_data(&stream, &media, PreviewsConfig { width: 640, height: 360 })
            .await
            .unwrap();

        assert_eq!(streamer.live_title.as_deref(), Some("Les trous noirs"));
        assert_eq!(streamer.live_game_name.as_deref(), Some("Science & Technology"));
        assert_eq!(streamer.live_spectators, Some(42));
        assert_eq!(streamer.live_preview.as_deref(), Some("twitch/live-preview/vortex.jpg"));
        assert!(!streamer.live);
    }

    #[test]
    fn preview_url_substitutes_every_placeholder() {
        let url = preview_url(
            "https://cdn/live_{width}x{height}-{width}.jpg",
            PreviewsConfig { width: 320, height: 180 },
        );
        assert_eq!(url, "https://cdn/live_320x180-320.jpg");
    }

    #[tokio::test]
    async fn register_then_sync_marks_live_and_offline() {
        let host = spawn_image_host().await;
        let state = test_state(&host).await;

        let streamer = StreamerSyncManager::register(&state, "vortex", "Longue description".to_string())
            .await
            .unwrap();
        assert_eq!(streamer.twitch_id, 1234);
        assert_eq!(streamer.long_description, "Longue description");
        assert_eq!(streamer.profile_image.as_deref(), Some("twitch/profile/vortex.png"));

        let again = StreamerSyncManager::register(&state, "vortex", String::new()).await;
        assert!(matches!(again, Err(AppError::Conflict(_))));

        // Not known to the fake Twitch: never live.
        let mut offline = StreamerRepository::create(&state.db, new_streamer("quiet", "Quiet"))
            .await
            .unwrap();
        offline.live = true;
        StreamerRepository::save(&state.db, &offline).await.unwrap();

        StreamerSyncManager::sync_all(&state).await.unwrap();

        let live: Vec<_> = StreamerRepository::list_all(&state.db)
            .await
            .unwrap()
            .into_iter()
            .filter(|s| s.live)
            .collect();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].twitch_login, "vortex");
        assert_eq!(live[0].live_spectators, Some(321));
        assert_eq!(live[0].live_preview.as_deref(), Some("twitch/live-preview/vortex.jpg"));

        let quiet = StreamerRepository::find_by_id(&state.db, &offline.id)
            .await
            .unwrap()
            .unwrap();
        assert!(!quiet.live);
        assert_eq!(quiet.name, "Quiet");
    }

    #[tokio::test]
    async fn registering_unknown_login_is_not_found() {
        let host = spawn_image_host().await;
        let state = test_state(&host).await;

        let res = StreamerSyncManager::register(&state, "nobody", String::new()).await;
        assert!(matches!(res, Err(AppError::NotFound(_))));
    }
}
