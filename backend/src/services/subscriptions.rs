use rand::Rng;
use tracing::{info, warn};

use crate::db::{
    CreateEventSubSubscription, EventSubSubscriptionRepository, Streamer, StreamerRepository,
    SubscriptionStatus,
};
use crate::error::AppResult;
use crate::AppState;

pub const SUB_TYPE_STREAM_ONLINE: &str = "stream.online";
pub const SUB_TYPE_STREAM_OFFLINE: &str = "stream.offline";

/// Topics every streamer is subscribed to.
pub const REQUIRED_SUBSCRIPTIONS: [&str; 2] = [SUB_TYPE_STREAM_ONLINE, SUB_TYPE_STREAM_OFFLINE];

/// Random hex secret Twitch signs a subscription's messages with (10 to 100 chars).
pub fn generate_secret() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    hex::encode(bytes)
}

pub struct SubscriptionManager;

impl SubscriptionManager {
    pub async fn sync_all(state: &AppState) -> AppResult<()> {
        let streamers = StreamerRepository::list_all(&state.db).await?;
        for streamer in &streamers {
            if let Err(e) = Self::sync_for_streamer(state, streamer).await {
                warn!(
                    "Failed to sync EventSub subscriptions for {}: {:?}",
                    streamer.twitch_login, e
                );
            }
        }
        Ok(())
    }

    /// Make the streamer's EventSub ledger match `REQUIRED_SUBSCRIPTIONS`.
    ///
    /// - rows for topics no longer required are deleted on Twitch and locally;
    /// - missing topics get a row with a fresh secret, then a Twitch subscription;
    /// - `unsubscribed` rows (never registered, or revoked) are registered again.
    ///
    /// The row exists before Twitch is called so the verification callback,
    /// which can arrive before `uuid` is stored, finds its secret.
    pub async fn sync_for_streamer(state: &AppState, streamer: &Streamer) -> AppResult<()> {
        let existing = EventSubSubscriptionRepository::find_by_streamer(&state.db, &streamer.id).await?;

        for sub in &existing {
            if REQUIRED_SUBSCRIPTIONS.contains(&sub.subscription_type.as_str()) {
                continue;
            }
            if !sub.uuid.is_empty() {
                if let Err(e) = state.twitch.delete_eventsub_subscription(&sub.uuid).await {
                    warn!(
                        "Failed to delete EventSub {} ({}) on Twitch: {}",
                        sub.subscription_type, sub.uuid, e
                    );
                    continue;
                }
            }
            EventSubSubscriptionRepository::delete(&state.db, &sub.id).await?;
            info!("Removed EventSub {} for {}", sub.subscription_type, streamer.twitch_login);
        }

        let broadcaster_id = streamer.twitch_id.to_string();

        for required in REQUIRED_SUBSCRIPTIONS {
            let sub = match existing.iter().find(|s| s.subscription_type == required) {
                Some(sub) if sub.status != SubscriptionStatus::Unsubscribed => continue,
                Some(sub) => {
                    // Revoked or never confirmed: drop whatever Twitch still has.
                    if !sub.uuid.is_empty() {
                        if let Err(e) = state.twitch.delete_eventsub_subscription(&sub.uuid).await {
                            warn!("Failed to delete stale EventSub {}: {}", sub.uuid, e);
                        }
                    }
                    sub.clone()
                }
                None => {
                    EventSubSubscriptionRepository::create(
                        &state.db,
                        &streamer.id,
                        CreateEventSubSubscription {
                            subscription_type: required.to_string(),
                            uuid: String::new(),
                            secret: generate_secret(),
                            status: SubscriptionStatus::Unsubscribed,
                        },
                    )
                    .await?
                }
            };

            match state
                .twitch
                .create_eventsub_subscription(required, &broadcaster_id, &sub.secret)
                .await
            {
                Ok(created) => {
                    EventSubSubscriptionRepository::record_created(&state.db, &sub.id, &created.id)
                        .await?;
                    info!(
                        "Requested EventSub {} for {} (twitch id={})",
                        required, streamer.twitch_login, created.id
                    );
                }
                Err(e) => {
                    warn!(
                        "Failed to create EventSub {} for {}: {}",
                        required, streamer.twitch_login, e
                    );
                }
            }
        }

        Ok(())
    }
}
