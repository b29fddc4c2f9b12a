use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::db::{
    EventSubSubscription, EventSubSubscriptionRepository, StreamerRepository, SubscriptionStatus,
};
use crate::error::{AppError, AppResult};
use crate::services::streamers::StreamerSyncManager;
use crate::services::subscriptions::{SUB_TYPE_STREAM_OFFLINE, SUB_TYPE_STREAM_ONLINE};
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

const TWITCH_MESSAGE_ID_HEADER: &str = "twitch-eventsub-message-id";
const TWITCH_MESSAGE_TIMESTAMP_HEADER: &str = "twitch-eventsub-message-timestamp";
const TWITCH_MESSAGE_SIGNATURE_HEADER: &str = "twitch-eventsub-message-signature";
const TWITCH_MESSAGE_TYPE_HEADER: &str = "twitch-eventsub-message-type";

pub const MESSAGE_TYPE_VERIFICATION: &str = "webhook_callback_verification";
pub const MESSAGE_TYPE_NOTIFICATION: &str = "notification";
pub const MESSAGE_TYPE_REVOCATION: &str = "revocation";

/// Messages whose timestamp is further than this from now are rejected.
const MAX_MESSAGE_AGE_MINUTES: i64 = 10;

#[derive(Debug, Clone)]
pub struct EventSubHeaders {
    pub message_id: String,
    pub timestamp: String,
    pub signature: String,
    pub message_type: String,
}

#[derive(Debug, Deserialize)]
pub struct PayloadSubscription {
    pub id: String,
    #[serde(rename = "type")]
    pub subscription_type: String,
    pub status: String,
    #[serde(default)]
    pub condition: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct EventSubPayload {
    pub subscription: PayloadSubscription,
    pub challenge: Option<String>,
    pub event: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct StreamEvent {
    pub broadcaster_user_id: String,
    pub broadcaster_user_login: String,
}

pub struct WebhookService;

impl WebhookService {
    /// Extract required headers from request
    pub fn extract_headers(headers: &HeaderMap) -> AppResult<EventSubHeaders> {
        Ok(EventSubHeaders {
            message_id: Self::get_header(headers, TWITCH_MESSAGE_ID_HEADER)?,
            timestamp: Self::get_header(headers, TWITCH_MESSAGE_TIMESTAMP_HEADER)?,
            signature: Self::get_header(headers, TWITCH_MESSAGE_SIGNATURE_HEADER)?,
            message_type: Self::get_header(headers, TWITCH_MESSAGE_TYPE_HEADER)?,
        })
    }

    /// Verify a message against the subscription's secret.
    pub fn verify_signature(
        secret: &str,
        headers: &EventSubHeaders,
        body: &[u8],
    ) -> AppResult<()> {
        Self::verify_signature_at(secret, headers, body, Utc::now())
    }

    pub fn verify_signature_at(
        secret: &str,
        headers: &EventSubHeaders,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| AppError::Internal(anyhow::anyhow!("Failed to create HMAC")))?;

        mac.update(headers.message_id.as_bytes());
        mac.update(headers.timestamp.as_bytes());
        mac.update(body);

        let expected_sig = match headers.signature.strip_prefix("sha256=") {
            Some(hex_sig) => hex::decode(hex_sig)
                .map_err(|_| AppError::BadRequest("Invalid signature format".to_string()))?,
            None => return Err(AppError::BadRequest("Invalid signature format".to_string())),
        };

        mac.verify_slice(&expected_sig)
            .map_err(|_| AppError::Unauthorized)?;

        let msg_time = DateTime::parse_from_rfc3339(&headers.timestamp)
            .map_err(|_| AppError::BadRequest("Invalid message timestamp".to_string()))?;
        let diff = now.signed_duration_since(msg_time);
        if diff.num_minutes().abs() > MAX_MESSAGE_AGE_MINUTES {
            return Err(AppError::BadRequest("Message too old".to_string()));
        }

        Ok(())
    }

    /// Authenticate and apply one EventSub message. Returns the response body.
    pub async fn handle(state: &AppState, headers: &HeaderMap, body: &[u8]) -> AppResult<String> {
        let headers = Self::extract_headers(headers)?;

        let payload: EventSubPayload = serde_json::from_slice(body)
            .map_err(|e| AppError::BadRequest(format!("Invalid payload: {}", e)))?;

        let subscription = Self::find_subscription(state, &payload).await?;
        Self::verify_signature(&subscription.secret, &headers, body)?;

        EventSubSubscriptionRepository::touch_last_seen(&state.db, &subscription.id).await?;

        tracing::info!(
            "Received EventSub webhook: message_type={}, subscription_type={}, subscription_id={}",
            headers.message_type,
            payload.subscription.subscription_type,
            payload.subscription.id
        );

        match headers.message_type.as_str() {
            MESSAGE_TYPE_VERIFICATION => Self::handle_verification(state, &subscription, &payload).await,
            MESSAGE_TYPE_NOTIFICATION => {
                Self::handle_notification(state, &subscription, &payload).await?;
                Ok("OK".to_string())
            }
            MESSAGE_TYPE_REVOCATION => {
                tracing::warn!(
                    "Subscription revoked: id={}, type={}, reason={}",
                    payload.subscription.id,
                    payload.subscription.subscription_type,
                    payload.subscription.status
                );
                EventSubSubscriptionRepository::update_status(
                    &state.db,
                    &subscription.id,
                    SubscriptionStatus::Unsubscribed,
                )
                .await?;
                Ok("OK".to_string())
            }
            other => {
                tracing::warn!("Unknown message type: {}", other);
                Ok("OK".to_string())
            }
        }
    }

    /// Find the ledger row a message belongs to.
    ///
    /// Falls back to (broadcaster, type) when Twitch's id is not stored yet: the
    /// verification request may arrive before the create call has returned.
    async fn find_subscription(
        state: &AppState,
        payload: &EventSubPayload,
    ) -> AppResult<EventSubSubscription> {
        if let Some(sub) =
            EventSubSubscriptionRepository::find_by_uuid(&state.db, &payload.subscription.id).await?
        {
            return Ok(sub);
        }

        let broadcaster_id = payload
            .subscription
            .condition
            .get("broadcaster_user_id")
            .and_then(|v| v.as_str())
            .and_then(|id| id.parse::<i64>().ok());

        if let Some(broadcaster_id) = broadcaster_id {
            if let Some(streamer) = StreamerRepository::find_by_twitch_id(&state.db, broadcaster_id).await? {
                let subs = EventSubSubscriptionRepository::find_by_streamer(&state.db, &streamer.id).await?;
                if let Some(sub) = subs
                    .into_iter()
                    .find(|s| s.subscription_type == payload.subscription.subscription_type)
                {
                    return Ok(sub);
                }
            }
        }

        Err(AppError::NotFound(format!(
            "Unknown EventSub subscription {}",
            payload.subscription.id
        )))
    }

    /// Mark the subscription as confirmed and return the challenge to echo.
    pub async fn handle_verification(
        state: &AppState,
        subscription: &EventSubSubscription,
        payload: &EventSubPayload,
    ) -> AppResult<String> {
        let challenge = payload
            .challenge
            .clone()
            .ok_or_else(|| AppError::BadRequest("Missing challenge".to_string()))?;

        EventSubSubscriptionRepository::update_registration(
            &state.db,
            &subscription.id,
            &payload.subscription.id,
            SubscriptionStatus::Subscribed,
        )
        .await?;

        tracing::info!(
            "EventSub {} confirmed: subscription_id={}",
            subscription.subscription_type,
            payload.subscription.id
        );

        Ok(challenge)
    }

    /// Apply a `stream.online` / `stream.offline` notification to the streamer.
    pub async fn handle_notification(
        state: &AppState,
        subscription: &EventSubSubscription,
        payload: &EventSubPayload,
    ) -> AppResult<()> {
        if subscription.status != SubscriptionStatus::Subscribed {
            EventSubSubscriptionRepository::update_status(
                &state.db,
                &subscription.id,
                SubscriptionStatus::Subscribed,
            )
            .await?;
        }

        let Some(streamer) = StreamerRepository::find_by_id(&state.db, &subscription.streamer_id).await? else {
            return Err(AppError::NotFound("Streamer not found".to_string()));
        };

        let event: StreamEvent = payload
            .event
            .clone()
            .ok_or_else(|| AppError::BadRequest("Missing event".to_string()))
            .and_then(|e| {
                serde_json::from_value(e)
                    .map_err(|e| AppError::BadRequest(format!("Invalid event: {}", e)))
            })?;

        match payload.subscription.subscription_type.as_str() {
            SUB_TYPE_STREAM_ONLINE => {
                tracing::info!("{} went online", event.broadcaster_user_login);
                let streams = state.twitch.get_streams(&[event.broadcaster_user_id.as_str()]).await?;
                match streams.first() {
                    Some(stream) => StreamerSyncManager::apply_stream(state, streamer, stream).await?,
                    // Helix can lag behind EventSub; the next live sync fills the snapshot.
                    None => StreamerRepository::set_live(&state.db, &streamer.id, true).await?,
                }
            }
            SUB_TYPE_STREAM_OFFLINE => {
                tracing::info!("{} went offline", event.broadcaster_user_login);
                StreamerRepository::set_live(&state.db, &streamer.id, false).await?;
            }
            other => {
                tracing::warn!("Unhandled EventSub notification type: {}", other);
            }
        }

        Ok(())
    }

    fn get_header(headers: &HeaderMap, name: &str) -> AppResult<String> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .ok_or_else(|| AppError::BadRequest(format!("Missing header: {}", name)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::repository::streamer::tests::new_streamer;
    use crate::db::CreateEventSubSubscription;
    use crate::services::media::tests::spawn_image_host;
    use crate::services::test_support::test_state;
    use axum::http::HeaderValue;
    use chrono::Duration;

    pub(crate) fn sign(secret: &str, message_id: &str, timestamp: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(message_id.as_bytes());
        mac.update(timestamp.as_bytes());
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    pub(crate) fn signed_headers(secret: &str, message_type: &str, body: &[u8]) -> HeaderMap {
        let timestamp = Utc::now().to_rfc3339();
        let message_id = uuid::Uuid::new_v4().to_string();
        let mut headers = HeaderMap::new();
        headers.insert(TWITCH_MESSAGE_ID_HEADER, HeaderValue::from_str(&message_id).unwrap());
        headers.insert(TWITCH_MESSAGE_TIMESTAMP_HEADER, HeaderValue::from_str(&timestamp).unwrap());
        headers.insert(
            TWITCH_MESSAGE_SIGNATURE_HEADER,
            HeaderValue::from_str(&sign(secret, &message_id, &timestamp, body)).unwrap(),
        );
        headers.insert(TWITCH_MESSAGE_TYPE_HEADER, HeaderValue::from_str(message_type).unwrap());
        headers
    }

    fn headers_at(secret: &str, at: DateTime<Utc>, body: &[u8]) -> EventSubHeaders {
        let timestamp = at.to_rfc3339();
        EventSubHeaders {
            message_id: "msg-1".to_string(),
            signature: sign(secret, "msg-1", &timestamp, body),
            timestamp,
            message_type: MESSAGE_TYPE_NOTIFICATION.to_string(),
        }
    }

    #[test]
    fn accepts_valid_signature() {
        let now = Utc::now();
        let headers = headers_at("s3cr3t-s3cr3t", now, b"{}");
        assert!(WebhookService::verify_signature_at("s3cr3t-s3cr3t", &headers, b"{}", now).is_ok());
    }

    #[test]
    fn rejects_wrong_secret_or_tampered_body() {
        let now = Utc::now();
        let headers = headers_at("s3cr3t-s3cr3t", now, b"{}");
        assert!(matches!(
            WebhookService::verify_signature_at("other-secret", &headers, b"{}", now),
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            WebhookService::verify_signature_at("s3cr3t-s3cr3t", &headers, b"{\"a\":1}", now),
            Err(AppError::Unauthorized)
        ));
    }

    #[test]
    fn rejects_stale_messages_and_bad_format() {
        let now = Utc::now();
        let old = headers_at("s3cr3t-s3cr3t", now - Duration::minutes(11), b"{}");
        assert!(matches!(
            WebhookService::verify_signature_at("s3cr3t-s3cr3t", &old, b"{}", now),
            Err(AppError::BadRequest(_))
        ));

        let mut unprefixed = headers_at("s3cr3t-s3cr3t", now, b"{}");
        unprefixed.signature = unprefixed.signature.trim_start_matches("sha256=").to_string();
        assert!(matches!(
            WebhookService::verify_signature_at("s3cr3t-s3cr3t", &unprefixed, b"{}", now),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn missing_header_is_bad_request() {
        let headers = HeaderMap::new();
        assert!(matches!(
            WebhookService::extract_headers(&headers),
            Err(AppError::BadRequest(_))
        ));
    }

    async fn subscribed_streamer(state: &AppState, sub_type: &str) -> (String, EventSubSubscription) {
        let mut create = new_streamer("vortex", "Le Vortex");
        create.twitch_id = 1234;
        let streamer = StreamerRepository::create(&state.db, create).await.unwrap();
        let sub = EventSubSubscriptionRepository::create(
            &state.db,
            &streamer.id,
            CreateEventSubSubscription {
                subscription_type: sub_type.to_string(),
                uuid: String::new(),
                secret: "0123456789abcdef".to_string(),
                status: SubscriptionStatus::Unsubscribed,
            },
        )
        .await
        .unwrap();
        (streamer.id, sub)
    }

    fn payload(sub_type: &str, extra: serde_json::Value) -> Vec<u8> {
        let mut body = serde_json::json!({
            "subscription": {
                "id": format!("twitch-{}", sub_type),
                "type": sub_type,
                "status": "enabled",
                "condition": { "broadcaster_user_id": "1234" }
            }
        });
        if let (Some(obj), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                obj.insert(k.clone(), v.clone());
            }
        }
        serde_json::to_vec(&body).unwrap()
    }

    #[tokio::test]
    async fn verification_before_uuid_is_stored_confirms_subscription() {
        let state = test_state("http://127.0.0.1:9").await;
        let (_, sub) = subscribed_streamer(&state, SUB_TYPE_STREAM_ONLINE).await;

        let body = payload(SUB_TYPE_STREAM_ONLINE, serde_json::json!({ "challenge": "pogchamp" }));
        let headers = signed_headers(&sub.secret, MESSAGE_TYPE_VERIFICATION, &body);

        let reply = WebhookService::handle(&state, &headers, &body).await.unwrap();
        assert_eq!(reply, "pogchamp");

        let stored = EventSubSubscriptionRepository::find_by_id(&state.db, &sub.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, SubscriptionStatus::Subscribed);
        assert_eq!(stored.uuid, "twitch-stream.online");
        assert!(stored.last_seen.is_some());
    }

    #[tokio::test]
    async fn online_then_offline_notifications_toggle_live() {
        let host = spawn_image_host().await;
        let state = test_state(&host).await;
        let (streamer_id, online) = subscribed_streamer(&state, SUB_TYPE_STREAM_ONLINE).await;
        let offline = EventSubSubscriptionRepository::create(
            &state.db,
            &streamer_id,
            CreateEventSubSubscription {
                subscription_type: SUB_TYPE_STREAM_OFFLINE.to_string(),
                uuid: "twitch-stream.offline".to_string(),
                secret: "fedcba9876543210".to_string(),
                status: SubscriptionStatus::Subscribed,
            },
        )
        .await
        .unwrap();

        let event = serde_json::json!({
            "event": { "broadcaster_user_id": "1234", "broadcaster_user_login": "vortex" }
        });

        let body = payload(SUB_TYPE_STREAM_ONLINE, event.clone());
        let headers = signed_headers(&online.secret, MESSAGE_TYPE_NOTIFICATION, &body);
        WebhookService::handle(&state, &headers, &body).await.unwrap();

        let streamer = StreamerRepository::find_by_id(&state.db, &streamer_id).await.unwrap().unwrap();
        assert!(streamer.live);
        assert_eq!(streamer.live_title.as_deref(), Some("Les trous noirs"));

        let body = payload(SUB_TYPE_STREAM_OFFLINE, event);
        let headers = signed_headers(&offline.secret, MESSAGE_TYPE_NOTIFICATION, &body);
        WebhookService::handle(&state, &headers, &body).await.unwrap();

        let streamer = StreamerRepository::find_by_id(&state.db, &streamer_id).await.unwrap().unwrap();
        assert!(!streamer.live);
    }

    #[tokio::test]
    async fn revocation_unsubscribes_and_bad_signature_changes_nothing() {
        let state = test_state("http://127.0.0.1:9").await;
        let (_, sub) = subscribed_streamer(&state, SUB_TYPE_STREAM_OFFLINE).await;

        let body = payload(SUB_TYPE_STREAM_OFFLINE, serde_json::json!({}));
        let forged = signed_headers("not-the-secret", MESSAGE_TYPE_REVOCATION, &body);
        let res = WebhookService::handle(&state, &forged, &body).await;
        assert!(matches!(res, Err(AppError::Unauthorized)));
        let untouched = EventSubSubscriptionRepository::find_by_id(&state.db, &sub.id)
            .await
            .unwrap()
            .unwrap();
        assert!(untouched.last_seen.is_none());

        EventSubSubscriptionRepository::update_status(&state.db, &sub.id, SubscriptionStatus::Subscribed)
            .await
            .unwrap();
        let headers = signed_headers(&sub.secret, MESSAGE_TYPE_REVOCATION, &body);
        WebhookService::handle(&state, &headers, &body).await.unwrap();

        let revoked = EventSubSubscriptionRepository::find_by_id(&state.db, &sub.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(revoked.status, SubscriptionStatus::Unsubscribed);
        assert!(revoked.last_seen.is_some());
    }
}
