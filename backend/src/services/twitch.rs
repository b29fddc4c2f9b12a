use chrono::{Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::error::{AppError, AppResult};

/// Helix accepts at most this many `id` / `user_id` / `login` query parameters.
pub const HELIX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct TwitchService {
    client: Client,
    client_id: String,
    client_secret: String,
    webhook_url: String,
    auth_url: String,
    api_url: String,
    app_access_token: Arc<RwLock<Option<AppAccessToken>>>,
}

#[derive(Debug, Clone)]
pub struct AppAccessToken {
    pub token: String,
    pub expires_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct AppAccessTokenResponse {
    pub access_token: String,
    pub expires_in: i64,
}

// ============================================================================
// User Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct TwitchUsersResponse {
    pub data: Vec<TwitchUser>,
}

/// `GET /users` entry. Every field but the two images is required.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TwitchUser {
    pub id: String,
    pub login: String,
    pub display_name: String,
    pub description: String,
    pub profile_image_url: Option<String>,
    pub offline_image_url: Option<String>,
}

// ============================================================================
// Stream Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StreamsResponse {
    pub data: Vec<Stream>,
}

/// `GET /streams` entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Stream {
    pub user_id: String,
    pub user_login: String,
    pub title: String,
    pub game_name: String,
    pub viewer_count: i64,
    /// Contains literal `{width}` and `{height}` placeholders.
    pub thumbnail_url: String,
    #[serde(default)]
    pub started_at: Option<String>,
}

// ============================================================================
// EventSub Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct CreateEventSubRequest {
    #[serde(rename = "type")]
    pub subscription_type: String,
    pub version: String,
    pub condition: serde_json::Value,
    pub transport: EventSubTransport,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSubTransport {
    pub method: String,
    pub callback: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EventSubResponse {
    pub data: Vec<EventSubSubscription>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventSubSubscription {
    pub id: String,
    pub status: String,
    #[serde(rename = "type")]
    pub subscription_type: String,
    pub version: String,
    pub condition: serde_json::Value,
    pub created_at: String,
}

// ============================================================================
// Schedule Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ScheduleResponse {
    pub data: ScheduleData,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleData {
    /// `null` while the broadcaster is on vacation.
    pub segments: Option<Vec<ScheduleSegment>>,
    pub broadcaster_id: String,
    pub broadcaster_login: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleSegment {
    pub id: String,
    pub start_time: String,
    pub end_time: Option<String>,
    pub title: String,
    pub canceled_until: Option<String>,
    pub category: Option<ScheduleCategory>,
    pub is_recurring: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleCategory {
    pub id: String,
    pub name: String,
}

impl TwitchService {
    pub fn new(config: &Config) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Internal(e.into()))?;

        Ok(Self {
            client,
            client_id: config.twitch.client_id.clone(),
            client_secret: config.twitch.client_secret.clone(),
            webhook_url: config.server.webhook_url.clone(),
            auth_url: config.twitch.auth_url.trim_end_matches('/').to_string(),
            api_url: config.twitch.api_url.trim_end_matches('/').to_string(),
            app_access_token: Arc::new(RwLock::new(None)),
        })
    }

    // ========================================================================
    // OAuth Methods
    // ========================================================================

    /// Fetch a new app access token (client credentials) and cache it.
    pub async fn refresh_app_access_token(&self) -> AppResult<()> {
        let response = self
            .send_with_backoff(|| {
                self.client
                    .post(format!("{}/token", self.auth_url))
                    .form(&[
                        ("client_id", self.client_id.as_str()),
                        ("client_secret", self.client_secret.as_str()),
                        ("grant_type", "client_credentials"),
                    ])
            })
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::TwitchApi(format!(
                "Failed to get app access token: {}",
                error_text
            )));
        }

        let token_response: AppAccessTokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::TwitchApi(format!("Failed to parse token response: {}", e)))?;

        let expires_at = Utc::now() + Duration::seconds(token_response.expires_in);
        let token = AppAccessToken {
            token: token_response.access_token,
            expires_at,
        };

        let mut guard = self.app_access_token.write().await;
        *guard = Some(token);

        tracing::info!(
            "Refreshed Twitch app access token; expires at {}",
            expires_at
        );

        Ok(())
    }

    /// Get a valid app access token, refreshing it if it would expire soon.
    pub async fn get_valid_app_access_token(&self) -> AppResult<String> {
        const REFRESH_MARGIN_SECS: i64 = 60; // refresh 60 seconds before expiry

        // Fast path: check under a read lock
        {
            let guard = self.app_access_token.read().await;
            if let Some(ref t) = *guard {
                if t.expires_at - Duration::seconds(REFRESH_MARGIN_SECS) > Utc::now() {
                    return Ok(t.token.clone());
                }
            }
        }

        self.refresh_app_access_token().await?;

        let guard = self.app_access_token.read().await;
        if let Some(ref t) = *guard {
            Ok(t.token.clone())
        } else {
            Err(AppError::TwitchApi(
                "No app access token available".to_string(),
            ))
        }
    }

    /// Send a request, retrying on 429, 5xx and network errors with exponential backoff.
    async fn send_with_backoff<F>(&self, make_request: F) -> AppResult<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        const MAX_RETRIES: usize = 5;
        let mut backoff_secs: u64 = 1;
        let max_backoff_secs: u64 = 60;

        for attempt in 0..MAX_RETRIES {
            match (make_request)().send().await {
                Ok(resp) => {
                    if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS
                        || resp.status().is_server_error()
                    {
                        // Respect Retry-After header if present
                        let wait_secs = resp
                            .headers()
                            .get("retry-after")
                            .and_then(|h| h.to_str().ok())
                            .and_then(|s| s.parse::<u64>().ok())
                            .unwrap_or(backoff_secs);

                        tracing::warn!(
                            "Transient Twitch error (status: {}). Retrying in {}s (attempt {}/{})",
                            resp.status(),
                            wait_secs,
                            attempt + 1,
                            MAX_RETRIES
                        );

                        if attempt + 1 >= MAX_RETRIES {
                            let err_text = resp.text().await.unwrap_or_default();
                            return Err(AppError::TwitchApi(format!(
                                "Failed after {} attempts: {}",
                                attempt + 1,
                                err_text
                            )));
                        }

                        tokio::time::sleep(std::time::Duration::from_secs(wait_secs)).await;
                        backoff_secs = std::cmp::min(backoff_secs * 2, max_backoff_secs);
                        continue;
                    }

                    // Non-transient statuses are left to the caller.
                    return Ok(resp);
                }
                Err(e) => {
                    if attempt + 1 >= MAX_RETRIES {
                        return Err(e.into());
                    }
                    tracing::warn!(
                        "HTTP request failed: {}. Retrying in {}s (attempt {}/{})",
                        e,
                        backoff_secs,
                        attempt + 1,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(backoff_secs)).await;
                    backoff_secs = std::cmp::min(backoff_secs * 2, max_backoff_secs);
                    continue;
                }
            }
        }

        Err(AppError::TwitchApi(
            "Exceeded Twitch retry attempts".to_string(),
        ))
    }

    /// Run a request with the app access token, refreshing it once on 401.
    async fn send_app_request_with_token<F>(&self, make_request: F) -> AppResult<reqwest::Response>
    where
        F: Fn(&str) -> reqwest::RequestBuilder,
    {
        let mut refreshed_token = false;
        for _attempt_round in 0..2 {
            let token = self.get_valid_app_access_token().await?;
            let response = self.send_with_backoff(|| make_request(&token)).await?;

            if response.status() == reqwest::StatusCode::UNAUTHORIZED {
                if !refreshed_token {
                    tracing::warn!(
                        "Unauthorized Twitch app request. Refreshing token and retrying."
                    );
                    self.refresh_app_access_token().await?;
                    refreshed_token = true;
                    continue;
                }
                let error_text = response.text().await.unwrap_or_default();
                return Err(AppError::TwitchApi(format!(
                    "Unauthorized Twitch app request: {}",
                    error_text
                )));
            }

            return Ok(response);
        }

        Err(AppError::TwitchApi(
            "Failed to perform Twitch app request after retries".to_string(),
        ))
    }

    async fn get_helix<T>(&self, path_and_query: &str, what: &str) -> AppResult<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = self
            .send_app_request_with_token(|token| {
                self.client
                    .get(format!("{}{}", self.api_url, path_and_query))
                    .header("Authorization", format!("Bearer {}", token))
                    .header("Client-Id", &self.client_id)
            })
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::TwitchApi(format!(
                "Failed to get {}: {}",
                what, error_text
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AppError::TwitchApi(format!("Failed to parse {} response: {}", what, e)))
    }

    // ========================================================================
    // User Methods
    // ========================================================================

    /// Get users by IDs (at most `HELIX_PAGE_SIZE`)
    pub async fn get_users_by_ids(&self, user_ids: &[&str]) -> AppResult<Vec<TwitchUser>> {
        if user_ids.is_empty() {
            return Ok(vec![]);
        }

        let query = repeat_param("id", user_ids);
        let users: TwitchUsersResponse = self.get_helix(&format!("/users?{}", query), "users").await?;
        Ok(users.data)
    }

    /// Get users by logins (at most `HELIX_PAGE_SIZE`)
    pub async fn get_users_by_logins(&self, logins: &[&str]) -> AppResult<Vec<TwitchUser>> {
        if logins.is_empty() {
            return Ok(vec![]);
        }

        let query = repeat_param("login", logins);
        let users: TwitchUsersResponse = self.get_helix(&format!("/users?{}", query), "users").await?;
        Ok(users.data)
    }

    // ========================================================================
    // Stream Methods
    // ========================================================================

    /// Live streams among `user_ids` (at most `HELIX_PAGE_SIZE`). Offline users are absent.
    pub async fn get_streams(&self, user_ids: &[&str]) -> AppResult<Vec<Stream>> {
        if user_ids.is_empty() {
            return Ok(vec![]);
        }

        let query = repeat_param("user_id", user_ids);
        let streams: StreamsResponse = self
            .get_helix(&format!("/streams?{}&first={}", query, HELIX_PAGE_SIZE), "streams")
            .await?;
        Ok(streams.data)
    }

    // ========================================================================
    // Schedule Methods
    // ========================================================================

    /// Get a channel's schedule; `None` when the broadcaster has none.
    pub async fn get_schedule(&self, broadcaster_id: &str) -> AppResult<Option<ScheduleData>> {
        let response = self
            .send_app_request_with_token(|token| {
                self.client
                    .get(format!(
                        "{}/schedule?broadcaster_id={}",
                        self.api_url,
                        urlencoding::encode(broadcaster_id)
                    ))
                    .header("Authorization", format!("Bearer {}", token))
                    .header("Client-Id", &self.client_id)
            })
            .await?;

        // 404 is returned when there's no schedule
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::TwitchApi(format!(
                "Failed to get schedule: {}",
                error_text
            )));
        }

        let schedule: ScheduleResponse = response.json().await.map_err(|e| {
            AppError::TwitchApi(format!("Failed to parse schedule response: {}", e))
        })?;

        Ok(Some(schedule.data))
    }

    // ========================================================================
    // EventSub Methods
    // ========================================================================

    /// Create a webhook EventSub subscription for `broadcaster_id`.
    pub async fn create_eventsub_subscription(
        &self,
        subscription_type: &str,
        broadcaster_id: &str,
        secret: &str,
    ) -> AppResult<EventSubSubscription> {
        let request = CreateEventSubRequest {
            subscription_type: subscription_type.to_string(),
            version: "1".to_string(),
            condition: serde_json::json!({ "broadcaster_user_id": broadcaster_id }),
            transport: EventSubTransport {
                method: "webhook".to_string(),
                callback: format!("{}/webhooks/twitch", self.webhook_url.trim_end_matches('/')),
                secret: Some(secret.to_string()),
            },
        };

        let response = self
            .send_app_request_with_token(|token| {
                self.client
                    .post(format!("{}/eventsub/subscriptions", self.api_url))
                    .header("Authorization", format!("Bearer {}", token))
                    .header("Client-Id", &self.client_id)
                    .json(&request)
            })
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::TwitchApi(format!(
                "Failed to create EventSub subscription: {}",
                error_text
            )));
        }

        let subscription: EventSubResponse = response.json().await.map_err(|e| {
            AppError::TwitchApi(format!("Failed to parse EventSub response: {}", e))
        })?;

        subscription
            .data
            .into_iter()
            .next()
            .ok_or_else(|| AppError::TwitchApi("No subscription created".to_string()))
    }

    /// Delete an EventSub subscription. Unknown ids are treated as already gone.
    pub async fn delete_eventsub_subscription(&self, subscription_id: &str) -> AppResult<()> {
        let response = self
            .send_app_request_with_token(|token| {
                self.client
                    .delete(format!(
                        "{}/eventsub/subscriptions?id={}",
                        self.api_url,
                        urlencoding::encode(subscription_id)
                    ))
                    .header("Authorization", format!("Bearer {}", token))
                    .header("Client-Id", &self.client_id)
            })
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::TwitchApi(format!(
                "Failed to delete EventSub subscription: {}",
                error_text
            )));
        }

        Ok(())
    }
}

fn repeat_param(name: &str, values: &[&str]) -> String {
    values
        .iter()
        .map(|v| format!("{}={}", name, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}
