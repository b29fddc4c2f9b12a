use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Router,
};

use crate::error::AppError;
use crate::services::webhooks::WebhookService;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/twitch", post(handle_twitch_webhook))
}

/// EventSub callback. Verification requests get the challenge back as plain text.
async fn handle_twitch_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, String), AppError> {
    let reply = WebhookService::handle(&state, &headers, &body).await?;
    Ok((StatusCode::OK, reply))
}
