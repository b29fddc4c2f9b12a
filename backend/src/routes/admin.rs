use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{request::Parts, StatusCode},
    routing::post,
    Router,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};

use crate::error::{AppError, AppResult};
use crate::services::init;
use crate::AppState;

/// Admin routes: streamer management, schedules, EventSub ledger and manual sync.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sync", post(trigger_sync))
        .merge(super::streamers::router())
        .merge(super::schedule::router())
}

/// Extractor guarding the admin API with the static `ADMIN_TOKEN` bearer token.
pub struct AdminUser;

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.config.admin.token.as_deref() else {
            return Err(AppError::ServiceUnavailable(
                "Admin API is disabled".to_string(),
            ));
        };

        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|e| {
                    tracing::debug!("Missing or invalid Authorization header: {}", e);
                    AppError::Unauthorized
                })?;

        if !constant_time_eq(bearer.token().as_bytes(), expected.as_bytes()) {
            tracing::debug!("Rejected admin request with a wrong token");
            return Err(AppError::Unauthorized);
        }

        Ok(AdminUser)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

async fn trigger_sync(_admin: AdminUser, State(state): State<Arc<AppState>>) -> AppResult<StatusCode> {
    tracing::info!("Manual Twitch synchronization requested");
    init::run_sync_pass(&state).await?;
    Ok(StatusCode::NO_CONTENT)
}
