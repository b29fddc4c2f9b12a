//! Per-client-IP rate limiting for the EventSub webhook endpoint.

use std::time::Duration;

use anyhow::{ensure, Context};
use axum::{
    http::{header::RETRY_AFTER, HeaderValue},
    response::{IntoResponse, Response},
    Router,
};
use tokio::{sync::broadcast, task::JoinHandle};
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorError,
    GovernorLayer,
};

use crate::config::RateLimitConfig;
use crate::error::AppError;

/// How often keys that are back to a full quota are evicted.
const EVICTION_INTERVAL: Duration = Duration::from_secs(60);

fn rejection(error: GovernorError) -> Response {
    match error {
        GovernorError::TooManyRequests { wait_time, headers } => {
            let mut response = AppError::RateLimited(wait_time).into_response();
            if let Some(headers) = headers {
                response.headers_mut().extend(headers);
            }
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(wait_time));
            response
        }
        GovernorError::UnableToExtractKey => {
            AppError::BadRequest("Unable to determine client IP".to_string()).into_response()
        }
        GovernorError::Other { code, msg, .. } => {
            tracing::warn!("Webhook rate limiter failed with {}: {:?}", code, msg);
            AppError::Internal(anyhow::anyhow!("rate limiter: {:?}", msg)).into_response()
        }
    }
}

/// Put `router` behind a per-IP quota of `webhook_per_second` requests per
/// second with bursts of `webhook_burst`.
///
/// The returned task evicts idle clients from the limiter until `shutdown` fires.
pub fn limit_webhooks<S>(
    router: Router<S>,
    config: &RateLimitConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<(Router<S>, JoinHandle<()>)>
where
    S: Clone + Send + Sync + 'static,
{
    ensure!(
        config.webhook_per_second > 0,
        "RATE_LIMIT_WEBHOOKS_PER_SECOND must be positive"
    );

    let governor = GovernorConfigBuilder::default()
        .period(Duration::from_secs(1) / config.webhook_per_second)
        .burst_size(config.webhook_burst)
        .error_handler(rejection)
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .context("RATE_LIMIT_WEBHOOKS_BURST must be positive")?;

    let limiter = governor.limiter().clone();
    let eviction = tokio::spawn(async move {
        let mut ticks = tokio::time::interval(EVICTION_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = ticks.tick() => {
                    limiter.retain_recent();
                    tracing::debug!("Webhook rate limiter tracks {} clients", limiter.len());
                }
            }
        }
    });

    let layer = GovernorLayer {
        config: governor.into(),
    };
    Ok((router.layer(layer), eviction))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::{body_json, send};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        routing::post,
    };

    fn from_ip(ip: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/twitch")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    fn limited(per_second: u32, burst: u32) -> (Router, JoinHandle<()>, broadcast::Sender<()>) {
        let (tx, rx) = broadcast::channel(1);
        let config = RateLimitConfig {
            webhook_per_second: per_second,
            webhook_burst: burst,
        };
        let (router, eviction) =
            limit_webhooks(Router::new().route("/twitch", post(|| async { "ok" })), &config, rx)
                .unwrap();
        (router, eviction, tx)
    }

    #[tokio::test]
    async fn over_quota_client_gets_json_429() {
        let (app, eviction, shutdown) = limited(1, 1);

        let first = send(app.clone(), from_ip("203.0.113.7")).await;
        assert_eq!(first.status(), StatusCode::OK);

        let second = send(app.clone(), from_ip("203.0.113.7")).await;
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(second.headers().contains_key(RETRY_AFTER));
        assert!(second.headers().contains_key("x-ratelimit-after"));
        let body = body_json(second).await;
        assert_eq!(body["error"]["code"], "RATE_LIMITED");

        // Quotas are per client.
        let other = send(app, from_ip("198.51.100.2")).await;
        assert_eq!(other.status(), StatusCode::OK);

        shutdown.send(()).unwrap();
        eviction.await.unwrap();
    }

    #[tokio::test]
    async fn request_without_client_ip_is_rejected() {
        let (app, _eviction, _shutdown) = limited(10, 5);
        let response = send(
            app,
            Request::builder()
                .method("POST")
                .uri("/twitch")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn zero_rates_are_refused() {
        let (_tx, rx) = broadcast::channel(1);
        let zero_rate = RateLimitConfig {
            webhook_per_second: 0,
            webhook_burst: 5,
        };
        assert!(limit_webhooks(Router::<()>::new(), &zero_rate, rx).is_err());

        let (_tx, rx) = broadcast::channel(1);
        let zero_burst = RateLimitConfig {
            webhook_per_second: 5,
            webhook_burst: 0,
        };
        assert!(limit_webhooks(Router::<()>::new(), &zero_burst, rx).is_err());
    }
}
