use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use http::{header, HeaderValue, Method};
use tokio::sync::broadcast;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod db;
mod error;
mod middleware;
mod routes;
mod services;

use config::Config;
use middleware::rate_limit::limit_webhooks;
use services::{init, media::MediaService, twitch::TwitchService};

/// Time background tasks get to finish after the server stopped.
const WORKER_GRACE: Duration = Duration::from_secs(15);

pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub config: Config,
    pub twitch: TwitchService,
    pub media: MediaService,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pogscience=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!("Starting PogScience backend");

    let db = init::init_db(&config).await?;
    init::init_media_root(&config)?;

    let twitch = TwitchService::new(&config)?;
    if let Err(e) = twitch.refresh_app_access_token().await {
        // Retried lazily on the first Helix call.
        tracing::warn!("Failed to fetch initial Twitch app access token: {}", e);
    }
    let media = MediaService::new(&config.media)?;

    let state = Arc::new(AppState {
        db,
        config: config.clone(),
        twitch,
        media,
    });

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut tasks = init::spawn_background_workers(state.clone(), shutdown_tx.clone());

    let (webhooks, limiter_eviction) = limit_webhooks(
        routes::webhooks::router(),
        &config.rate_limit,
        shutdown_tx.subscribe(),
    )?;
    tasks.push(limiter_eviction);

    let app = build_app(state, &config, webhooks)?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Connect info is the limiter's fallback when no proxy header carries the client IP.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received, stopping workers");
        let _ = shutdown_tx.send(());
    })
    .await?;

    let drained = tokio::time::timeout(WORKER_GRACE, async {
        for task in tasks {
            let _ = task.await;
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            "Background tasks still running after {}s, exiting anyway",
            WORKER_GRACE.as_secs()
        );
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Public and admin API under `/api`, EventSub under `/webhooks`, stored images
/// under `MEDIA_URL` when it is a local path.
fn build_app(
    state: Arc<AppState>,
    config: &Config,
    webhooks: Router<Arc<AppState>>,
) -> anyhow::Result<Router> {
    let frontend_origin = config
        .server
        .frontend_url
        .parse::<HeaderValue>()
        .map_err(|e| anyhow::anyhow!("Invalid FRONTEND_URL for CORS: {}", e))?;

    let mut app = Router::new()
        .route("/health", get(routes::health::health_check))
        .nest("/api", routes::home::router().merge(routes::admin::router()))
        .nest("/webhooks", webhooks);

    if config.media.url.starts_with('/') && config.media.url != "/" {
        app = app.nest_service(&config.media.url, ServeDir::new(&config.media.root));
    }

    Ok(app
        .with_state(state)
        .layer(axum::middleware::from_fn(middleware::csp::csp_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(frontend_origin)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PATCH,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]),
        ))
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                tracing::error!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
