use std::env;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub twitch: TwitchConfig,
    pub media: MediaConfig,
    pub previews: PreviewsConfig,
    pub admin: AdminConfig,
    pub rate_limit: RateLimitConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub frontend_url: String,
    /// Public base URL Twitch calls back for EventSub (`{webhook_url}/webhooks/twitch`).
    pub webhook_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TwitchConfig {
    pub client_id: String,
    pub client_secret: String,
    /// OAuth base URL; overridable to point at `twitch mock-api`.
    pub auth_url: String,
    /// Helix base URL.
    pub api_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    /// Directory stored images are written to.
    pub root: String,
    /// Public URL prefix the media root is served under.
    pub url: String,
}

/// Dimensions substituted into Twitch's live thumbnail URL template.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PreviewsConfig {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    /// Bearer token required by the admin API. The admin API is disabled when unset.
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Allowed requests per second (per IP) for webhook endpoints (e.g. /webhooks/twitch)
    pub webhook_per_second: u32,
    /// Burst size for webhook endpoints
    pub webhook_burst: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Whether the periodic Twitch synchronization workers run.
    pub enabled: bool,
    /// Seconds between two synchronization passes.
    pub interval_seconds: u64,
}

const DEFAULT_TWITCH_AUTH_URL: &str = "https://id.twitch.tv/oauth2";
const DEFAULT_TWITCH_API_URL: &str = "https://api.twitch.tv/helix";

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
                frontend_url: env::var("FRONTEND_URL")
                    .unwrap_or_else(|_| "http://localhost:3000".to_string()),
                webhook_url: env::var("WEBHOOK_URL")
                    .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/pogscience.db".to_string()),
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            },
            twitch: TwitchConfig {
                client_id: env::var("TWITCH_CLIENT_ID")
                    .map_err(|_| ConfigError::MissingEnv("TWITCH_CLIENT_ID".to_string()))?,
                client_secret: env::var("TWITCH_CLIENT_SECRET")
                    .map_err(|_| ConfigError::MissingEnv("TWITCH_CLIENT_SECRET".to_string()))?,
                auth_url: env::var("TWITCH_AUTH_URL")
                    .unwrap_or_else(|_| DEFAULT_TWITCH_AUTH_URL.to_string()),
                api_url: env::var("TWITCH_API_URL")
                    .unwrap_or_else(|_| DEFAULT_TWITCH_API_URL.to_string()),
            },
            media: MediaConfig {
                root: env::var("MEDIA_ROOT").unwrap_or_else(|_| "data/media".to_string()),
                url: env::var("MEDIA_URL").unwrap_or_else(|_| "/media".to_string()),
            },
            previews: PreviewsConfig {
                width: env::var("POG_PREVIEWS_WIDTH")
                    .unwrap_or_else(|_| "640".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("POG_PREVIEWS_WIDTH".to_string()))?,
                height: env::var("POG_PREVIEWS_HEIGHT")
                    .unwrap_or_else(|_| "360".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("POG_PREVIEWS_HEIGHT".to_string()))?,
            },
            admin: AdminConfig {
                token: env::var("ADMIN_TOKEN").ok().filter(|t| !t.is_empty()),
            },
            rate_limit: RateLimitConfig {
                webhook_per_second: env::var("RATE_LIMIT_WEBHOOKS_PER_SECOND")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
                webhook_burst: env::var("RATE_LIMIT_WEBHOOKS_BURST")
                    .unwrap_or_else(|_| "50".to_string())
                    .parse()
                    .unwrap_or(50),
            },
            sync: SyncConfig {
                enabled: env::var("SYNC_ENABLED")
                    .ok()
                    .and_then(|v| parse_bool(&v))
                    .unwrap_or(true),
                interval_seconds: env::var("SYNC_INTERVAL_SECONDS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse()
                    .unwrap_or(300u64),
            },
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                frontend_url: "http://localhost:3000".to_string(),
                webhook_url: "http://localhost:8080".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite://data/pogscience.db".to_string(),
                max_connections: 5,
            },
            twitch: TwitchConfig {
                client_id: String::new(),
                client_secret: String::new(),
                auth_url: DEFAULT_TWITCH_AUTH_URL.to_string(),
                api_url: DEFAULT_TWITCH_API_URL.to_string(),
            },
            media: MediaConfig {
                root: "data/media".to_string(),
                url: "/media".to_string(),
            },
            previews: PreviewsConfig {
                width: 640,
                height: 360,
            },
            admin: AdminConfig { token: None },
            rate_limit: RateLimitConfig {
                webhook_per_second: 10,
                webhook_burst: 50,
            },
            sync: SyncConfig {
                enabled: true,
                interval_seconds: 300,
            },
        }
    }
}
