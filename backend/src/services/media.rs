//! Stored streamer images.
//!
//! Images live under `MEDIA_ROOT` at `twitch/{folder}/{login}{ext}`. Saving a new
//! image for a field overwrites the file at that path and removes the field's
//! previous file when the path changed (e.g. a new extension), so a field never
//! leaves stale files behind.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use reqwest::Client;

use crate::config::MediaConfig;
use crate::error::{AppError, AppResult};

/// Which image field of a streamer a file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Profile,
    Background,
    LivePreview,
}

impl ImageKind {
    pub fn folder(self) -> &'static str {
        match self {
            ImageKind::Profile => "profile",
            ImageKind::Background => "background",
            ImageKind::LivePreview => "live-preview",
        }
    }

    /// Storage path for `login`'s image of this kind fetched from `source_url`.
    pub fn upload_to(self, login: &str, source_url: &str) -> String {
        format!("twitch/{}/{}{}", self.folder(), login, url_extension(source_url))
    }
}

/// Extension (with the leading dot) of the last path segment of `url`, or "".
pub fn url_extension(url: &str) -> String {
    let path = match url::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(&['?', '#'][..]).next().unwrap_or("").to_string(),
    };

    let file_name = path.rsplit('/').next().unwrap_or("");
    match file_name.rfind('.') {
        // A leading dot is a hidden file name, not an extension.
        Some(idx) if idx > 0 && idx + 1 < file_name.len() => file_name[idx..].to_string(),
        _ => String::new(),
    }
}

#[derive(Debug, Clone)]
pub struct MediaService {
    client: Client,
    root: PathBuf,
    base_url: String,
}

impl MediaService {
    pub fn new(config: &MediaConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Internal(e.into()))?;

        Ok(Self {
            client,
            root: PathBuf::from(&config.root),
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Public URL of a stored file.
    pub fn url(&self, name: &str) -> String {
        format!("{}/{}", self.base_url, name)
    }

    fn resolve(&self, name: &str) -> AppResult<PathBuf> {
        let relative = Path::new(name);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(AppError::Validation(format!("Invalid media path: {}", name)));
        }
        Ok(self.root.join(relative))
    }

    /// Write `bytes` at `name`, replacing whatever was there.
    ///
    /// `previous` is the field's current file; it is removed if it differs from `name`.
    pub async fn save(&self, name: &str, bytes: &[u8], previous: Option<&str>) -> AppResult<String> {
        let path = self.resolve(name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;

        if let Some(previous) = previous.filter(|p| *p != name && !p.is_empty()) {
            match self.resolve(previous) {
                Ok(old) => {
                    if let Err(e) = tokio::fs::remove_file(&old).await {
                        if e.kind() != std::io::ErrorKind::NotFound {
                            tracing::warn!("Failed to remove stale media file {}: {}", old.display(), e);
                        }
                    }
                }
                Err(e) => tracing::warn!("Not removing previous media file {}: {}", previous, e),
            }
        }

        tracing::debug!("Stored media file {} ({} bytes)", path.display(), bytes.len());
        Ok(name.to_string())
    }

    /// Delete a stored file. A file that is already gone is not an error.
    pub async fn remove(&self, name: &str) -> AppResult<()> {
        let path = self.resolve(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// GET `url`, returning the body only for a 2xx response.
    ///
    /// Network errors and non-success statuses yield `None`; callers treat a failed
    /// download as "nothing to update" rather than an error.
    pub async fn fetch(&self, url: &str) -> Option<Vec<u8>> {
        let response = match self.client.get(url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!("Failed HTTP GET for image {}: {}", url, e);
                return None;
            }
        };

        if !response.status().is_success() {
            tracing::warn!("Failed to fetch image {} (status: {})", url, response.status());
            return None;
        }

        match response.bytes().await {
            Ok(bytes) => Some(bytes.to_vec()),
            Err(e) => {
                tracing::warn!("Failed to read image body from {}: {}", url, e);
                None
            }
        }
    }

    /// Download `url` and store it as `login`'s `kind` image, updating `field`.
    ///
    /// An absent URL or a failed download leaves `field` untouched and is not an
    /// error. This is intended: a Twitch CDN hiccup must not fail a sync pass.
    /// Only local storage failures are reported.
    pub async fn download_and_store_image(
        &self,
        url: Option<&str>,
        kind: ImageKind,
        login: &str,
        field: &mut Option<String>,
    ) -> AppResult<()> {
        let Some(url) = url.filter(|u| !u.is_empty()) else {
            return Ok(());
        };

        let Some(bytes) = self.fetch(url).await else {
            return Ok(());
        };

        let name = kind.upload_to(login, url);
        let stored = self.save(&name, &bytes, field.as_deref()).await?;
        *field = Some(stored);

        Ok(())
    }
}
