//! Artwork cache for show posters and fanart
//!
//! Images are downloaded from the indexer's URLs into
//! `<cache>/images/<show key>/`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::library::{Show, ShowKey};

/// Image cache as seen by the show queue
#[async_trait]
pub trait ImageCache: Send + Sync {
    /// Re-download every image of the show
    async fn replace_images(&self, show: &Show) -> Result<()>;

    async fn remove_images(&self, key: &ShowKey) -> Result<()>;
}

/// Artwork type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtworkType {
    Poster,
    Fanart,
}

impl ArtworkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtworkType::Poster => "poster",
            ArtworkType::Fanart => "fanart",
        }
    }
}

/// Filesystem backed [`ImageCache`]
pub struct ArtworkCache {
    cache_dir: PathBuf,
    http_client: reqwest::Client,
}

impl ArtworkCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            http_client: reqwest::Client::new(),
        }
    }

    pub fn show_dir(&self, key: &ShowKey) -> PathBuf {
        self.cache_dir.join("images").join(key.to_string())
    }

    /// Download one image, replacing any previous file of the same type.
    ///
    /// Returns the path of the cached file.
    pub async fn cache_image(
        &self,
        source_url: &str,
        artwork_type: ArtworkType,
        key: &ShowKey,
    ) -> Result<PathBuf> {
        info!(url = %source_url, artwork_type = ?artwork_type, show = %key, "Caching artwork");

        let response = self
            .http_client
            .get(source_url)
            .send()
            .await
            .context("Failed to download image")?;

        if !response.status().is_success() {
            anyhow::bail!("Failed to download image: {}", response.status());
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|ct| ct.to_str().ok())
            .unwrap_or("image/jpeg")
            .to_string();

        let bytes = response.bytes().await.context("Failed to read image bytes")?;

        let dir = self.show_dir(key);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        remove_type(&dir, artwork_type).await?;

        let path = dir.join(format!(
            "{}.{}",
            artwork_type.as_str(),
            extension_for(&content_type)
        ));
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        debug!(path = %path.display(), size = bytes.len(), "Artwork cached");
        Ok(path)
    }
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "jpg",
    }
}

async fn remove_type(dir: &Path, artwork_type: ArtworkType) -> Result<()> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.file_stem().and_then(|s| s.to_str()) == Some(artwork_type.as_str()) {
            tokio::fs::remove_file(&path).await?;
        }
    }
    Ok(())
}

#[async_trait]
impl ImageCache for ArtworkCache {
    async fn replace_images(&self, show: &Show) -> Result<()> {
        let wanted = [
            (ArtworkType::Poster, show.poster_url.as_deref()),
            (ArtworkType::Fanart, show.fanart_url.as_deref()),
        ];

        for (artwork_type, url) in wanted {
            let Some(url) = url else {
                continue;
            };
            if let Err(e) = self.cache_image(url, artwork_type, &show.key).await {
                warn!(show = %show.key, artwork_type = ?artwork_type, error = %e, "Failed to cache artwork");
            }
        }
        Ok(())
    }

    async fn remove_images(&self, key: &ShowKey) -> Result<()> {
        let dir = self.show_dir(key);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!(show = %key, "Removed cached artwork");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", dir.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::Indexer;

    #[tokio::test]
    async fn test_remove_images() {
        let temp = tempfile::tempdir().unwrap();
        let cache = ArtworkCache::new(temp.path());
        let key = ShowKey::new(Indexer::TvMaze, 82);

        let dir = cache.show_dir(&key);
        assert!(dir.ends_with("images/tvmaze82"));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("poster.jpg"), b"jpg").await.unwrap();

        cache.remove_images(&key).await.unwrap();
        assert!(!dir.exists());
        // Removing again is fine
        cache.remove_images(&key).await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_type_keeps_other_artwork() {
        let temp = tempfile::tempdir().unwrap();
        tokio::fs::write(temp.path().join("poster.png"), b"png").await.unwrap();
        tokio::fs::write(temp.path().join("fanart.jpg"), b"jpg").await.unwrap();

        remove_type(temp.path(), ArtworkType::Poster).await.unwrap();
        assert!(!temp.path().join("poster.png").exists());
        assert!(temp.path().join("fanart.jpg").exists());
        assert_eq!(extension_for("image/webp"), "webp");
    }
}
