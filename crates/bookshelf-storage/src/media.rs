//! Remote image download, WebP transcoding and local caching.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bookshelf_core::ProcessedImage;
use image::imageops::FilterType;
use image::DynamicImage;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{FetchError, HttpFetcher, MediaStore};

pub const MEDIA_SCOPE: &str = "media";
const HOSTED_STORAGE_MARKER: &str = "amazonaws.com";
const CACHE_EXTENSION: &str = "webp";

#[derive(Debug, Error)]
pub enum MediaError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("decoding image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("encoding webp: {0}")]
    Encode(String),
    #[error("storing image: {0}")]
    Store(#[from] anyhow::Error),
    #[error("image worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Source of raw media bytes. The HTTP fetcher is the production implementation.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch_media(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

#[async_trait]
impl MediaFetcher for HttpFetcher {
    async fn fetch_media(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        Ok(self.fetch_bytes(MEDIA_SCOPE, url).await?.body)
    }
}

#[derive(Debug, Clone)]
pub struct ImagePipelineConfig {
    pub dest_dir: PathBuf,
    pub public_prefix: String,
    pub max_width: u32,
    pub quality: f32,
}

impl Default for ImagePipelineConfig {
    fn default() -> Self {
        Self {
            dest_dir: PathBuf::from("static/images/notion"),
            public_prefix: "/images/notion".to_string(),
            max_width: 1200,
            quality: 80.0,
        }
    }
}

/// Cache filename for a remote image.
///
/// Hosted-storage URLs are signed and rotate, but the second-to-last path segment
/// identifies the stored file and stays stable, so it becomes the name. Any other
/// URL is named by `sha256(url + owner_id)`.
pub fn cache_filename(url: &str, owner_id: &str) -> String {
    if url.contains(HOSTED_STORAGE_MARKER) {
        let without_query = url.split('?').next().unwrap_or(url);
        let parts: Vec<&str> = without_query.split('/').collect();
        if parts.len() >= 2 {
            let file_id = parts[parts.len() - 2];
            if is_safe_segment(file_id) {
                return format!("{file_id}.{CACHE_EXTENSION}");
            }
        }
    }
    let hash = MediaStore::sha256_hex(format!("{url}{owner_id}").as_bytes());
    format!("{hash}.{CACHE_EXTENSION}")
}

fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Decode, shrink to `max_width` (never enlarging) and encode as lossy WebP.
pub fn transcode_to_webp(bytes: &[u8], max_width: u32, quality: f32) -> Result<Vec<u8>, MediaError> {
    let decoded = image::load_from_memory(bytes)?;
    let resized = fit_width(decoded, max_width);
    let rgba = resized.to_rgba8();
    let encoder = webp::Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height());
    let encoded = encoder
        .encode_simple(false, quality)
        .map_err(|err| MediaError::Encode(format!("{err:?}")))?;
    Ok(encoded.to_vec())
}

fn fit_width(image: DynamicImage, max_width: u32) -> DynamicImage {
    let (width, height) = (image.width(), image.height());
    if width <= max_width || width == 0 {
        return image;
    }
    let scaled_height = (u64::from(height) * u64::from(max_width) / u64::from(width)).max(1) as u32;
    image.resize_exact(max_width, scaled_height, FilterType::Lanczos3)
}

async fn read_dimensions(path: &Path) -> Result<(u32, u32), MediaError> {
    let path = path.to_path_buf();
    let dims = tokio::task::spawn_blocking(move || image::image_dimensions(path)).await??;
    Ok(dims)
}

/// Produces locally cached copies of remote images. Never fails: on any error the
/// result points back at the remote URL.
pub struct ImagePipeline {
    config: ImagePipelineConfig,
    store: MediaStore,
    fetcher: Arc<dyn MediaFetcher>,
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ImagePipeline {
    pub fn new(config: ImagePipelineConfig, fetcher: Arc<dyn MediaFetcher>) -> Self {
        let store = MediaStore::new(config.dest_dir.clone());
        Self {
            config,
            store,
            fetcher,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &MediaStore {
        &self.store
    }

    fn public_path(&self, filename: &str) -> String {
        format!("{}/{filename}", self.config.public_prefix.trim_end_matches('/'))
    }

    async fn file_lock(&self, filename: &str) -> Arc<Mutex<()>> {
        let mut map = self.in_flight.lock().await;
        map.entry(filename.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn process(&self, url: &str, owner_id: &str) -> ProcessedImage {
        if url.is_empty() {
            return ProcessedImage::empty();
        }

        let filename = cache_filename(url, owner_id);
        let lock = self.file_lock(&filename).await;
        let _held = lock.lock().await;

        let absolute_path = self.store.path_for(&filename);
        if matches!(self.store.exists(&filename).await, Ok(true)) {
            match read_dimensions(&absolute_path).await {
                Ok((width, height)) => {
                    debug!(%filename, "image cache hit");
                    return ProcessedImage {
                        src: self.public_path(&filename),
                        width,
                        height,
                        placeholder: None,
                    };
                }
                Err(err) => {
                    warn!(%filename, error = %err, "cached image unreadable, processing again");
                    if let Err(err) = self.store.evict(&filename).await {
                        warn!(%filename, error = %err, "could not remove unreadable cached image");
                    }
                }
            }
        }

        match self.download_and_store(url, &filename).await {
            Ok((width, height)) => ProcessedImage {
                src: self.public_path(&filename),
                width,
                height,
                placeholder: None,
            },
            Err(err) => {
                warn!(url, error = %err, "image processing failed, using remote url");
                ProcessedImage::fallback(url)
            }
        }
    }

    async fn download_and_store(&self, url: &str, filename: &str) -> Result<(u32, u32), MediaError> {
        info!("downloading image {}", truncate_for_log(url));
        let bytes = self.fetcher.fetch_media(url).await?;

        let max_width = self.config.max_width;
        let quality = self.config.quality;
        let encoded =
            tokio::task::spawn_blocking(move || transcode_to_webp(&bytes, max_width, quality)).await??;

        let path = self.store.write_atomic(filename, &encoded).await?;
        read_dimensions(&path).await
    }
}

fn truncate_for_log(url: &str) -> &str {
    match url.char_indices().nth(60) {
        Some((idx, _)) => &url[..idx],
        None => url,
    }
}
