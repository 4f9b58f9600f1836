//! Image normalization: classify a reference, resolve it to bytes, and re-encode for transport.

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use reqwest::header::CONTENT_TYPE;
use url::Url;

use crate::client::bounded;
use crate::config::VisionConfig;
use crate::types::{CanonicalImage, ImageReference, VisionError, VisionResult};

/// File extensions accepted for local images.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp"];

/// Decoded base64 payloads must be longer than this to count as inline image data.
/// Short strings that happen to be valid base64 are treated as paths.
pub const MIN_INLINE_BYTES: usize = 64;

/// JPEG quality for re-encoded opaque images.
const JPEG_QUALITY: u8 = 95;

const DATA_URL_PREFIX: &str = "data:image";

/// Classify an image reference. Pure: touches neither disk nor network.
///
/// Order is inline data, then URL, then local path; the first match wins.
pub fn classify(reference: &str) -> VisionResult<ImageReference> {
    if reference.trim().is_empty() {
        return Err(VisionError::InvalidReference(
            "image reference is empty".to_string(),
        ));
    }

    if is_inline(reference) {
        return Ok(ImageReference::Inline(reference.to_string()));
    }

    if let Some(url) = parse_remote(reference) {
        return Ok(ImageReference::Remote(url));
    }

    Ok(ImageReference::Local(PathBuf::from(reference)))
}

fn is_inline(reference: &str) -> bool {
    if reference.starts_with(DATA_URL_PREFIX) && reference.contains(',') {
        return true;
    }

    STANDARD
        .decode(reference)
        .map(|bytes| bytes.len() > MIN_INLINE_BYTES)
        .unwrap_or(false)
}

fn parse_remote(reference: &str) -> Option<Url> {
    let url = Url::parse(reference).ok()?;
    let has_host = url.host_str().is_some_and(|h| !h.is_empty());
    (!url.scheme().is_empty() && has_host).then_some(url)
}

/// Check if a file path has a supported image extension.
pub fn is_supported_extension(path: &Path) -> bool {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    SUPPORTED_EXTENSIONS.contains(&ext.as_str())
}

/// Turns image references into [`CanonicalImage`]s.
#[derive(Debug, Clone)]
pub struct ImageNormalizer {
    http: reqwest::Client,
    timeout: Option<Duration>,
    max_bytes: u64,
    max_dimension: u32,
}

impl ImageNormalizer {
    pub fn new(config: &VisionConfig) -> VisionResult<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| VisionError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(http, config))
    }

    /// Share an existing HTTP client.
    pub fn with_client(http: reqwest::Client, config: &VisionConfig) -> Self {
        Self {
            http,
            timeout: config.timeout_duration(),
            max_bytes: config.max_image_bytes,
            max_dimension: config.max_dimension.max(1),
        }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Resolve a reference to a canonical base64 image.
    ///
    /// Inline references are returned untouched; URLs and local files are
    /// decoded, flattened, bounded to the maximum dimension, and re-encoded.
    pub async fn normalize(&self, reference: &str) -> VisionResult<CanonicalImage> {
        let classified = classify(reference)?;
        tracing::debug!("Normalizing {} image reference", classified.kind());

        let bytes = match classified {
            ImageReference::Inline(data) => return Ok(CanonicalImage::new(data)),
            ImageReference::Remote(url) => self.fetch_remote(&url).await?,
            ImageReference::Local(path) => self.load_local(&path).await?,
        };

        let max_dimension = self.max_dimension;
        tokio::task::spawn_blocking(move || process_bytes(&bytes, max_dimension))
            .await
            .map_err(|e| VisionError::Io(std::io::Error::other(e)))?
    }

    async fn fetch_remote(&self, url: &Url) -> VisionResult<Vec<u8>> {
        let mut response = bounded(self.http.get(url.clone()), self.timeout)
            .send()
            .await
            .map_err(|e| download_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(VisionError::Transport(format!(
                "failed to download image from {url}: HTTP {}",
                status.as_u16()
            )));
        }

        if let Some(declared) = response.content_length() {
            if declared > self.max_bytes {
                return Err(VisionError::TooLarge {
                    size: declared,
                    max: self.max_bytes,
                });
            }
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.starts_with("image/") {
            return Err(VisionError::UnsupportedFormat(format!(
                "invalid content type: {content_type}"
            )));
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| download_error(url, e))? {
            body.extend_from_slice(&chunk);
            if body.len() as u64 > self.max_bytes {
                return Err(VisionError::TooLarge {
                    size: body.len() as u64,
                    max: self.max_bytes,
                });
            }
        }

        tracing::debug!("Downloaded {} bytes from {url}", body.len());
        Ok(body)
    }

    async fn load_local(&self, path: &Path) -> VisionResult<Vec<u8>> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };

        let metadata = match tokio::fs::metadata(&absolute).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(VisionError::NotFound(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        if !is_supported_extension(&absolute) {
            let ext = absolute
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("");
            return Err(VisionError::UnsupportedFormat(format!(".{ext}")));
        }

        if !metadata.is_file() {
            return Err(VisionError::InvalidReference(format!(
                "not a regular file: {}",
                absolute.display()
            )));
        }

        if metadata.len() > self.max_bytes {
            return Err(VisionError::TooLarge {
                size: metadata.len(),
                max: self.max_bytes,
            });
        }

        Ok(tokio::fs::read(&absolute).await?)
    }
}

fn download_error(url: &Url, e: reqwest::Error) -> VisionError {
    if e.is_timeout() {
        VisionError::Transport(format!("timed out downloading image from {url}"))
    } else {
        VisionError::Transport(format!("failed to download image from {url}: {e}"))
    }
}

/// Decode, flatten, bound and re-encode raw image bytes.
pub fn process_bytes(bytes: &[u8], max_dimension: u32) -> VisionResult<CanonicalImage> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| VisionError::UnsupportedFormat(format!("cannot decode image: {e}")))?;

    let img = if img.color().has_alpha() {
        flatten_alpha(&img)
    } else {
        img
    };
    let img = fit_within(img, max_dimension);

    let encoded = encode(&img)?;
    Ok(CanonicalImage::new(STANDARD.encode(encoded)))
}

/// Composite an image onto an opaque white background.
pub fn flatten_alpha(img: &DynamicImage) -> DynamicImage {
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();

    let flat = RgbImage::from_fn(width, height, |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = u16::from(a);
        let blend = |c: u8| ((u16::from(c) * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    });

    DynamicImage::ImageRgb8(flat)
}

/// Target size so that the longer side is at most `max`, preserving aspect ratio.
/// Never upscales.
pub fn scaled_dimensions(width: u32, height: u32, max: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max {
        return (width, height);
    }

    let scale = |side: u32| -> u32 {
        let scaled = (f64::from(side) * f64::from(max) / f64::from(longest)).round() as u32;
        scaled.max(1)
    };

    if width >= height {
        (max, scale(height))
    } else {
        (scale(width), max)
    }
}

fn fit_within(img: DynamicImage, max_dimension: u32) -> DynamicImage {
    let (width, height) = img.dimensions();
    let (target_w, target_h) = scaled_dimensions(width, height, max_dimension);
    if (target_w, target_h) == (width, height) {
        return img;
    }

    tracing::info!("Resized image from {width}x{height} to {target_w}x{target_h}");
    img.resize_exact(target_w, target_h, FilterType::Lanczos3)
}

fn encode(img: &DynamicImage) -> VisionResult<Vec<u8>> {
    let mut buf = Vec::new();
    let written = if img.color().has_alpha() {
        img.to_rgba8().write_with_encoder(PngEncoder::new(&mut buf))
    } else {
        img.to_rgb8()
            .write_with_encoder(JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY))
    };
    written.map_err(|e| VisionError::UnsupportedFormat(format!("cannot encode image: {e}")))?;
    Ok(buf)
}
