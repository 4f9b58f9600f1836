//! Core data types for image references, canonical payloads, and errors.

use std::fmt;
use std::path::PathBuf;

use url::Url;

/// A classified image reference, carrying only what its resolution branch needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageReference {
    /// Already-encoded image data (base64 or a `data:image` URL), passed through untouched.
    Inline(String),
    /// An absolute URL with a scheme and a host.
    Remote(Url),
    /// A local filesystem path, not yet resolved.
    Local(PathBuf),
}

impl ImageReference {
    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ImageReference::Inline(_) => "inline",
            ImageReference::Remote(_) => "remote",
            ImageReference::Local(_) => "local",
        }
    }
}

/// A size- and format-bounded image, base64-encoded for transport.
///
/// Self-contained: it holds no reference back to the path or URL it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalImage(String);

impl CanonicalImage {
    pub(crate) fn new(encoded: String) -> Self {
        Self(encoded)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Length of the encoded text in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CanonicalImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors that can occur while normalizing images or talking to the backend.
#[derive(thiserror::Error, Debug)]
pub enum VisionError {
    #[error("Invalid image reference: {0}")]
    InvalidReference(String),

    #[error("Image file not found: {0}")]
    NotFound(String),

    #[error("Image too large: {size} bytes exceeds {max} bytes")]
    TooLarge { size: u64, max: u64 },

    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("No vision models available. Please run 'ollama pull llava-phi3' first")]
    NoModelsAvailable,

    #[error("Request timed out after {0} seconds")]
    RequestTimeout(u64),

    #[error("Ollama API error: {status} - {body}")]
    Backend { status: u16, body: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type VisionResult<T> = Result<T, VisionError>;
