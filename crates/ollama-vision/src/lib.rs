//! Ollama Vision — image normalization and vision model inference over the Ollama API.

pub mod client;
pub mod config;
pub mod normalize;
pub mod types;

pub use client::{is_vision_model, select_model, OllamaClient, NO_RESPONSE, VISION_MARKERS};
pub use config::VisionConfig;
pub use normalize::{classify, process_bytes, ImageNormalizer};
pub use types::*;
