//! Normalize an image reference, then run it through an Ollama vision model.

use std::sync::Arc;

use ollama_vision::{ImageNormalizer, OllamaClient, VisionConfig};

use crate::types::McpResult;

/// Holds the immutable configuration and the two pipeline stages.
///
/// Carries no mutable state, so one instance serves concurrent calls.
#[derive(Debug, Clone)]
pub struct VisionService {
    config: Arc<VisionConfig>,
    normalizer: ImageNormalizer,
    client: OllamaClient,
}

impl VisionService {
    pub fn new(config: Arc<VisionConfig>) -> McpResult<Self> {
        let normalizer = ImageNormalizer::new(&config)?;
        let client = OllamaClient::new(&config)?;

        tracing::info!(
            "Vision service ready: backend {}, default model {}, timeout {}s",
            client.base_url(),
            config.default_model,
            config.timeout
        );

        Ok(Self {
            config,
            normalizer,
            client,
        })
    }

    pub fn config(&self) -> &VisionConfig {
        &self.config
    }

    pub fn client(&self) -> &OllamaClient {
        &self.client
    }

    /// Analyze one image with one instruction.
    pub async fn analyze(
        &self,
        image_ref: &str,
        instruction: &str,
        model: Option<&str>,
    ) -> McpResult<String> {
        let image = self.normalizer.normalize(image_ref).await?;
        tracing::debug!("Normalized image: {} base64 bytes", image.len());
        let text = self.client.infer(&image, instruction, model).await?;
        Ok(text)
    }
}
